//! Messages for the write arbiter
//!
//! The engine never talks to the bus itself. It describes each request as a
//! [`WriteMessage`] (addressing, argument tuple and expected reply shape)
//! and leaves sending it to the transport.
//!
//! | method       | body                                   | reply        |
//! |--------------|----------------------------------------|--------------|
//! | `Change`     | `(prefix, [rel paths], [maybe value])` | `(sequence)` |
//! | `SetLocked`  | `(path, locked)`                       | `()`         |
//! | `IsWritable` | `(path)`                               | `(bool)`     |

use confdb_common::changeset::Description;
use confdb_common::{Error, Result, Value};

/// Method names understood by the arbiter
pub mod method {
    pub const CHANGE: &str = "Change";
    pub const SET_LOCKED: &str = "SetLocked";
    pub const IS_WRITABLE: &str = "IsWritable";
}

/// Which message bus carries the request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum BusType {
    #[display("session")]
    Session,
    #[display("system")]
    System,
}

/// Expected shape of the reply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyType {
    /// `(t)`: a sequence number
    Sequence,
    /// `(b)`
    Boolean,
    /// `()`
    Unit,
}

/// A decoded reply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Sequence(u64),
    Boolean(bool),
    Unit,
}

impl ReplyType {
    /// Decode a reply body, checking it has the expected shape
    pub fn decode(self, reply: &Value) -> Result<Reply> {
        let items = reply
            .as_array()
            .ok_or_else(|| Error::remote(format!("reply is not a tuple: {reply}")))?;

        match (self, items) {
            (Self::Sequence, [Value::Uint64(sequence)]) => Ok(Reply::Sequence(*sequence)),
            (Self::Boolean, [Value::Bool(b)]) => Ok(Reply::Boolean(*b)),
            (Self::Unit, []) => Ok(Reply::Unit),
            _ => Err(Error::remote(format!(
                "unexpected reply {reply}, expected {self:?}"
            ))),
        }
    }

    /// Build a reply body of this shape
    #[must_use]
    pub fn encode(reply: Reply) -> Value {
        match reply {
            Reply::Sequence(sequence) => Value::Array(vec![Value::Uint64(sequence)]),
            Reply::Boolean(b) => Value::Array(vec![Value::Bool(b)]),
            Reply::Unit => Value::Array(Vec::new()),
        }
    }
}

/// A method call for the write arbiter
#[derive(Clone, Debug, PartialEq)]
pub struct WriteMessage {
    pub bus: BusType,
    pub destination: String,
    pub object_path: String,
    pub interface: String,
    pub method: String,
    /// Argument tuple; `None` when there is nothing to send
    pub body: Option<Value>,
    pub reply_type: ReplyType,
}

impl WriteMessage {
    /// Whether the message is a no-op that needs no round trip
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.body.is_none()
    }
}

/// Encode a changeset description as a `Change` body
#[must_use]
pub fn change_body(description: &Description) -> Value {
    Value::Array(vec![
        Value::String(description.prefix.clone()),
        Value::Array(
            description
                .paths
                .iter()
                .map(|rel| Value::String(rel.clone()))
                .collect(),
        ),
        Value::Array(
            description
                .values
                .iter()
                .map(|value| Value::maybe(value.clone()))
                .collect(),
        ),
    ])
}

/// Decode a `Change` body into absolute paths and values
pub fn decode_change_body(body: &Value) -> Result<Vec<(String, Option<Value>)>> {
    let malformed = || Error::invalid_argument(format!("malformed change body: {body}"));

    let [prefix, paths, values] = body.as_array().ok_or_else(malformed)? else {
        return Err(malformed());
    };
    let prefix = prefix.as_str().ok_or_else(malformed)?;
    let paths = paths.as_array().ok_or_else(malformed)?;
    let values = values.as_array().ok_or_else(malformed)?;
    if paths.len() != values.len() {
        return Err(malformed());
    }

    paths
        .iter()
        .zip(values)
        .map(|(rel, value)| {
            let rel = rel.as_str().ok_or_else(malformed)?;
            let value = value.as_maybe().ok_or_else(malformed)?;
            Ok((format!("{prefix}{rel}"), value.cloned()))
        })
        .collect()
}

/// Encode a `SetLocked` body
#[must_use]
pub fn set_locked_body(path: &str, locked: bool) -> Value {
    Value::Array(vec![Value::from(path), Value::Bool(locked)])
}

/// Decode a `SetLocked` body
pub fn decode_set_locked_body(body: &Value) -> Result<(String, bool)> {
    match body.as_array() {
        Some([Value::String(path), Value::Bool(locked)]) => Ok((path.clone(), *locked)),
        _ => Err(Error::invalid_argument(format!(
            "malformed set-locked body: {body}"
        ))),
    }
}

/// Encode an `IsWritable` body
#[must_use]
pub fn is_writable_body(path: &str) -> Value {
    Value::Array(vec![Value::from(path)])
}

/// Decode an `IsWritable` body
pub fn decode_is_writable_body(body: &Value) -> Result<String> {
    match body.as_array() {
        Some([Value::String(path)]) => Ok(path.clone()),
        _ => Err(Error::invalid_argument(format!(
            "malformed is-writable body: {body}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confdb_common::Changeset;

    #[test]
    fn test_change_body_round_trip() {
        let mut cs = Changeset::new();
        cs.set("/app/window/width", Some(Value::Int64(800))).unwrap();
        cs.set("/app/window/height", None).unwrap();
        cs.set("/app/recent/", None).unwrap();

        let body = change_body(cs.describe().unwrap());
        let decoded = decode_change_body(&body).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("/app/recent/".to_string(), None),
                ("/app/window/height".to_string(), None),
                ("/app/window/width".to_string(), Some(Value::Int64(800))),
            ]
        );
    }

    #[test]
    fn test_decode_change_body_rejects_mismatched_lengths() {
        let body = Value::Array(vec![
            Value::from("/"),
            Value::Array(vec![Value::from("a"), Value::from("b")]),
            Value::Array(vec![Value::maybe(None)]),
        ]);
        assert!(decode_change_body(&body).is_err());
        assert!(decode_change_body(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_reply_decode() {
        let reply = ReplyType::encode(Reply::Sequence(9));
        assert_eq!(ReplyType::Sequence.decode(&reply), Ok(Reply::Sequence(9)));
        assert!(ReplyType::Boolean.decode(&reply).is_err());

        let reply = ReplyType::encode(Reply::Unit);
        assert_eq!(ReplyType::Unit.decode(&reply), Ok(Reply::Unit));

        let err = ReplyType::Sequence.decode(&Value::from("nope")).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_set_locked_body() {
        let body = set_locked_body("/org/app/", true);
        assert_eq!(
            decode_set_locked_body(&body).unwrap(),
            ("/org/app/".to_string(), true)
        );
        assert!(decode_set_locked_body(&is_writable_body("/x")).is_err());
        assert_eq!(decode_is_writable_body(&is_writable_body("/x")).unwrap(), "/x");
    }
}
