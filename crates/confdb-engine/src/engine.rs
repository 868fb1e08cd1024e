//! The configuration engine
//!
//! Reads go straight to the source stack. Writes are validated locally
//! (path syntax, locks, a usable writable layer) and turned into a
//! [`WriteMessage`]; nothing here touches the transport, so the blocking
//! and async write paths share exactly the same checks.

use crate::message::{self, BusType, ReplyType, WriteMessage};
use crate::source::Source;
use crate::stack::{self, ReadMode, SourceStack};
use confdb_common::config::{Config, WriterConfig};
use confdb_common::path;
use confdb_common::{Changeset, Error, Result, Value};
use tracing::debug;

/// Layered configuration engine for one profile
#[derive(Debug)]
pub struct Engine {
    stack: SourceStack,
    writer: WriterConfig,
}

impl Engine {
    /// Create an engine over an opened source stack
    #[must_use]
    pub const fn new(stack: SourceStack, writer: WriterConfig) -> Self {
        Self { stack, writer }
    }

    /// Create an engine for the profile in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let stack = SourceStack::from_config(config)?;
        Ok(Self::new(stack, config.writer.clone()))
    }

    #[must_use]
    pub const fn stack(&self) -> &SourceStack {
        &self.stack
    }

    /// Read `key` in the given view
    ///
    /// Absence is a normal outcome: unset keys, malformed keys and layers
    /// that failed to open all read as `None`.
    #[must_use]
    pub fn read(&self, key: &str, mode: ReadMode) -> Option<Value> {
        let key = stack::checked_key(key)?;
        self.stack.refresh();
        self.stack.lookup(key, mode)
    }

    /// Immediate children of `dir` across all layers
    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        path::validate_dir(dir)?;
        self.stack.refresh();
        Ok(self.stack.list(dir))
    }

    /// Check locally whether `path` may be written
    ///
    /// True iff the profile has a writable layer and no read-only layer
    /// locks `path` or one of its dirs.
    pub fn is_writable(&self, path: &str) -> Result<bool> {
        path::validate_path(path)?;
        self.stack.refresh();
        Ok(self.stack.writable().is_some() && self.stack.locked_by(path).is_none())
    }

    /// Message asking the arbiter to confirm that `path` is writable
    pub fn is_writable_message(&self, path: &str) -> Result<WriteMessage> {
        path::validate_path(path)?;
        let writable = self.writable_source()?;
        Ok(self.message(
            writable,
            message::method::IS_WRITABLE,
            Some(message::is_writable_body(path)),
            ReplyType::Boolean,
        ))
    }

    /// Build the message writing `value` to `path`, or resetting it
    ///
    /// `path` must be a key, or a dir when `value` is `None`.
    pub fn write(&self, path: &str, value: Option<Value>) -> Result<WriteMessage> {
        let changeset = Changeset::new_write(path, value)?;
        self.change(&changeset)
    }

    /// Build one atomic message writing several keys below `prefix`
    ///
    /// `prefix` must be a dir and every relative path must stay inside it.
    pub fn write_many<S: AsRef<str>>(
        &self,
        prefix: &str,
        rels: &[S],
        values: Vec<Option<Value>>,
    ) -> Result<WriteMessage> {
        path::validate_dir(prefix)?;
        if rels.len() != values.len() {
            return Err(Error::invalid_argument(format!(
                "{} relative paths but {} values",
                rels.len(),
                values.len()
            )));
        }

        let mut changeset = Changeset::new();
        for (rel, value) in rels.iter().zip(values) {
            let rel = rel.as_ref();
            path::validate_rel_path(rel)?;
            changeset.set(&format!("{prefix}{rel}"), value)?;
        }
        self.change(&changeset)
    }

    /// Build the message applying `changeset`
    ///
    /// Seals the changeset. A changeset that only resets things the
    /// writable layer does not hold produces a message without a body.
    pub fn change(&self, changeset: &Changeset) -> Result<WriteMessage> {
        let writable = self.writable_source()?;
        self.stack.refresh();
        let view = self.stack.view();

        for (path, _) in changeset.iter() {
            if let Some(source) = view.locked_by(path) {
                return Err(Error::NotWritable(format!(
                    "{path} is locked by {} '{}'",
                    source.kind(),
                    source.name()
                )));
            }
        }

        let tables = view.writable().ok_or_else(|| {
            Error::LayerUnavailable(format!(
                "{} '{}' could not be opened",
                writable.kind(),
                writable.name()
            ))
        })?;

        let noop = changeset.all(|path, value| value.is_none() && !tables.contains(path));
        let body = if noop {
            debug!("Change of {} entries has no effect", changeset.len());
            None
        } else {
            changeset.describe().map(message::change_body)
        };

        Ok(self.message(writable, message::method::CHANGE, body, ReplyType::Sequence))
    }

    /// Build the administrative message locking or unlocking `path`
    ///
    /// Locks live in the most authoritative system layer.
    pub fn set_locked(&self, path: &str, locked: bool) -> Result<WriteMessage> {
        path::validate_path(path)?;
        let target = self
            .stack
            .read_only()
            .first()
            .ok_or_else(|| Error::NotWritable("profile has no system layer to hold locks".into()))?;

        Ok(self.message(
            target,
            message::method::SET_LOCKED,
            Some(message::set_locked_body(path, locked)),
            ReplyType::Unit,
        ))
    }

    fn writable_source(&self) -> Result<&Source> {
        self.stack
            .writable()
            .ok_or_else(|| Error::NotWritable("profile has no writable layer".into()))
    }

    fn message(
        &self,
        source: &Source,
        method: &str,
        body: Option<Value>,
        reply_type: ReplyType,
    ) -> WriteMessage {
        let bus: BusType = source.kind().bus();
        WriteMessage {
            bus,
            destination: self.writer.destination.clone(),
            object_path: self.writer.object_path(source.name()),
            interface: self.writer.interface.clone(),
            method: method.to_string(),
            body,
            reply_type,
        }
    }
}
