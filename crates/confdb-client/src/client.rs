//! Application-facing client
//!
//! Reads are served locally by the engine. Writes are validated by the
//! engine and then sent to the arbiter, either blocking the caller or as a
//! spawned [`AsyncOperation`].

use crate::operation::{self, AsyncOperation, OpResult, WriteHandle};
use crate::transport::Transport;
use confdb_common::config::Config;
use confdb_common::{Changeset, Error, Result, Value};
use confdb_engine::{Engine, ReadMode, Reply, WriteMessage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration client for one profile
pub struct Client {
    engine: Engine,
    transport: Arc<dyn Transport>,
}

impl Client {
    #[must_use]
    pub fn new(engine: Engine, transport: Arc<dyn Transport>) -> Self {
        Self { engine, transport }
    }

    /// Open the profile in `config` and send writes over `transport`
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self::new(Engine::from_config(config)?, transport))
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The effective value of `key`
    #[must_use]
    pub fn read(&self, key: &str) -> Option<Value> {
        self.engine.read(key, ReadMode::Normal)
    }

    /// The value `key` would have after a reset
    #[must_use]
    pub fn read_default(&self, key: &str) -> Option<Value> {
        self.engine.read(key, ReadMode::ResetView)
    }

    /// The value stored in the writable layer, ignoring locks and defaults
    #[must_use]
    pub fn read_no_default(&self, key: &str) -> Option<Value> {
        self.engine.read(key, ReadMode::UserOnly)
    }

    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.engine.list(dir)
    }

    /// Whether `path` may be written
    ///
    /// A path the local stack already refuses is answered without a round
    /// trip; otherwise the arbiter has the final word.
    pub fn is_writable(&self, path: &str, cancel: &CancellationToken) -> Result<bool> {
        if !self.engine.is_writable(path)? {
            return Ok(false);
        }
        let message = self.engine.is_writable_message(path)?;
        match self.call_sync(&message, cancel)? {
            Some(Reply::Boolean(writable)) => Ok(writable),
            other => Err(Error::remote(format!("expected a boolean, got {other:?}"))),
        }
    }

    /// Write or reset `path`, blocking until the arbiter replies
    ///
    /// Returns the change's sequence number, or `None` if there was nothing
    /// to change. Another thread may fire `cancel` to abandon the wait.
    pub fn write(&self, path: &str, value: Option<Value>, cancel: &CancellationToken) -> Result<Option<u64>> {
        let message = self.engine.write(path, value)?;
        operation::into_sequence(self.call_sync(&message, cancel))
    }

    /// Atomically write several paths below `prefix`
    pub fn write_many<S: AsRef<str>>(
        &self,
        prefix: &str,
        rels: &[S],
        values: Vec<Option<Value>>,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>> {
        let message = self.engine.write_many(prefix, rels, values)?;
        operation::into_sequence(self.call_sync(&message, cancel))
    }

    /// Apply `changeset`, sealing it
    pub fn change(&self, changeset: &Changeset, cancel: &CancellationToken) -> Result<Option<u64>> {
        let message = self.engine.change(changeset)?;
        operation::into_sequence(self.call_sync(&message, cancel))
    }

    /// Lock or unlock `path` in the most authoritative system layer
    pub fn set_locked(&self, path: &str, locked: bool, cancel: &CancellationToken) -> Result<()> {
        let message = self.engine.set_locked(path, locked)?;
        match self.call_sync(&message, cancel)? {
            Some(Reply::Unit) => Ok(()),
            other => Err(Error::remote(format!("expected an empty reply, got {other:?}"))),
        }
    }

    /// Write or reset `path` without blocking
    ///
    /// Validation errors are delivered through the handle like any other
    /// failure. Must be called within a tokio runtime.
    pub fn write_async(
        &self,
        path: &str,
        value: Option<Value>,
        cancel: CancellationToken,
    ) -> WriteHandle {
        self.spawn(self.engine.write(path, value), cancel)
    }

    pub fn write_many_async<S: AsRef<str>>(
        &self,
        prefix: &str,
        rels: &[S],
        values: Vec<Option<Value>>,
        cancel: CancellationToken,
    ) -> WriteHandle {
        self.spawn(self.engine.write_many(prefix, rels, values), cancel)
    }

    pub fn change_async(&self, changeset: &Changeset, cancel: CancellationToken) -> WriteHandle {
        self.spawn(self.engine.change(changeset), cancel)
    }

    /// Write or reset `path` and hand the result to `callback`
    ///
    /// `callback` runs exactly once, on the spawned task or immediately if
    /// the write fails validation.
    pub fn write_with_callback<F>(
        &self,
        path: &str,
        value: Option<Value>,
        cancel: CancellationToken,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Option<u64>>) + Send + 'static,
    {
        let op = AsyncOperation::new(self.engine.write(path, value), cancel, move |result| {
            callback(operation::into_sequence(result));
        });
        tokio::spawn(op.run(Arc::clone(&self.transport)))
    }

    fn spawn(&self, message: Result<WriteMessage>, cancel: CancellationToken) -> WriteHandle {
        if let Err(e) = &message {
            debug!("Async write rejected: {}", e);
        }
        AsyncOperation::spawn(message, cancel, Arc::clone(&self.transport))
    }

    /// Acquire a connection, dispatch and decode, without suspending
    fn call_sync(&self, message: &WriteMessage, cancel: &CancellationToken) -> OpResult {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let connection = self.transport.connect_blocking(message.bus, cancel)?;
        if message.is_noop() {
            debug!("{} on {} has nothing to send", message.method, message.object_path);
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let reply = connection.call_blocking(message, cancel).inspect_err(|e| {
            warn!("{} on {} failed: {}", message.method, message.object_path, e);
        })?;
        message.reply_type.decode(&reply).map(Some)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockTransport};
    use confdb_common::config::WriterConfig;
    use confdb_engine::{LayerKind, ReplyType, Source, SourceStack, TableFile, message};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    fn client(mock: &Arc<MockTransport>, locks: &[&str]) -> (TempDir, Client) {
        let dir = tempdir().unwrap();

        let mut site = TableFile::new();
        site.values.insert("/k".into(), Value::from("sys"));
        site.locks.extend(locks.iter().map(|lock| (*lock).to_string()));
        site.write(&dir.path().join("site")).unwrap();

        let mut user = TableFile::new();
        user.values.insert("/k".into(), Value::from("usr"));
        user.write(&dir.path().join("user")).unwrap();

        let stack = SourceStack::new(vec![
            Source::new(LayerKind::System, "site", dir.path().join("site")),
            Source::new(LayerKind::User, "user", dir.path().join("user")),
        ])
        .unwrap();
        let engine = Engine::new(stack, WriterConfig::default());
        (dir, Client::new(engine, mock::transport(mock)))
    }

    #[test]
    fn test_reads() {
        let mock = MockTransport::sequence(1);
        let (_dir, client) = client(&mock, &[]);

        assert_eq!(client.read("/k"), Some(Value::from("usr")));
        assert_eq!(client.read_default("/k"), Some(Value::from("sys")));
        assert_eq!(client.read_no_default("/k"), Some(Value::from("usr")));
        assert_eq!(client.read("/missing"), None);
        assert_eq!(client.list("/").unwrap(), vec!["k"]);
    }

    #[test]
    fn test_sync_write() {
        let mock = MockTransport::sequence(12);
        let (_dir, client) = client(&mock, &[]);

        assert_eq!(client.write("/new", Some(Value::Int64(1)), &CancellationToken::new()), Ok(Some(12)));
        assert_eq!(mock.calls(), 1);

        let sent = mock.messages.lock()[0].clone();
        assert_eq!(sent.method, message::method::CHANGE);
        let changes = message::decode_change_body(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(changes, vec![("/new".to_string(), Some(Value::Int64(1)))]);
    }

    #[test]
    fn test_sync_noop_reset() {
        let mock = MockTransport::sequence(12);
        let (_dir, client) = client(&mock, &[]);

        assert_eq!(client.write("/unset", None, &CancellationToken::new()), Ok(None));
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_locked_write_never_reaches_transport() {
        let mock = MockTransport::sequence(1);
        let (_dir, client) = client(&mock, &["/k"]);

        assert!(matches!(
            client.write("/k", Some(Value::from("x")), &CancellationToken::new()),
            Err(Error::NotWritable(_))
        ));
        assert!(!client.is_writable("/k", &CancellationToken::new()).unwrap());
        assert_eq!(mock.connects(), 0);
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_is_writable_asks_arbiter() {
        let mock = MockTransport::replying(Ok(ReplyType::encode(Reply::Boolean(false))));
        let (_dir, client) = client(&mock, &[]);

        assert!(!client.is_writable("/k", &CancellationToken::new()).unwrap());
        assert_eq!(mock.calls(), 1);
        assert!(client.is_writable("k", &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_set_locked() {
        let mock = MockTransport::replying(Ok(ReplyType::encode(Reply::Unit)));
        let (_dir, client) = client(&mock, &[]);

        client.set_locked("/org/", true, &CancellationToken::new()).unwrap();
        let sent = mock.messages.lock()[0].clone();
        assert_eq!(sent.object_path, "/org/confdb/Writer/site");
        assert_eq!(
            message::decode_set_locked_body(sent.body.as_ref().unwrap()).unwrap(),
            ("/org/".to_string(), true)
        );
    }

    #[test]
    fn test_remote_error_surfaces_verbatim() {
        let mock = MockTransport::replying(Err(Error::remote("permission denied")));
        let (_dir, client) = client(&mock, &[]);

        assert_eq!(
            client.write("/k", Some(Value::Int64(1)), &CancellationToken::new()),
            Err(Error::RemoteFailure("permission denied".into()))
        );
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_sync_write_cancelled_before_dispatch() {
        let mock = MockTransport::sequence(12);
        let (_dir, client) = client(&mock, &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(client.write("/new", Some(Value::Int64(1)), &cancel), Err(Error::Cancelled));
        assert_eq!(mock.connects(), 0);
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_sync_write_cancelled_while_waiting() {
        for (connect, call) in [(true, false), (false, true)] {
            let mock = MockTransport::hanging(connect, call);
            let (_dir, client) = client(&mock, &[]);
            let cancel = CancellationToken::new();

            let canceller = {
                let cancel = cancel.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    cancel.cancel();
                })
            };
            assert_eq!(client.write("/new", Some(Value::Int64(1)), &cancel), Err(Error::Cancelled));
            canceller.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_write_async() {
        let mock = MockTransport::sequence(5);
        let (_dir, client) = client(&mock, &[]);

        let handle = client.write_async("/k", Some(Value::Int64(2)), CancellationToken::new());
        assert_eq!(handle.await, Ok(Some(5)));

        let handle = client.write_many_async(
            "/app/",
            &["a", "b"],
            vec![Some(Value::Int64(1)), None],
            CancellationToken::new(),
        );
        assert_eq!(handle.await, Ok(Some(5)));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_write_async_locked() {
        let mock = MockTransport::sequence(5);
        let (_dir, client) = client(&mock, &["/"]);

        let handle = client.write_async("/k", Some(Value::Int64(2)), CancellationToken::new());
        assert!(matches!(handle.await, Err(Error::NotWritable(_))));
        assert_eq!(mock.connects(), 0);
    }

    #[tokio::test]
    async fn test_change_async_seals() {
        let mock = MockTransport::sequence(8);
        let (_dir, client) = client(&mock, &[]);

        let mut changeset = Changeset::new();
        changeset.set("/a/b", Some(Value::Bool(true))).unwrap();
        let handle = client.change_async(&changeset, CancellationToken::new());
        assert_eq!(handle.await, Ok(Some(8)));
        assert!(changeset.is_sealed());
    }

    #[tokio::test]
    async fn test_write_with_callback_fires_once() {
        let mock = MockTransport::sequence(3);
        let (_dir, client) = client(&mock, &[]);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        client
            .write_with_callback("/k", Some(Value::Int64(1)), CancellationToken::new(), move |result| {
                assert_eq!(result, Ok(Some(3)));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&fired);
        client
            .write_with_callback("bad", None, CancellationToken::new(), move |result| {
                assert!(result.is_err_and(|e| e.is_validation()));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
