//! Scriptable transport for tests

use crate::transport::{Connection, Transport};
use async_trait::async_trait;
use confdb_common::{Error, Result, Value};
use confdb_engine::{BusType, Reply, ReplyType, WriteMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub(crate) struct MockTransport {
    pub connects: AtomicUsize,
    pub calls: AtomicUsize,
    pub connect_error: Mutex<Option<Error>>,
    pub reply: Mutex<Result<Value>>,
    /// Connecting never finishes
    pub hang_connect: bool,
    /// Calls never finish unless cancelled
    pub hang_call: bool,
    /// Signalled when a call starts
    pub call_started: Notify,
    pub messages: Mutex<Vec<WriteMessage>>,
}

impl MockTransport {
    pub fn replying(reply: Result<Value>) -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            connect_error: Mutex::new(None),
            reply: Mutex::new(reply),
            hang_connect: false,
            hang_call: false,
            call_started: Notify::new(),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn sequence(sequence: u64) -> Arc<Self> {
        Self::replying(Ok(ReplyType::encode(Reply::Sequence(sequence))))
    }

    pub fn hanging(connect: bool, call: bool) -> Arc<Self> {
        let mut transport = Self::sequence(1);
        let inner = Arc::get_mut(&mut transport).expect("fresh transport");
        inner.hang_connect = connect;
        inner.hang_call = call;
        transport
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn connection(self: &Arc<Self>) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.connect_error.lock().clone() {
            return Err(e);
        }
        Ok(Arc::new(MockConnection(Arc::clone(self))))
    }
}

/// Wrapper so `Arc<MockTransport>` can be used as `Arc<dyn Transport>`
pub(crate) struct SharedMock(pub Arc<MockTransport>);

#[async_trait]
impl Transport for SharedMock {
    async fn connect(&self, _bus: BusType) -> Result<Arc<dyn Connection>> {
        if self.0.hang_connect {
            std::future::pending::<()>().await;
        }
        self.0.connection()
    }

    fn connect_blocking(&self, _bus: BusType, cancel: &CancellationToken) -> Result<Arc<dyn Connection>> {
        if self.0.hang_connect {
            wait_blocking(cancel);
            return Err(Error::Cancelled);
        }
        self.0.connection()
    }
}

struct MockConnection(Arc<MockTransport>);

impl MockConnection {
    fn reply(&self, message: &WriteMessage) -> Result<Value> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        self.0.messages.lock().push(message.clone());
        self.0.reply.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn call(&self, message: &WriteMessage, cancel: &CancellationToken) -> Result<Value> {
        let reply = self.reply(message);
        self.0.call_started.notify_one();
        if self.0.hang_call {
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }
        reply
    }

    fn call_blocking(&self, message: &WriteMessage, cancel: &CancellationToken) -> Result<Value> {
        let reply = self.reply(message);
        if self.0.hang_call {
            wait_blocking(cancel);
            return Err(Error::Cancelled);
        }
        reply
    }
}

/// Park the calling thread until `cancel` fires
fn wait_blocking(cancel: &CancellationToken) {
    while !cancel.is_cancelled() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

pub(crate) fn transport(mock: &Arc<MockTransport>) -> Arc<dyn Transport> {
    Arc::new(SharedMock(Arc::clone(mock)))
}
