//! Async write operations
//!
//! An [`AsyncOperation`] carries one write message through
//! `Created -> AcquiringTransport -> Dispatching -> Completed`. Whatever
//! path reaches `Completed` (validation failure, cancellation, a reply or
//! a transport error) the notifier fires exactly once. Dropping an
//! operation that never completed reports it as cancelled.

use crate::transport::Transport;
use confdb_common::{Error, Result};
use confdb_engine::{Reply, WriteMessage};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of an operation; `Ok(None)` for a no-op that was never sent
pub type OpResult = Result<Option<Reply>>;

type Notifier = Box<dyn FnOnce(OpResult) + Send>;

/// Lifecycle of an [`AsyncOperation`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum OpState {
    Created,
    AcquiringTransport,
    Dispatching,
    Completed,
}

/// One write travelling to the arbiter
pub struct AsyncOperation {
    message: Option<WriteMessage>,
    cancel: CancellationToken,
    state: OpState,
    notifier: Option<Notifier>,
}

impl AsyncOperation {
    /// Record `message` and the token that cancels it
    ///
    /// If building the message already failed, the operation completes
    /// here and `notifier` receives the error before this returns.
    pub fn new<F>(message: Result<WriteMessage>, cancel: CancellationToken, notifier: F) -> Self
    where
        F: FnOnce(OpResult) + Send + 'static,
    {
        let mut op = Self {
            message: None,
            cancel,
            state: OpState::Created,
            notifier: Some(Box::new(notifier)),
        };
        match message {
            Ok(message) => op.message = Some(message),
            Err(e) => op.complete(Err(e)),
        }
        op
    }

    /// Create an operation whose result is delivered on a channel
    pub fn with_channel(
        message: Result<WriteMessage>,
        cancel: CancellationToken,
    ) -> (Self, oneshot::Receiver<OpResult>) {
        let (tx, rx) = oneshot::channel();
        let op = Self::new(message, cancel, move |result| {
            // The receiver may be gone; nobody is waiting then
            let _ = tx.send(result);
        });
        (op, rx)
    }

    /// Run `message` on a new task and return a handle to its result
    pub fn spawn(
        message: Result<WriteMessage>,
        cancel: CancellationToken,
        transport: Arc<dyn Transport>,
    ) -> WriteHandle {
        let (op, receiver) = Self::with_channel(message, cancel.clone());
        tokio::spawn(op.run(transport));
        WriteHandle { receiver, cancel }
    }

    #[must_use]
    pub const fn state(&self) -> OpState {
        self.state
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.state, OpState::Completed)
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive the operation to completion
    pub async fn run(mut self, transport: Arc<dyn Transport>) {
        if self.is_completed() {
            return;
        }
        let result = self.execute(transport.as_ref()).await;
        self.complete(result);
    }

    async fn execute(&mut self, transport: &dyn Transport) -> OpResult {
        let cancel = self.cancel.clone();
        let Some(message) = self.message.take() else {
            return Err(Error::invalid_argument("operation has no message"));
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.transition(OpState::AcquiringTransport);
        let connection = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            connection = transport.connect(message.bus) => connection?,
        };

        if message.is_noop() {
            debug!("{} on {} has nothing to send", message.method, message.object_path);
            return Ok(None);
        }

        self.transition(OpState::Dispatching);
        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            reply = connection.call(&message, &cancel) => reply?,
        };

        message.reply_type.decode(&reply).map(Some)
    }

    fn transition(&mut self, state: OpState) {
        debug!("Operation {} -> {}", self.state, state);
        self.state = state;
    }

    fn complete(&mut self, result: OpResult) {
        self.transition(OpState::Completed);
        if let Some(notify) = self.notifier.take() {
            notify(result);
        }
    }
}

impl Drop for AsyncOperation {
    fn drop(&mut self) {
        if self.notifier.is_some() {
            self.complete(Err(Error::Cancelled));
        }
    }
}

impl fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("message", &self.message)
            .field("state", &self.state)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Turn an operation result into the sequence number of a change
///
/// A no-op change has no sequence number.
pub fn into_sequence(result: OpResult) -> Result<Option<u64>> {
    match result? {
        None => Ok(None),
        Some(Reply::Sequence(sequence)) => Ok(Some(sequence)),
        Some(other) => Err(Error::remote(format!("expected a sequence number, got {other:?}"))),
    }
}

/// Pending result of a spawned write
///
/// Resolves to the change's sequence number, or `None` for a no-op.
#[derive(Debug)]
pub struct WriteHandle {
    receiver: oneshot::Receiver<OpResult>,
    cancel: CancellationToken,
}

impl WriteHandle {
    /// Ask the operation to stop; it still completes, with `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Future for WriteHandle {
    type Output = Result<Option<u64>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| into_sequence(received.unwrap_or(Err(Error::Cancelled))))
    }
}
