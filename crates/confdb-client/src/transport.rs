//! Transport abstraction
//!
//! The write arbiter lives in another process and is reached over a
//! request/reply message bus. The client only needs two things from it:
//! a connection to a given bus and a way to call a method on it. Both come
//! in an async flavour for the non-blocking pipeline and a blocking one for
//! simple callers.

use async_trait::async_trait;
use confdb_common::{Result, Value};
use confdb_engine::{BusType, WriteMessage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source of bus connections
///
/// Implementations report connection problems as
/// [`confdb_common::Error::TransportUnavailable`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get a connection to `bus`
    async fn connect(&self, bus: BusType) -> Result<Arc<dyn Connection>>;

    /// Get a connection to `bus`, blocking the calling thread
    ///
    /// Implementations that wait should give up with
    /// [`confdb_common::Error::Cancelled`] once `cancel` fires.
    fn connect_blocking(&self, bus: BusType, cancel: &CancellationToken) -> Result<Arc<dyn Connection>>;
}

/// A connection able to deliver method calls
///
/// Implementations report errors returned by the remote side as
/// [`confdb_common::Error::RemoteFailure`] and must not retry.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Call the method described by `message` and return the reply body
    ///
    /// `cancel` may fire at any time; implementations should abandon the
    /// call when it does.
    async fn call(&self, message: &WriteMessage, cancel: &CancellationToken) -> Result<Value>;

    /// Call the method described by `message`, blocking the calling thread
    ///
    /// `cancel` is honoured the same way as in [`Connection::call`].
    fn call_blocking(&self, message: &WriteMessage, cancel: &CancellationToken) -> Result<Value>;
}
