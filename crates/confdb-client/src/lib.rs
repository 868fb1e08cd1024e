//! confdb Client - Application-facing handle and write pipeline
//!
//! This crate connects the engine to a message bus: [`Client`] forwards
//! reads to the engine and sends the write messages it builds, either
//! blocking or through an [`AsyncOperation`].

pub mod client;
pub mod operation;
pub mod transport;

#[cfg(test)]
mod mock;

// Re-exports
pub use client::Client;
pub use operation::{AsyncOperation, OpResult, OpState, WriteHandle};
pub use transport::{Connection, Transport};
pub use tokio_util::sync::CancellationToken;
