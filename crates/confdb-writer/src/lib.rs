//! confdb Writer - Write arbiter and in-process bus
//!
//! The [`Writer`] applies change messages to the user databases, keeps the
//! lock tables of the system databases and numbers every change.
//! [`LocalBus`] exposes it through the client transport traits.

pub mod bus;
pub mod database;
pub mod error;
pub mod lock;
pub mod writer;

// Re-exports
pub use bus::LocalBus;
pub use database::Database;
pub use error::{WriterError, WriterResult};
pub use lock::DirLock;
pub use writer::Writer;
