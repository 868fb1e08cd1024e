//! confdb Engine - Layered configuration reads and write message construction
//!
//! This crate owns the source stack (one [`Source`] per configured layer),
//! arbitrates reads across it and turns validated mutations into
//! [`WriteMessage`]s for the transport.

pub mod engine;
pub mod message;
pub mod source;
pub mod stack;
pub mod table;

// Re-exports
pub use engine::Engine;
pub use message::{BusType, Reply, ReplyType, WriteMessage};
pub use source::{LayerKind, Source};
pub use stack::{ReadMode, SourceStack, StackView};
pub use table::{Fingerprint, LayerTables, TableError, TableFile};
