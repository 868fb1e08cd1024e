//! Writer error types

use confdb_engine::TableError;
use thiserror::Error;

/// Failures while serving a request
///
/// Every variant reaches the caller as a remote failure.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("lock file {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    Invalid(#[from] confdb_common::Error),

    #[error("no such destination: {0}")]
    UnknownDestination(String),

    #[error("no such object: {0}")]
    UnknownObject(String),

    #[error("unknown method {interface}.{method}")]
    UnknownMethod { interface: String, method: String },

    #[error("rejected: {0}")]
    Rejected(String),
}

pub type WriterResult<T> = Result<T, WriterError>;

impl From<WriterError> for confdb_common::Error {
    fn from(e: WriterError) -> Self {
        Self::remote(e.to_string())
    }
}
