//! Error types for confdb
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for confdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for confdb
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Validation errors
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("changeset has already been described and can no longer be modified")]
    ChangesetSealed,

    // Layer errors
    #[error("path is not writable: {0}")]
    NotWritable(String),

    #[error("layer unavailable: {0}")]
    LayerUnavailable(String),

    // Transport errors
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("remote failure: {0}")]
    RemoteFailure(String),

    #[error("operation was cancelled")]
    Cancelled,

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a remote failure error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteFailure(msg.into())
    }

    /// Create a transport unavailable error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    /// Check if the operation was cancelled by the caller
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error was raised locally, before any transport interaction
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. }
                | Self::InvalidArgument(_)
                | Self::ChangesetSealed
                | Self::NotWritable(_)
        )
    }

    /// Check if this error came from the transport or the remote arbiter
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_) | Self::RemoteFailure(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}
