//! confdb Common - Shared types and utilities
//!
//! This crate provides the value model, path syntax, changesets, error
//! definitions and configuration used across all confdb components.

pub mod changeset;
pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use changeset::{Changeset, Description};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
