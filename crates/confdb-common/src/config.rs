//! Configuration types for confdb
//!
//! This module defines the configuration shared by the engine, the writer
//! and the command-line tool. Values come from defaults, an optional TOML
//! file and `CONFDB_*` environment variables, in increasing priority.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for confdb
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Layer descriptors, highest priority first; the writable layer last
    ///
    /// Each entry is `system-db:NAME` or `user-db:NAME`.
    pub profile: Vec<String>,
    /// Directory holding user database files
    pub user_dir: PathBuf,
    /// Directory holding system database files
    pub system_dir: PathBuf,
    /// Addressing of the write arbiter
    pub writer: WriterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: vec!["system-db:site".to_string(), "user-db:user".to_string()],
            user_dir: PathBuf::from("/var/lib/confdb/user"),
            system_dir: PathBuf::from("/etc/confdb/db"),
            writer: WriterConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus the environment
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("CONFDB")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("profile")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Addressing of the remote write arbiter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Bus name of the arbiter
    pub destination: String,
    /// Interface implementing the write methods
    pub interface: String,
    /// Object path prefix; the layer name is appended
    pub object_path_base: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            destination: "org.confdb.Writer".to_string(),
            interface: "org.confdb.Writer".to_string(),
            object_path_base: "/org/confdb/Writer".to_string(),
        }
    }
}

impl WriterConfig {
    /// Object path serving the layer `name`
    #[must_use]
    pub fn object_path(&self, name: &str) -> String {
        format!("{}/{name}", self.object_path_base)
    }
}
