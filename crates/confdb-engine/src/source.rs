//! Database sources
//!
//! A [`Source`] is one layer of the profile. It owns the value and lock
//! tables read from its table file and knows how to notice that the file
//! was replaced. The tables are held as one `Arc<LayerTables>` so a reopen
//! swaps values and locks together; readers clone the `Arc` and keep a
//! consistent pair even while a reopen happens.

use crate::message::BusType;
use crate::table::{Fingerprint, LayerTables, TableFile};
use confdb_common::config::Config;
use confdb_common::{Error, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of layer, deciding how its tables are obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum LayerKind {
    /// Read-only system database; must exist to contribute anything
    #[display("system-db")]
    System,
    /// Per-user database; the writable layer. A missing file reads as empty.
    #[display("user-db")]
    User,
}

impl LayerKind {
    /// Bus on which the arbiter for this kind of layer is reached
    #[must_use]
    pub const fn bus(self) -> BusType {
        match self {
            Self::System => BusType::System,
            Self::User => BusType::Session,
        }
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::User)
    }

    fn open(self, path: &Path) -> Result<(LayerTables, Option<Fingerprint>)> {
        match TableFile::read(path) {
            Ok((table, fingerprint)) => Ok((table.into_tables(), Some(fingerprint))),
            Err(e) if e.is_not_found() && self == Self::User => {
                Ok((LayerTables::default(), None))
            }
            Err(e) => Err(Error::LayerUnavailable(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct SourceState {
    tables: Option<Arc<LayerTables>>,
    fingerprint: Option<Fingerprint>,
    opened: bool,
}

/// One layer of the source stack
#[derive(Debug)]
pub struct Source {
    kind: LayerKind,
    name: String,
    path: PathBuf,
    state: RwLock<SourceState>,
}

impl Source {
    /// Create a source backed by the table file at `path`
    ///
    /// The source holds no tables until [`Source::init`] succeeds.
    pub fn new(kind: LayerKind, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: path.into(),
            state: RwLock::new(SourceState::default()),
        }
    }

    /// Create a source from a profile line such as `user-db:user`
    ///
    /// Only the first letter of the kind is significant (`s` or `u`), as in
    /// `system-db:site` or `u:alice`.
    pub fn from_descriptor(descriptor: &str, config: &Config) -> Result<Self> {
        let descriptor = descriptor.trim();
        let (kind, name) = descriptor.split_once(':').ok_or_else(|| {
            Error::Configuration(format!("layer descriptor without a name: {descriptor}"))
        })?;

        let kind = match kind.chars().next() {
            Some('s') => LayerKind::System,
            Some('u') => LayerKind::User,
            _ => {
                return Err(Error::Configuration(format!(
                    "unknown database description: {descriptor}"
                )));
            }
        };
        if name.is_empty() || name.contains('/') {
            return Err(Error::Configuration(format!(
                "invalid database name in: {descriptor}"
            )));
        }

        let dir = match kind {
            LayerKind::System => &config.system_dir,
            LayerKind::User => &config.user_dir,
        };
        Ok(Self::new(kind, name, dir.join(name)))
    }

    #[must_use]
    pub const fn kind(&self) -> LayerKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.kind.is_writable()
    }

    /// Open the backing tables for the first time
    ///
    /// On failure the source stays absent; it will be retried once its
    /// file changes.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.write();
        state.opened = true;
        match self.kind.open(&self.path) {
            Ok((tables, fingerprint)) => {
                state.tables = Some(Arc::new(tables));
                state.fingerprint = fingerprint;
                debug!("Opened {} '{}'", self.kind, self.name);
                Ok(())
            }
            Err(e) => {
                state.tables = None;
                state.fingerprint = Fingerprint::of(&self.path);
                Err(e)
            }
        }
    }

    /// Check whether the table file was replaced since it was last opened
    #[must_use]
    pub fn needs_reopen(&self) -> bool {
        let state = self.state.read();
        !state.opened || state.fingerprint != Fingerprint::of(&self.path)
    }

    /// Reopen the tables if the backing file changed
    ///
    /// Returns whether a reopen happened. A failed reopen leaves the source
    /// absent rather than keeping half-updated tables.
    pub fn refresh(&self) -> bool {
        if !self.needs_reopen() {
            return false;
        }

        let mut state = self.state.write();
        state.tables = None;
        match self.kind.open(&self.path) {
            Ok((tables, fingerprint)) => {
                state.tables = Some(Arc::new(tables));
                state.fingerprint = fingerprint;
                debug!("Reopened {} '{}'", self.kind, self.name);
            }
            Err(e) => {
                state.fingerprint = Fingerprint::of(&self.path);
                warn!("Failed to reopen {} '{}': {}", self.kind, self.name, e);
            }
        }
        state.opened = true;
        true
    }

    /// Release the tables
    pub fn finalize(&self) {
        let mut state = self.state.write();
        state.tables = None;
        state.fingerprint = None;
        state.opened = false;
    }

    /// Current tables, or `None` if the layer is absent
    #[must_use]
    pub fn tables(&self) -> Option<Arc<LayerTables>> {
        self.state.read().tables.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confdb_common::Value;
    use tempfile::tempdir;

    fn write_table(path: &Path, entries: &[(&str, Value)], locks: &[&str]) {
        let mut table = TableFile::new();
        for (key, value) in entries {
            table.values.insert((*key).to_string(), value.clone());
        }
        for lock in locks {
            table.locks.insert((*lock).to_string());
        }
        table.write(path).unwrap();
    }

    #[test]
    fn test_from_descriptor() {
        let config = Config::default();

        let source = Source::from_descriptor("system-db:site", &config).unwrap();
        assert_eq!(source.kind(), LayerKind::System);
        assert_eq!(source.name(), "site");
        assert_eq!(source.path(), config.system_dir.join("site"));

        let source = Source::from_descriptor("u:alice", &config).unwrap();
        assert_eq!(source.kind(), LayerKind::User);
        assert!(source.is_writable());

        assert!(Source::from_descriptor("file-db:x", &config).is_err());
        assert!(Source::from_descriptor("user-db", &config).is_err());
        assert!(Source::from_descriptor("user-db:", &config).is_err());
    }

    #[test]
    fn test_user_source_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let source = Source::new(LayerKind::User, "user", dir.path().join("user"));

        source.init().unwrap();
        let tables = source.tables().unwrap();
        assert!(tables.is_empty());
        assert!(!source.needs_reopen());
    }

    #[test]
    fn test_system_source_missing_file_is_absent() {
        let dir = tempdir().unwrap();
        let source = Source::new(LayerKind::System, "site", dir.path().join("site"));

        assert!(matches!(source.init(), Err(Error::LayerUnavailable(_))));
        assert!(source.tables().is_none());
        assert!(!source.needs_reopen());

        // Appears later
        write_table(source.path(), &[("/k", Value::from("sys"))], &[]);
        assert!(source.needs_reopen());
        assert!(source.refresh());
        assert_eq!(source.tables().unwrap().get("/k"), Some(&Value::from("sys")));
    }

    #[test]
    fn test_refresh_picks_up_replaced_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user");
        write_table(&path, &[("/k", Value::Int64(1))], &[]);

        let source = Source::new(LayerKind::User, "user", &path);
        source.init().unwrap();
        let before = source.tables().unwrap();
        assert!(!source.refresh());

        write_table(&path, &[("/k", Value::Int64(2))], &["/k"]);
        assert!(source.refresh());
        let after = source.tables().unwrap();
        assert_eq!(after.get("/k"), Some(&Value::Int64(2)));
        assert!(after.is_locked("/k"));

        // An earlier reader still holds the old, complete pair
        assert_eq!(before.get("/k"), Some(&Value::Int64(1)));
        assert!(!before.is_locked("/k"));
    }

    #[test]
    fn test_failed_reopen_leaves_source_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site");
        write_table(&path, &[("/k", Value::Int64(1))], &[]);

        let source = Source::new(LayerKind::System, "site", &path);
        source.init().unwrap();

        std::fs::write(&path, b"garbage").unwrap();
        assert!(source.refresh());
        assert!(source.tables().is_none());
        assert!(!source.refresh());
    }

    #[test]
    fn test_finalize_releases_tables() {
        let dir = tempdir().unwrap();
        let source = Source::new(LayerKind::User, "user", dir.path().join("user"));
        source.init().unwrap();
        source.finalize();
        assert!(source.tables().is_none());
        assert!(source.needs_reopen());
    }
}
