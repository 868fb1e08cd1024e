//! Database files owned by the writer
//!
//! Every mutation reads the current table file, edits it in memory and
//! atomically replaces it, so readers in other processes only ever see a
//! complete old or new table.

use crate::error::{WriterError, WriterResult};
use confdb_common::{Value, path};
use confdb_engine::{LayerKind, TableFile};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One database file the writer maintains
#[derive(Clone, Debug)]
pub struct Database {
    kind: LayerKind,
    name: String,
    path: PathBuf,
}

impl Database {
    pub fn new(kind: LayerKind, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: path.into(),
        }
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

    /// Current contents; a database that was never written is empty
    pub fn load(&self) -> WriterResult<TableFile> {
        match TableFile::read(&self.path) {
            Ok((table, _)) => Ok(table),
            Err(e) if e.is_not_found() => Ok(TableFile::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply writes and resets in order, then replace the file
    ///
    /// Resetting a dir removes every key below it.
    pub fn apply(&self, changes: &[(String, Option<Value>)]) -> WriterResult<()> {
        let mut table = self.load()?;
        for (target, value) in changes {
            path::validate_path(target)?;
            match value {
                Some(value) => {
                    path::validate_key(target)?;
                    table.values.insert(target.clone(), value.clone());
                }
                None if path::is_dir(target) => {
                    table.values.retain(|key, _| !key.starts_with(target.as_str()));
                }
                None => {
                    table.values.remove(target);
                }
            }
        }
        table.write(&self.path)?;
        debug!("Applied {} changes to {} '{}'", changes.len(), self.kind, self.name);
        Ok(())
    }

    /// Add or remove a lock on `target`
    ///
    /// Returns whether the lock set changed; the file is only rewritten
    /// when it did.
    pub fn set_locked(&self, target: &str, locked: bool) -> WriterResult<bool> {
        path::validate_path(target)?;
        if self.kind.is_writable() {
            return Err(WriterError::Rejected(format!(
                "locks cannot be stored in {} '{}'",
                self.kind, self.name
            )));
        }

        let mut table = self.load()?;
        let changed = if locked {
            table.locks.insert(target.to_string())
        } else {
            table.locks.remove(target)
        };
        if changed {
            table.write(&self.path)?;
        }
        Ok(changed)
    }
}
