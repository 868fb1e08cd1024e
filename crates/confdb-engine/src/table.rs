//! Layer table files
//!
//! Each database layer is stored as a single immutable snapshot: a sorted
//! key to value table plus the set of locked paths. Writers never modify a
//! table file in place; they write a complete new file next to it and
//! rename it over the old one, so a reader holding the old contents keeps a
//! consistent view and the next staleness check sees a new file.

use confdb_common::path;
use confdb_common::{Error, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, Metadata};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::Path;
use std::time::SystemTime;

/// Magic number for table file header
const TABLE_MAGIC: u64 = 0x4346_4442_5441_424C; // "CFDBTABL"

/// Table file version
const TABLE_VERSION: u32 = 1;

/// Table file error
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),

    #[error("not a table file (bad magic {0:#x})")]
    BadMagic(u64),

    #[error("unsupported table version {0}")]
    UnsupportedVersion(u32),
}

impl TableError {
    /// Check if the table file does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        Self::LayerUnavailable(e.to_string())
    }
}

pub type TableResult<T> = Result<T, TableError>;

/// Identity of a table file on disk
///
/// A replaced file always differs in inode (on unix) and usually in size
/// or mtime too.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

impl Fingerprint {
    fn from_metadata(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        let inode = std::os::unix::fs::MetadataExt::ino(metadata);
        #[cfg(not(unix))]
        let inode = 0;

        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            inode,
        }
    }

    /// Fingerprint of the file currently at `path`, if any
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        std::fs::metadata(path)
            .ok()
            .map(|m| Self::from_metadata(&m))
    }
}

/// On-disk table file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableFile {
    magic: u64,
    version: u32,
    /// Key to value table
    pub values: BTreeMap<String, Value>,
    /// Locked paths: keys, or dirs locking everything below them
    pub locks: BTreeSet<String>,
}

impl Default for TableFile {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFile {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            magic: TABLE_MAGIC,
            version: TABLE_VERSION,
            values: BTreeMap::new(),
            locks: BTreeSet::new(),
        }
    }

    /// Read a table file, returning it with the fingerprint of the file read
    pub fn read(path: &Path) -> TableResult<(Self, Fingerprint)> {
        let mut file = File::open(path)?;
        let fingerprint = Fingerprint::from_metadata(&file.metadata()?);

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let table: Self = bincode::deserialize(&bytes)?;
        if table.magic != TABLE_MAGIC {
            return Err(TableError::BadMagic(table.magic));
        }
        if table.version != TABLE_VERSION {
            return Err(TableError::UnsupportedVersion(table.version));
        }
        Ok((table, fingerprint))
    }

    /// Atomically replace the table file at `path`
    pub fn write(&self, path: &Path) -> TableResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let bytes = bincode::serialize(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| TableError::Io(e.error))?;
        Ok(())
    }

    /// Freeze into lookup tables
    #[must_use]
    pub fn into_tables(self) -> LayerTables {
        LayerTables {
            values: self.values,
            locks: (!self.locks.is_empty()).then_some(self.locks),
        }
    }
}

/// The immutable value and lock tables of one layer
///
/// Always replaced as a whole, never modified after construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerTables {
    values: BTreeMap<String, Value>,
    locks: Option<BTreeSet<String>>,
}

impl LayerTables {
    /// Build tables from in-memory entries
    pub fn from_entries<V, L>(values: V, locks: L) -> Self
    where
        V: IntoIterator<Item = (String, Value)>,
        L: IntoIterator<Item = String>,
    {
        let mut table = TableFile::new();
        table.values.extend(values);
        table.locks.extend(locks);
        table.into_tables()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether the layer holds `path`: the key itself, or any key below a dir
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        if path.ends_with(path::SEPARATOR) {
            self.keys_below(path).next().is_some()
        } else {
            self.values.contains_key(path)
        }
    }

    /// Whether `path` or one of its parent dirs is locked by this layer
    #[must_use]
    pub fn is_locked(&self, path: &str) -> bool {
        self.locks.as_ref().is_some_and(|locks| {
            locks.contains(path) || path::parent_dirs(path).any(|dir| locks.contains(dir))
        })
    }

    #[must_use]
    pub const fn has_locks(&self) -> bool {
        self.locks.is_some()
    }

    /// Immediate children of `dir`: `name` for keys, `name/` for sub-dirs
    pub fn list<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.keys_below(dir)
            .filter_map(move |key| path::immediate_child(dir, key))
    }

    fn keys_below<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.values
            .range::<str, _>((Bound::Included(dir), Bound::Unbounded))
            .map(|(key, _)| key.as_str())
            .take_while(move |key| key.starts_with(dir))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
