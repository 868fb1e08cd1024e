//! Changesets: batched, not yet committed path mutations
//!
//! A [`Changeset`] maps paths to either a new value or `None` (a reset).
//! Resetting a dir resets everything below it, so inserting a dir reset
//! drops every pending entry it covers.
//!
//! Once [`Changeset::describe`] has been called the changeset is sealed:
//! the cached description would otherwise go stale, so further `set`
//! calls are refused with [`Error::ChangesetSealed`].

use crate::error::{Error, Result};
use crate::path::{self, SEPARATOR};
use crate::types::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Wire form of a changeset: path to optional value
pub type SerialisedChangeset = BTreeMap<String, Option<Value>>;

/// Prefix-compressed description of a changeset
#[derive(Clone, Debug, PartialEq)]
pub struct Description {
    /// Common prefix of every path
    pub prefix: String,
    /// Paths relative to `prefix`, in ascending byte order
    pub paths: Vec<String>,
    /// Values parallel to `paths`; `None` is a reset
    pub values: Vec<Option<Value>>,
}

impl Description {
    /// Number of described changes
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Absolute paths, rebuilt from the prefix
    pub fn absolute_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.paths.iter().map(|rel| format!("{}{rel}", self.prefix))
    }
}

/// A set of pending writes and resets
#[derive(Clone, Debug, Default)]
pub struct Changeset {
    table: BTreeMap<String, Option<Value>>,
    description: OnceLock<Description>,
}

impl Changeset {
    /// Create an empty changeset
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a changeset holding a single write or reset
    pub fn new_write(path: &str, value: Option<Value>) -> Result<Self> {
        let mut changeset = Self::new();
        changeset.set(path, value)?;
        Ok(changeset)
    }

    /// Record a write (`Some`) or reset (`None`) of `path`
    ///
    /// `path` may be a key or a dir. A dir can only be reset; doing so
    /// removes every pending entry below it before recording the reset.
    pub fn set(&mut self, path: &str, value: Option<Value>) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::ChangesetSealed);
        }
        path::validate_path(path)?;

        if path.ends_with(SEPARATOR) {
            if value.is_some() {
                return Err(Error::invalid_path(path, "a dir can only be reset"));
            }
            self.table.retain(|key, _| !key.starts_with(path));
            self.table.insert(path.to_string(), None);
        } else {
            self.table.insert(path.to_string(), value);
        }
        Ok(())
    }

    /// Look up the pending change for `path`
    ///
    /// Returns `None` if the changeset does not touch `path`,
    /// `Some(None)` if `path` is being reset (directly, or by a reset of a
    /// dir containing it) and `Some(Some(value))` for a write.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Option<&Value>> {
        if let Some(value) = self.table.get(path) {
            return Some(value.as_ref());
        }
        path::parent_dirs(path)
            .any(|dir| self.table.contains_key(dir))
            .then_some(None)
    }

    /// Check whether both changesets touch exactly the same paths
    ///
    /// Values are ignored. Used to collapse bursts of writes to the same
    /// keys into the most recent one.
    #[must_use]
    pub fn is_similar_to(&self, other: &Self) -> bool {
        self.table.len() == other.table.len()
            && self.table.keys().all(|key| other.table.contains_key(key))
    }

    /// Check whether every entry satisfies `predicate`
    ///
    /// Stops at the first failure. True for an empty changeset.
    pub fn all<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&str, Option<&Value>) -> bool,
    {
        self.table
            .iter()
            .all(|(path, value)| predicate(path, value.as_ref()))
    }

    /// Iterate over pending entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.table
            .iter()
            .map(|(path, value)| (path.as_str(), value.as_ref()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Whether the description has been derived and the changeset frozen
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.description.get().is_some()
    }

    /// Describe the changeset as a common prefix plus sorted relative paths
    ///
    /// Computed on first use and cached; the changeset is sealed from then
    /// on. Returns `None` for an empty changeset, which stays unsealed.
    pub fn describe(&self) -> Option<&Description> {
        let first = self.table.keys().next()?;
        Some(
            self.description
                .get_or_init(|| self.build_description(first)),
        )
    }

    fn build_description(&self, first: &str) -> Description {
        let first_bytes = first.as_bytes();

        // Pass 1: common prefix
        let mut prefix_len = first_bytes.len();
        for key in self.table.keys().skip(1) {
            prefix_len = first_bytes[..prefix_len]
                .iter()
                .zip(key.as_bytes())
                .take_while(|(a, b)| a == b)
                .count();
        }

        // "/a/ab" and "/a/ac" share "/a/a"; never split a segment.
        if self.table.len() > 1 {
            while prefix_len > 1 && first_bytes[prefix_len - 1] != b'/' {
                prefix_len -= 1;
            }
        }
        let prefix = first[..prefix_len].to_string();

        // Pass 2: relative paths. BTreeMap keys iterate in byte order, and
        // dropping a shared prefix keeps that order, so dirs still sort
        // ahead of their contents.
        let paths: Vec<String> = self
            .table
            .keys()
            .map(|key| key[prefix_len..].to_string())
            .collect();

        // Pass 3: values, looked up in the same order
        let values = paths
            .iter()
            .map(|rel| {
                self.table
                    .get(&format!("{prefix}{rel}"))
                    .cloned()
                    .flatten()
            })
            .collect();

        Description {
            prefix,
            paths,
            values,
        }
    }

    /// Convert into the canonical wire map
    #[must_use]
    pub fn serialise(&self) -> SerialisedChangeset {
        self.table.clone()
    }

    /// Rebuild a changeset from its wire map
    ///
    /// Never fails. Entries that are invalid for their implied kind (a value
    /// assigned to a dir, or a malformed path) are dropped.
    #[must_use]
    pub fn deserialise(serialised: SerialisedChangeset) -> Self {
        let table = serialised
            .into_iter()
            .filter(|(path, value)| match value {
                None => path::is_path(path),
                Some(_) => path::is_key(path),
            })
            .collect();
        Self {
            table,
            description: OnceLock::new(),
        }
    }
}

impl PartialEq for Changeset {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Option<Value> {
        Some(Value::Int64(n))
    }

    #[test]
    fn test_set_and_get() {
        let mut cs = Changeset::new();
        cs.set("/a/b", int(1)).unwrap();
        cs.set("/a/c", None).unwrap();

        assert_eq!(cs.get("/a/b"), Some(Some(&Value::Int64(1))));
        assert_eq!(cs.get("/a/c"), Some(None));
        assert_eq!(cs.get("/a/d"), None);
        assert_eq!(cs.len(), 2);
    }

    #[test]
    fn test_set_rejects_bad_paths() {
        let mut cs = Changeset::new();
        assert!(matches!(cs.set("a/b", int(1)), Err(Error::InvalidPath { .. })));
        assert!(matches!(cs.set("/a//b", None), Err(Error::InvalidPath { .. })));
        assert!(matches!(cs.set("/a/", int(1)), Err(Error::InvalidPath { .. })));
        assert!(cs.is_empty());
    }

    #[test]
    fn test_dir_reset_cascades() {
        let mut cs = Changeset::new();
        cs.set("/a/b", int(1)).unwrap();
        cs.set("/a/c/d", int(2)).unwrap();
        cs.set("/ab", int(3)).unwrap();
        cs.set("/a/", None).unwrap();

        assert_eq!(cs.len(), 2);
        assert_eq!(cs.get("/a/"), Some(None));
        // Covered by the dir reset, not absent
        assert_eq!(cs.get("/a/b"), Some(None));
        assert_eq!(cs.get("/a/c/d"), Some(None));
        assert_eq!(cs.get("/ab"), Some(Some(&Value::Int64(3))));
    }

    #[test]
    fn test_write_after_dir_reset_is_kept() {
        let mut cs = Changeset::new();
        cs.set("/a/", None).unwrap();
        cs.set("/a/b", int(5)).unwrap();

        assert_eq!(cs.get("/a/b"), Some(Some(&Value::Int64(5))));
        assert_eq!(cs.get("/a/x"), Some(None));
    }

    #[test]
    fn test_is_similar_to() {
        let a = Changeset::new_write("/a", int(1)).unwrap();
        let b = Changeset::new_write("/a", int(2)).unwrap();
        let mut c = Changeset::new_write("/a", int(1)).unwrap();
        c.set("/b", int(2)).unwrap();

        assert!(a.is_similar_to(&a));
        assert!(a.is_similar_to(&b));
        assert!(b.is_similar_to(&a));
        assert!(!a.is_similar_to(&c));
        assert!(!c.is_similar_to(&a));
        assert!(Changeset::new().is_similar_to(&Changeset::new()));
    }

    #[test]
    fn test_all() {
        let mut cs = Changeset::new();
        assert!(cs.all(|_, _| false));

        cs.set("/a", int(1)).unwrap();
        cs.set("/b", None).unwrap();
        assert!(cs.all(|path, _| path.starts_with('/')));
        assert!(!cs.all(|_, value| value.is_some()));

        let mut calls = 0;
        assert!(!cs.all(|_, _| {
            calls += 1;
            false
        }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_describe_trims_prefix_to_separator() {
        let mut cs = Changeset::new();
        cs.set("/a/ac", int(2)).unwrap();
        cs.set("/a/ab", int(1)).unwrap();

        let desc = cs.describe().unwrap();
        assert_eq!(desc.prefix, "/a/");
        assert_eq!(desc.paths, vec!["ab", "ac"]);
        assert_eq!(desc.values, vec![int(1), int(2)]);
    }

    #[test]
    fn test_describe_single_entry_keeps_full_path() {
        let cs = Changeset::new_write("/org/app/volume", int(7)).unwrap();
        let desc = cs.describe().unwrap();
        assert_eq!(desc.prefix, "/org/app/volume");
        assert_eq!(desc.paths, vec![""]);
        assert_eq!(desc.values, vec![int(7)]);
    }

    #[test]
    fn test_describe_orders_dirs_before_contents() {
        let mut cs = Changeset::new();
        cs.set("/x/z", int(1)).unwrap();
        cs.set("/x/b/", None).unwrap();
        cs.set("/x/b/c", int(2)).unwrap();
        cs.set("/y", None).unwrap();

        let desc = cs.describe().unwrap();
        assert_eq!(desc.prefix, "/");
        assert_eq!(desc.paths, vec!["x/b/", "x/b/c", "x/z", "y"]);
        assert!(desc.paths.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(desc.values, vec![None, int(2), int(1), None]);

        let rebuilt: Vec<_> = desc.absolute_paths().collect();
        let original: Vec<_> = cs.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_describe_seals() {
        let mut cs = Changeset::new();
        assert!(cs.describe().is_none());
        assert!(!cs.is_sealed());

        cs.set("/a", int(1)).unwrap();
        let first = cs.describe().cloned().unwrap();
        assert!(cs.is_sealed());
        assert_eq!(cs.set("/b", int(2)), Err(Error::ChangesetSealed));
        assert_eq!(cs.describe(), Some(&first));
    }

    #[test]
    fn test_serialise_round_trip() {
        let mut cs = Changeset::new();
        cs.set("/a/b", int(1)).unwrap();
        cs.set("/a/c/", None).unwrap();
        cs.set("/d", None).unwrap();

        let copy = Changeset::deserialise(cs.serialise());
        for path in ["/a/b", "/a/c/", "/a/c/x", "/d", "/e"] {
            assert_eq!(copy.get(path), cs.get(path), "path {path}");
        }
    }

    #[test]
    fn test_deserialise_drops_malformed_entries() {
        let mut map = SerialisedChangeset::new();
        map.insert("/dir/".to_string(), int(1));
        map.insert("no-slash".to_string(), None);
        map.insert("/a//b".to_string(), int(2));
        map.insert("/ok".to_string(), int(3));
        map.insert("/reset/".to_string(), None);

        let cs = Changeset::deserialise(map);
        assert_eq!(cs.len(), 2);
        assert_eq!(cs.get("/dir/"), None);
        assert_eq!(cs.get("/ok"), Some(Some(&Value::Int64(3))));
        assert_eq!(cs.get("/reset/"), Some(None));
    }
}
