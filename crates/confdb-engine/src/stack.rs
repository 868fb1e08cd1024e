//! The source stack
//!
//! Layers are ordered by the profile: every layer but the last is a
//! read-only system database, index 0 being the most authoritative; the
//! last layer may be the writable user database.
//!
//! Precedence for a normal read is: the writable layer first, unless a
//! read-only layer locks the key, then the read-only layers in index order.
//! A lock in layer `i` makes layer `i` and everything after it (the
//! defaults it overrides) the only candidates.

use crate::source::Source;
use crate::table::LayerTables;
use confdb_common::config::Config;
use confdb_common::path;
use confdb_common::{Error, Result, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which view of the stack a read consults
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// The effective value
    #[default]
    Normal,
    /// The value the key would have if it were reset now
    ResetView,
    /// Only what the user has stored, even if it is overridden
    UserOnly,
}

/// Ordered layers of one profile
#[derive(Debug)]
pub struct SourceStack {
    sources: Vec<Source>,
}

impl SourceStack {
    /// Build a stack and open every layer
    ///
    /// Only the last source may be writable. Layers that fail to open are
    /// kept and contribute nothing until their file appears.
    pub fn new(sources: Vec<Source>) -> Result<Self> {
        let last = sources.len().saturating_sub(1);
        if let Some((i, source)) = sources
            .iter()
            .enumerate()
            .find(|(i, source)| source.is_writable() && *i != last)
        {
            return Err(Error::Configuration(format!(
                "writable layer '{}' at position {i} must be the last layer",
                source.name()
            )));
        }

        for source in &sources {
            if let Err(e) = source.init() {
                warn!("Layer {} '{}' unavailable: {}", source.kind(), source.name(), e);
            }
        }
        Ok(Self { sources })
    }

    /// Build the stack described by `config.profile`
    pub fn from_config(config: &Config) -> Result<Self> {
        let sources = config
            .profile
            .iter()
            .map(|descriptor| Source::from_descriptor(descriptor, config))
            .collect::<Result<Vec<_>>>()?;
        Self::new(sources)
    }

    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The writable layer, if the profile has one
    #[must_use]
    pub fn writable(&self) -> Option<&Source> {
        self.sources.last().filter(|source| source.is_writable())
    }

    /// The read-only layers, most authoritative first
    #[must_use]
    pub fn read_only(&self) -> &[Source] {
        match self.writable() {
            Some(_) => &self.sources[..self.sources.len() - 1],
            None => &self.sources,
        }
    }

    /// Reopen every stale layer; returns whether any layer changed
    pub fn refresh(&self) -> bool {
        let mut changed = false;
        for source in &self.sources {
            if source.refresh() {
                debug!("Layer {} '{}' changed", source.kind(), source.name());
                changed = true;
            }
        }
        changed
    }

    /// Pin the current tables of every layer
    ///
    /// Lock checks and value lookups made through one view all see the
    /// same generation of each layer, even while another thread reopens it.
    #[must_use]
    pub fn view(&self) -> StackView<'_> {
        StackView {
            stack: self,
            tables: self.sources.iter().map(Source::tables).collect(),
        }
    }

    /// The first read-only layer locking `path` or one of its dirs
    #[must_use]
    pub fn locked_by(&self, path: &str) -> Option<&Source> {
        self.view().locked_by(path)
    }

    /// Look up `key` in the given view, without refreshing
    #[must_use]
    pub fn lookup(&self, key: &str, mode: ReadMode) -> Option<Value> {
        self.view().lookup(key, mode)
    }

    /// Immediate children of `dir` across every layer, sorted and unique
    #[must_use]
    pub fn list(&self, dir: &str) -> Vec<String> {
        let mut children = BTreeSet::new();
        for tables in self.sources.iter().filter_map(Source::tables) {
            children.extend(tables.list(dir).map(str::to_string));
        }
        children.into_iter().collect()
    }
}

impl Drop for SourceStack {
    fn drop(&mut self) {
        for source in &self.sources {
            source.finalize();
        }
    }
}

/// The tables of a [`SourceStack`] as they were at one instant
pub struct StackView<'a> {
    stack: &'a SourceStack,
    tables: Vec<Option<Arc<LayerTables>>>,
}

impl<'a> StackView<'a> {
    fn read_only(&self) -> &[Option<Arc<LayerTables>>] {
        &self.tables[..self.stack.read_only().len()]
    }

    /// Tables of the writable layer; `None` if there is none or it is absent
    #[must_use]
    pub fn writable(&self) -> Option<&LayerTables> {
        self.stack.writable()?;
        self.tables.last()?.as_deref()
    }

    /// The first read-only layer locking `path` or one of its dirs
    #[must_use]
    pub fn locked_by(&self, path: &str) -> Option<&'a Source> {
        let i = self.locking_layer(path)?;
        self.stack.read_only().get(i)
    }

    fn locking_layer(&self, path: &str) -> Option<usize> {
        self.read_only()
            .iter()
            .position(|tables| tables.as_ref().is_some_and(|t| t.is_locked(path)))
    }

    /// Look up `key` in the given view
    #[must_use]
    pub fn lookup(&self, key: &str, mode: ReadMode) -> Option<Value> {
        let read_only = self.read_only();
        match mode {
            ReadMode::UserOnly => self.writable()?.get(key).cloned(),
            ReadMode::ResetView => first_value(read_only, key),
            ReadMode::Normal => {
                if let Some(i) = self.locking_layer(key) {
                    return first_value(&read_only[i..], key);
                }
                self.writable()
                    .and_then(|tables| tables.get(key).cloned())
                    .or_else(|| first_value(read_only, key))
            }
        }
    }
}

impl fmt::Debug for StackView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackView")
            .field("layers", &self.tables.len())
            .finish_non_exhaustive()
    }
}

fn first_value(layers: &[Option<Arc<LayerTables>>], key: &str) -> Option<Value> {
    layers
        .iter()
        .flatten()
        .find_map(|tables| tables.get(key).cloned())
}

/// Parse a profile file: one layer descriptor per line
///
/// Blank lines and `#` comments are ignored.
#[must_use]
pub fn parse_profile(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check that `key` is a key, logging rather than failing
pub(crate) fn checked_key(key: &str) -> Option<&str> {
    match path::validate_key(key) {
        Ok(()) => Some(key),
        Err(e) => {
            debug!("Ignoring read of {}", e);
            None
        }
    }
}
