//! Path syntax
//!
//! Every location in the database is named by an absolute path:
//!
//! - a *path* starts with `/` and never contains `//`
//! - a *key* is a path that does not end in `/`
//! - a *dir* is a path that ends in `/`
//!
//! Relative paths are only used by multi-key writes, where they are appended
//! to a dir prefix.

use crate::error::{Error, Result};

/// Path separator
pub const SEPARATOR: char = '/';

/// Check that `path` is a path (key or dir)
pub fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with(SEPARATOR) {
        return Err(Error::invalid_path(path, "must begin with '/'"));
    }
    if path.contains("//") {
        return Err(Error::invalid_path(path, "must not contain '//'"));
    }
    Ok(())
}

/// Check that `path` is a key
pub fn validate_key(path: &str) -> Result<()> {
    validate_path(path)?;
    if path.ends_with(SEPARATOR) {
        return Err(Error::invalid_path(path, "a key must not end with '/'"));
    }
    Ok(())
}

/// Check that `path` is a dir
pub fn validate_dir(path: &str) -> Result<()> {
    validate_path(path)?;
    if !path.ends_with(SEPARATOR) {
        return Err(Error::invalid_path(path, "a dir must end with '/'"));
    }
    Ok(())
}

/// Check that `rel` can be appended to a dir without escaping it
pub fn validate_rel_path(rel: &str) -> Result<()> {
    if rel.starts_with(SEPARATOR) {
        return Err(Error::invalid_path(rel, "relative path must not begin with '/'"));
    }
    if rel.contains("//") {
        return Err(Error::invalid_path(rel, "must not contain '//'"));
    }
    if rel.split(SEPARATOR).any(|segment| segment == "..") {
        return Err(Error::invalid_path(rel, "relative path escapes its prefix"));
    }
    Ok(())
}

#[must_use]
pub fn is_path(path: &str) -> bool {
    validate_path(path).is_ok()
}

#[must_use]
pub fn is_key(path: &str) -> bool {
    validate_key(path).is_ok()
}

#[must_use]
pub fn is_dir(path: &str) -> bool {
    validate_dir(path).is_ok()
}

/// Every dir that contains `path`, from `/` downwards, excluding `path` itself
///
/// `"/a/b/c"` yields `"/"`, `"/a/"`, `"/a/b/"`.
pub fn parent_dirs(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .filter(|&(_, c)| c == SEPARATOR)
        .map(move |(i, _)| &path[..=i])
        .filter(move |dir| dir.len() < path.len())
}

/// The immediate child of `dir` that leads to `path`
///
/// Returns `"name"` for a key directly inside `dir` and `"name/"` for a
/// deeper path. `None` if `path` is not below `dir`.
#[must_use]
pub fn immediate_child<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(dir)?;
    if rest.is_empty() {
        return None;
    }
    match rest.find(SEPARATOR) {
        Some(i) => Some(&rest[..=i]),
        None => Some(rest),
    }
}
