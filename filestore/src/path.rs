//! Object path conventions shared by all backends.
//!
//! Paths are opaque `/`-separated keys. A path ending in `/` denotes a
//! directory-like prefix.

use crate::error::{Result, StorageError};

pub const SEPARATOR: char = '/';

pub fn is_directory_path(path: &str) -> bool {
    path.ends_with(SEPARATOR)
}

pub fn validate_directory_path(path: &str) -> Result<()> {
    if !is_directory_path(path) {
        return Err(StorageError::invalid_path(
            path,
            "directory path must end with '/'",
        ));
    }
    Ok(())
}

/// Joins an upload directory and file name the same way on every backend.
/// An empty `dir` (or `/`) places the object at the root.
pub fn join_object_path(dir: &str, file_name: &str) -> Result<String> {
    if file_name.is_empty() {
        return Err(StorageError::invalid_path(file_name, "file name is empty"));
    }
    if file_name.contains(SEPARATOR) {
        return Err(StorageError::invalid_path(
            file_name,
            "file name must not contain '/'",
        ));
    }
    let dir = dir.trim_end_matches(SEPARATOR);
    if dir.is_empty() {
        Ok(file_name.to_string())
    } else {
        Ok(format!("{dir}{SEPARATOR}{file_name}"))
    }
}

/// Prepends an optional bucket prefix to an object path.
pub(crate) fn prefixed_key(prefix: Option<&str>, object: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}/{}", prefix.trim_end_matches(SEPARATOR), object)
        }
        _ => object.to_string(),
    }
}
