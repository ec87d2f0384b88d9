use std::path::{Path, PathBuf};

use thiserror::Error;

/// Characters rejected in object keys because common filesystems refuse them.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("object key cannot be empty")]
    Empty,
    #[error("path traversal not allowed")]
    Traversal,
    #[error("absolute paths not allowed")]
    Absolute,
    #[error("invalid character {0:?} in object key")]
    IllegalCharacter(char),
    #[error("object key escapes the storage root")]
    OutsideRoot,
}

/// Reject keys that are unsafe to hand to any backend.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }

    if key.contains("..") {
        return Err(KeyError::Traversal);
    }

    // `Path::is_absolute` alone misses a leading slash on Windows.
    if Path::new(key).is_absolute() || key.starts_with('/') || key.starts_with('\\') {
        return Err(KeyError::Absolute);
    }

    if let Some(c) = key.chars().find(|c| ILLEGAL_CHARS.contains(c)) {
        return Err(KeyError::IllegalCharacter(c));
    }

    Ok(())
}

/// Validate `key` and join it under `root`, refusing any result that is not
/// inside `root`.
///
/// Containment is checked per path component, so a root of `/data/foo` does
/// not accept `/data/foobar/...`.
pub fn contained_path(root: &Path, key: &str) -> Result<PathBuf, KeyError> {
    validate_key(key)?;

    let path = root.join(key);
    if !path.starts_with(root) || path == root {
        return Err(KeyError::OutsideRoot);
    }

    Ok(path)
}
