//! Relative path normalization shared by extraction and asset serving.

use crate::SecurityError;
use std::path::{Component, Path, PathBuf};

/// Normalizes an archive entry name or requested asset path into a relative
/// path with only normal components.
///
/// Backslashes are treated as separators. Empty and `.` segments are dropped.
/// Absolute paths, drive prefixes and `..` segments are rejected outright
/// rather than resolved.
pub fn sanitize_relative_path(raw: &str) -> Result<PathBuf, SecurityError> {
    if raw.is_empty() || raw.contains('\0') {
        return Err(SecurityError::InvalidPath(raw.to_string()));
    }

    let normalized = raw.replace('\\', "/");
    let bytes = normalized.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    if normalized.starts_with('/') || has_drive {
        return Err(SecurityError::AbsolutePath(raw.to_string()));
    }

    let mut out = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(SecurityError::ParentTraversal(raw.to_string())),
            s => out.push(s),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(SecurityError::InvalidPath(raw.to_string()));
    }
    if !out.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(SecurityError::EscapesRoot(raw.to_string()));
    }
    Ok(out)
}

/// Joins a sanitized relative path onto `root` and confirms the result stays under it.
pub fn resolve_within(root: &Path, raw: &str) -> Result<PathBuf, SecurityError> {
    let rel = sanitize_relative_path(raw)?;
    let joined = root.join(&rel);
    if !joined.starts_with(root) {
        return Err(SecurityError::EscapesRoot(raw.to_string()));
    }
    Ok(joined)
}
