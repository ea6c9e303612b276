//! Relative path validation
//!
//! Filenames and download paths arrive from clients. They must stay below
//! their destination and must never address the chunk working area.

use std::path::{Component, Path, PathBuf};

use crate::upload::CHUNKS_DIR;

/// Normalize a client supplied relative path.
///
/// Returns `None` for empty paths, absolute paths, `..` components,
/// backslashes, NUL bytes, or any component named `.chunks`.
pub fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() || raw.contains('\0') || raw.contains('\\') {
        return None;
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => {
                if part == CHUNKS_DIR {
                    return None;
                }
                normalized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if normalized.as_os_str().is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalize a relative path and render it with `/` separators
pub fn normalize_filename(raw: &str) -> Option<String> {
    let path = safe_relative_path(raw)?;
    let parts: Option<Vec<&str>> = path.components().map(|c| c.as_os_str().to_str()).collect();
    parts.map(|parts| parts.join("/"))
}
