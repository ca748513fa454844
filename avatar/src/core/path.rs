//! Path checks for files written on behalf of the completion service.

use std::path::{Component, Path};

/// True when `raw` names a file strictly inside the directory it is joined to.
///
/// Rejects empty paths, absolute paths, drive prefixes and any `..` component,
/// even one that would cancel out (`a/../b`).
pub fn is_safe_relative(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains('\0') {
        return false;
    }
    let path = Path::new(trimmed);
    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    normal > 0 && !trimmed.starts_with('\\')
}
