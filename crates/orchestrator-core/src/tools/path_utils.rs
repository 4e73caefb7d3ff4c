//! Path validation shared by file-touching tool implementations.
//!
//! Grounded on krusty-core's `tools::path_utils::validate_path`, simplified
//! from its multi-tenant sandbox-root model to the single-rule contract this
//! system needs: a tool path must be relative and may not contain a `..`
//! component, full stop.

use std::path::{Path, PathBuf};

use super::registry::ToolResult;

/// Validate a tool-supplied path against `working_dir` and return the
/// resolved absolute path. Rejects absolute input paths and any `..`
/// component, matching or not the target's existence.
pub fn validate_path(path: &str, working_dir: &Path) -> Result<PathBuf, ToolResult> {
    let candidate = Path::new(path);

    if candidate.is_absolute() {
        return Err(ToolResult::error(format!(
            "Access denied: '{}' is an absolute path",
            path
        )));
    }

    if candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ToolResult::error(format!(
            "Access denied: '{}' contains a parent-directory traversal",
            path
        )));
    }

    Ok(working_dir.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_paths() {
        let err = validate_path("/etc/passwd", Path::new("/work")).unwrap_err();
        assert!(err.is_error);
    }

    #[test]
    fn rejects_parent_traversal() {
        let err = validate_path("../secrets.txt", Path::new("/work")).unwrap_err();
        assert!(err.is_error);
    }

    #[test]
    fn rejects_traversal_in_the_middle_of_a_path() {
        let err = validate_path("src/../../secrets.txt", Path::new("/work")).unwrap_err();
        assert!(err.is_error);
    }

    #[test]
    fn accepts_plain_relative_paths() {
        let resolved = validate_path("src/lib.rs", Path::new("/work")).unwrap();
        assert_eq!(resolved, Path::new("/work/src/lib.rs"));
    }
}
