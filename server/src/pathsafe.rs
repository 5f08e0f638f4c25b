//! Flat-namespace containment: turns a `path` query parameter into an
//! absolute path under the server root, or rejects it.

use std::path::{Path, PathBuf};

use xfer_core::urlutil::{clean_path, dir_depth};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PathSafetyError {
    #[error("multi-level directories are not supported")]
    MultiLevel,
    #[error("path {0} out of bounds")]
    OutOfBounds(String),
}

/// Joins `relative` onto `root` and lexically collapses the result the way
/// Go's `filepath.Join` does, so a `..` component resolves against `root`
/// itself rather than surviving as a literal, unresolved path segment.
fn join_and_clean(root: &Path, relative: &str) -> PathBuf {
    let combined = format!("{}/{relative}", root.to_string_lossy());
    PathBuf::from(clean_path(&combined))
}

/// Cleans `raw` and resolves it against `root`, rejecting anything with
/// more than one path segment or that escapes `root` once joined. Checks
/// depth before containment, mirroring the order the original service
/// applies to its `path` query parameter.
pub fn resolve(root: &Path, raw: &str) -> Result<(String, PathBuf), PathSafetyError> {
    let relative = clean_path(raw);
    if dir_depth(&relative) > 0 {
        return Err(PathSafetyError::MultiLevel);
    }
    let absolute = join_and_clean(root, &relative);
    let parent = absolute.parent().unwrap_or(root);
    if parent != root {
        return Err(PathSafetyError::OutOfBounds(relative));
    }
    Ok((relative, absolute))
}

/// Same containment rules as `resolve`, but checks containment before
/// depth — mirrors the original service's `move` handler, which checks its
/// `target` parameter in that order (`ship/service.go`'s `onMove` target
/// check runs `filepath.Dir(targetAbsPath) != srv.root` before
/// `getDirCount`), so `target="../b"` fails as "out of bounds" rather than
/// "multi-level".
pub fn resolve_target(root: &Path, raw: &str) -> Result<(String, PathBuf), PathSafetyError> {
    let relative = clean_path(raw);
    let absolute = join_and_clean(root, &relative);
    let parent = absolute.parent().unwrap_or(root);
    if parent != root {
        return Err(PathSafetyError::OutOfBounds(relative));
    }
    if dir_depth(&relative) > 0 {
        return Err(PathSafetyError::MultiLevel);
    }
    Ok((relative, absolute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_name_resolves_under_root() {
        let root = PathBuf::from("/srv/data");
        let (rel, abs) = resolve(&root, "report.txt").unwrap();
        assert_eq!(rel, "report.txt");
        assert_eq!(abs, PathBuf::from("/srv/data/report.txt"));
    }

    #[test]
    fn nested_path_rejected() {
        let root = PathBuf::from("/srv/data");
        assert!(matches!(
            resolve(&root, "a/b.txt"),
            Err(PathSafetyError::MultiLevel)
        ));
    }

    #[test]
    fn bare_dotdot_rejected_by_containment_check() {
        let root = PathBuf::from("/srv/data");
        // ".." alone has zero "/" after cleaning, so it passes the depth
        // check; the containment check must still catch it.
        assert!(matches!(resolve(&root, ".."), Err(PathSafetyError::OutOfBounds(_))));
    }

    #[test]
    fn dotdot_with_segment_rejected_by_depth_check() {
        let root = PathBuf::from("/srv/data");
        assert!(matches!(
            resolve(&root, "../escape.txt"),
            Err(PathSafetyError::MultiLevel)
        ));
    }

    #[test]
    fn backslashes_normalized_before_depth_check() {
        let root = PathBuf::from("/srv/data");
        assert!(matches!(
            resolve(&root, r"a\b.txt"),
            Err(PathSafetyError::MultiLevel)
        ));
    }

    #[test]
    fn target_dotdot_with_segment_rejected_as_out_of_bounds_not_multi_level() {
        let root = PathBuf::from("/srv/data");
        // Unlike `resolve`, `resolve_target` checks containment first, so a
        // `..` that lexically escapes `root` is reported as out of bounds
        // even though the cleaned relative path also has depth > 0.
        assert!(matches!(
            resolve_target(&root, "../b"),
            Err(PathSafetyError::OutOfBounds(ref p)) if p == "../b"
        ));
    }

    #[test]
    fn target_flat_name_resolves_under_root() {
        let root = PathBuf::from("/srv/data");
        let (rel, abs) = resolve_target(&root, "b.txt").unwrap();
        assert_eq!(rel, "b.txt");
        assert_eq!(abs, PathBuf::from("/srv/data/b.txt"));
    }
}
