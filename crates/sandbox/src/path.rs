//! Lexical path helpers.
//!
//! Nothing in this module touches the filesystem.

use std::path::{Component, Path, PathBuf};

/// Collapse `.` segments and resolve `..` segments textually.
///
/// `..` never climbs above the root of an absolute path. For relative
/// paths, leading `..` segments that cannot be resolved are kept so the
/// result still describes the same location relative to its anchor.
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir) | None => out.push(component),
                Some(Component::CurDir) => unreachable!("cur dir is never pushed"),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Whether `path` equals `root` or lies beneath it.
///
/// Comparison is by path components, so `/a/b` is not under `/a/bc`.
/// Both sides are expected to be clean.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Number of normal components in a path, used to rank prefix matches.
pub(crate) fn depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/a/b/../c", "/a/c")]
    #[case("/a/./b/./", "/a/b")]
    #[case("/../../etc", "/etc")]
    #[case("/a/b/../../..", "/")]
    #[case("a/../../b", "../b")]
    #[case("./", ".")]
    #[case("a/b/..", "a")]
    fn clean_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean(Path::new(input)), PathBuf::from(expected));
    }

    #[test]
    fn within_is_component_aware() {
        assert!(is_within(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(is_within(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!is_within(Path::new("/a/bc"), Path::new("/a/b")));
        assert!(!is_within(Path::new("/a"), Path::new("/a/b")));
    }

    #[test]
    fn depth_counts_normal_components() {
        assert_eq!(depth(Path::new("/")), 0);
        assert_eq!(depth(Path::new("/tmp/out")), 2);
    }
}
