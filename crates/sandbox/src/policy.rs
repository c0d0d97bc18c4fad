//! Base directories and sandbox policy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directories that anchor the path prefix language.
///
/// An empty path means "not configured": a `$out/` or `$temp/` prefix that
/// needs it fails with a configuration error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseDirs {
    /// Anchor for relative paths. Falls back to the process working
    /// directory when empty.
    pub workflow_dir: PathBuf,
    /// Backs the `$out/` prefix.
    pub output_dir: PathBuf,
    /// Backs the `$temp/` prefix.
    pub temp_dir: PathBuf,
}

impl BaseDirs {
    /// Create base dirs anchored at `workflow_dir` with no output/temp dirs.
    pub fn new(workflow_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflow_dir: workflow_dir.into(),
            ..Self::default()
        }
    }

    /// Set the directory backing `$out/`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the directory backing `$temp/`.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Configured directories that are not empty, in
    /// `workflow, output, temp` order.
    pub(crate) fn configured(&self) -> impl Iterator<Item = &Path> {
        [&self.workflow_dir, &self.output_dir, &self.temp_dir]
            .into_iter()
            .map(PathBuf::as_path)
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Deny-by-default policy applied to every resolved path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// If non-empty, every resolved path must lie under one of these.
    pub allowed_roots: Vec<PathBuf>,
    /// Follow symlinks (and re-validate their targets) instead of refusing.
    pub allow_symlinks: bool,
    /// Skip the base-directory containment check for absolute paths.
    pub allow_absolute: bool,
}

impl SandboxPolicy {
    /// The strictest policy: no symlinks, no absolute escapes, no extra roots.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Add an allowed root.
    pub fn with_allowed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.allowed_roots.push(root.into());
        self
    }

    /// Permit following symlinks.
    pub fn with_symlinks(mut self, allow: bool) -> Self {
        self.allow_symlinks = allow;
        self
    }

    /// Permit absolute paths outside the base directories.
    pub fn with_absolute(mut self, allow: bool) -> Self {
        self.allow_absolute = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_skips_empty_dirs() {
        let dirs = BaseDirs::new("/w").with_temp_dir("/t");
        let got: Vec<&Path> = dirs.configured().collect();
        assert_eq!(got, vec![Path::new("/w"), Path::new("/t")]);
    }

    #[test]
    fn strict_policy_denies_everything_optional() {
        let policy = SandboxPolicy::strict();
        assert!(!policy.allow_symlinks);
        assert!(!policy.allow_absolute);
        assert!(policy.allowed_roots.is_empty());
    }
}
