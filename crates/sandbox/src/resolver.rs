//! User path → trusted absolute path.
//!
//! Resolution runs in a fixed order: prefix expansion, anchoring, lexical
//! cleaning, policy validation, then a component-by-component symlink walk
//! below the containing root. Prefix expansion only
//! ever applies to the user-supplied string; symlink targets are validated
//! as-is so they cannot smuggle `$out/` or `$temp/` back in.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::SandboxError;
use crate::path::{clean, depth, is_within};
use crate::policy::{BaseDirs, SandboxPolicy};

/// An absolute, lexically clean, policy-checked path.
///
/// Only [`PathResolver::resolve`] constructs these. When any existing
/// component of the user path is a symlink (and the policy allows following
/// it), that component is replaced by its fully evaluated target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    /// Borrow the resolved path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Take ownership of the resolved path.
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Lossy string form, used for result metadata and audit records.
    pub fn to_string_lossy(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Expands, anchors and validates user-supplied paths.
///
/// Immutable after construction and cheap to clone; share one per action.
///
/// # Examples
///
/// ```
/// use stepkit_sandbox::{BaseDirs, PathResolver, SandboxPolicy, SandboxError};
///
/// let resolver = PathResolver::new(BaseDirs::new("/w"), SandboxPolicy::strict());
/// assert_eq!(
///     resolver.resolve("./data/a.txt").unwrap().as_path(),
///     std::path::Path::new("/w/data/a.txt"),
/// );
/// assert!(matches!(resolver.resolve("../escape.txt"), Err(SandboxError::PathTraversal)));
/// assert!(matches!(resolver.resolve("$out/x"), Err(SandboxError::Configuration { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct PathResolver {
    dirs: BaseDirs,
    policy: SandboxPolicy,
    home_dir: Option<PathBuf>,
}

impl PathResolver {
    /// Create a resolver. The user's home directory is looked up once here.
    pub fn new(dirs: BaseDirs, policy: SandboxPolicy) -> Self {
        Self {
            dirs,
            policy,
            home_dir: dirs::home_dir(),
        }
    }

    /// Override the directory backing the `~/` prefix.
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Configured base directories.
    pub fn dirs(&self) -> &BaseDirs {
        &self.dirs
    }

    /// Configured policy.
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Resolve a user path, or refuse it.
    ///
    /// Paths that do not exist yet are permitted (writes create them) as
    /// long as they satisfy the policy.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, SandboxError> {
        let expanded = self.expand(raw)?;
        let anchored = self.anchor(expanded)?;
        let cleaned = clean(&anchored);
        trace!(path = %cleaned.display(), "path expanded and cleaned");

        self.validate(&cleaned)?;
        self.walk(&cleaned).map(ResolvedPath)
    }

    /// Inspect every existing component below the containing root, so a
    /// symlinked parent directory gets the same treatment as a symlinked
    /// leaf. Components past the deepest existing ancestor are re-joined
    /// unchanged.
    fn walk(&self, cleaned: &Path) -> Result<PathBuf, SandboxError> {
        let base = self.containing_root(cleaned);
        let rest = cleaned.strip_prefix(&base).unwrap_or(cleaned);

        let mut current = base;
        let mut followed = false;
        let mut components = rest.components();
        while let Some(component) = components.next() {
            current.push(component);
            match std::fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    current = self.follow_symlink(&current)?;
                    followed = true;
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    current.push(components.as_path());
                    break;
                }
                Err(source) => return Err(SandboxError::Io { source }),
            }
        }

        let resolved = clean(&current);
        if followed && self.validate(&resolved).is_err() {
            debug!(path = %cleaned.display(), "refusing symlink: resolved path outside permitted roots");
            return Err(SandboxError::SymlinkDenied {
                reason: "symlink target escapes the permitted directories".to_owned(),
            });
        }
        Ok(resolved)
    }

    /// The deepest configured or allowed root holding `path`, in whichever
    /// form (configured or canonical) matched. Falls back to the filesystem
    /// root when no root holds it.
    fn containing_root(&self, path: &Path) -> PathBuf {
        let allowed = self
            .policy
            .allowed_roots
            .iter()
            .filter_map(|root| self.absolutize(root));
        self.base_roots()
            .into_iter()
            .chain(allowed)
            .flat_map(|root| {
                let canonical = std::fs::canonicalize(&root).ok();
                std::iter::once(root).chain(canonical)
            })
            .filter(|root| is_within(path, root))
            .max_by_key(|root| depth(root))
            .unwrap_or_else(|| path.ancestors().last().unwrap_or(path).to_path_buf())
    }

    /// Whether a path is allowed by the policy, without touching symlinks.
    ///
    /// `path` must already be absolute and clean.
    pub fn is_permitted(&self, path: &Path) -> bool {
        self.validate(path).is_ok()
    }

    fn expand(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        // `$$` is checked first so that `$$out/x` never reaches the `$out/` arm.
        if let Some(rest) = raw.strip_prefix("$$") {
            return Ok(PathBuf::from(format!(".${rest}")));
        }
        if let Some(rest) = strip_dir_prefix(raw, "$out") {
            return join_configured(&self.dirs.output_dir, rest, "$out/", "output directory");
        }
        if let Some(rest) = strip_dir_prefix(raw, "$temp") {
            return join_configured(&self.dirs.temp_dir, rest, "$temp/", "temp directory");
        }
        if let Some(rest) = strip_dir_prefix(raw, "~") {
            let home = self.home_dir.as_deref().unwrap_or(Path::new(""));
            return join_configured(home, rest, "~/", "home directory");
        }
        Ok(PathBuf::from(raw))
    }

    fn anchor(&self, path: PathBuf) -> Result<PathBuf, SandboxError> {
        if path.is_absolute() {
            return Ok(path);
        }
        Ok(self.workflow_root()?.join(path))
    }

    fn workflow_root(&self) -> Result<PathBuf, SandboxError> {
        let dir = &self.dirs.workflow_dir;
        if dir.is_absolute() {
            return Ok(dir.clone());
        }
        let cwd = std::env::current_dir().map_err(|source| SandboxError::Io { source })?;
        if dir.as_os_str().is_empty() {
            Ok(cwd)
        } else {
            Ok(cwd.join(dir))
        }
    }

    fn follow_symlink(&self, link: &Path) -> Result<PathBuf, SandboxError> {
        if !self.policy.allow_symlinks {
            debug!(path = %link.display(), "refusing symlink: disabled by policy");
            return Err(SandboxError::SymlinkDenied {
                reason: "symlinks are disabled by policy".to_owned(),
            });
        }

        let target = std::fs::canonicalize(link).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                SandboxError::SymlinkDenied {
                    reason: "symlink target does not exist".to_owned(),
                }
            } else {
                SandboxError::Io { source: err }
            }
        })?;

        // A bad target is reported as a symlink problem, not a traversal,
        // so operators can tell the two attack shapes apart.
        if self.validate(&target).is_err() {
            debug!(path = %link.display(), "refusing symlink: target outside permitted roots");
            return Err(SandboxError::SymlinkDenied {
                reason: "symlink target escapes the permitted directories".to_owned(),
            });
        }
        Ok(target)
    }

    fn validate(&self, path: &Path) -> Result<(), SandboxError> {
        if !self.policy.allow_absolute && path.is_absolute() {
            let inside = self
                .base_roots()
                .iter()
                .any(|root| within_root(path, root));
            if !inside {
                return Err(SandboxError::PathTraversal);
            }
        }

        if !self.policy.allowed_roots.is_empty() {
            let inside = self
                .policy
                .allowed_roots
                .iter()
                .filter_map(|root| self.absolutize(root))
                .any(|root| within_root(path, &root));
            if !inside {
                return Err(SandboxError::PathTraversal);
            }
        }
        Ok(())
    }

    fn base_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .dirs
            .configured()
            .filter_map(|dir| self.absolutize(dir))
            .collect();
        if self.dirs.workflow_dir.as_os_str().is_empty() {
            if let Ok(cwd) = std::env::current_dir() {
                roots.push(clean(&cwd));
            }
        }
        roots
    }

    fn absolutize(&self, dir: &Path) -> Option<PathBuf> {
        if dir.is_absolute() {
            return Some(clean(dir));
        }
        self.workflow_root().ok().map(|root| clean(&root.join(dir)))
    }
}

/// Membership against both the configured root and its canonical form, so
/// roots that themselves sit behind a symlink still match resolved targets.
/// Canonicalisation happens per call because roots may appear after startup.
fn within_root(path: &Path, root: &Path) -> bool {
    if is_within(path, root) {
        return true;
    }
    std::fs::canonicalize(root).is_ok_and(|canonical| is_within(path, &canonical))
}

fn strip_dir_prefix<'a>(raw: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = raw.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn join_configured(
    base: &Path,
    rest: &str,
    prefix: &'static str,
    setting: &'static str,
) -> Result<PathBuf, SandboxError> {
    if base.as_os_str().is_empty() {
        return Err(SandboxError::Configuration { prefix, setting });
    }
    Ok(base.join(rest.trim_start_matches('/')))
}
