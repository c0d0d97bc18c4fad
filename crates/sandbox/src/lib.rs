#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stepkit Sandbox
//!
//! Filesystem confinement shared by every built-in action that touches disk.
//!
//! - [`PathResolver`] -- expands `$out/`, `$temp/`, `~/` and `$$` prefixes,
//!   anchors relative paths, cleans them lexically and enforces the
//!   [`SandboxPolicy`] (symlinks, absolute paths, allowed roots)
//! - [`QuotaTracker`] -- longest-prefix byte ledger with warn / error
//!   thresholds, serialised under a single lock
//!
//! Neither component knows about actions; callers translate
//! [`SandboxError`] and [`QuotaError`] into their own error taxonomy.

pub mod error;
pub mod path;
pub mod policy;
pub mod quota;
pub mod resolver;

pub use error::{QuotaError, SandboxError};
pub use policy::{BaseDirs, SandboxPolicy};
pub use quota::{QuotaThresholds, QuotaTracker, QuotaUsage};
pub use resolver::{PathResolver, ResolvedPath};
