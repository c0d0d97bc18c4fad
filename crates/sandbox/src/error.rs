//! Error types for path resolution and quota accounting.
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by [`PathResolver`](crate::PathResolver).
///
/// Messages never include the offending input, so traversal
/// attempts are not echoed back to the caller.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SandboxError {
    /// A path prefix requires a directory that was not configured.
    #[error("prefix `{prefix}` requires a configured {setting}")]
    Configuration {
        /// The prefix that could not be expanded (e.g. `$out/`).
        prefix: &'static str,
        /// The missing setting (e.g. `output directory`).
        setting: &'static str,
    },

    /// The path is a symlink and symlinks are disallowed, or the symlink
    /// target violates the policy.
    #[error("symlink denied: {reason}")]
    SymlinkDenied {
        /// Why the symlink was refused.
        reason: String,
    },

    /// The resolved path lies outside every permitted root.
    #[error("path escapes the permitted directories")]
    PathTraversal,

    /// Inspecting the path on disk failed for a reason other than absence.
    #[error("failed to inspect path: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by [`QuotaTracker`](crate::QuotaTracker).
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum QuotaError {
    /// The write would push the prefix past its error threshold.
    #[error(
        "quota for `{}` exhausted: {used_bytes} used + {requested_bytes} requested >= {limit_bytes} allowed",
        prefix.display()
    )]
    Exceeded {
        /// The registered prefix whose quota applies.
        prefix: PathBuf,
        /// Bytes already charged to the prefix.
        used_bytes: u64,
        /// Bytes the caller wanted to write.
        requested_bytes: u64,
        /// `error_threshold * quota_bytes`, rounded down.
        limit_bytes: u64,
    },

    /// Threshold configuration is out of range.
    #[error("invalid quota thresholds: warn={warn}, error={error} (need 0 < warn <= error <= 1)")]
    InvalidThresholds {
        /// Configured warn threshold.
        warn: f64,
        /// Configured error threshold.
        error: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_message_does_not_echo_input() {
        let err = SandboxError::PathTraversal;
        assert_eq!(err.to_string(), "path escapes the permitted directories");
    }

    #[test]
    fn configuration_names_prefix_and_setting() {
        let err = SandboxError::Configuration {
            prefix: "$out/",
            setting: "output directory",
        };
        assert_eq!(
            err.to_string(),
            "prefix `$out/` requires a configured output directory"
        );
    }

    #[test]
    fn quota_exceeded_display() {
        let err = QuotaError::Exceeded {
            prefix: PathBuf::from("/out"),
            used_bytes: 600,
            requested_bytes: 600,
            limit_bytes: 950,
        };
        assert_eq!(
            err.to_string(),
            "quota for `/out` exhausted: 600 used + 600 requested >= 950 allowed"
        );
    }
}
