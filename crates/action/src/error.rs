//! Error taxonomy shared by every built-in action.

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stepkit_sandbox::{QuotaError, SandboxError};

/// Stable classification of an [`OperationError`].
///
/// Each value maps 1:1 onto an audit and metric label. Renaming a variant's
/// string form is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Inputs are missing, malformed or not allowed.
    Validation,
    /// The target does not exist.
    FileNotFound,
    /// The OS refused access.
    PermissionDenied,
    /// The resolved path leaves every permitted directory.
    PathTraversal,
    /// A symlink was refused or points outside the sandbox.
    SymlinkDenied,
    /// Out of space, or a write quota refused the write.
    DiskFull,
    /// The file exceeds a configured size limit.
    SizeLimit,
    /// A quota refused the operation.
    QuotaExceeded,
    /// Content did not parse in the expected format.
    ParseError,
    /// A template failed to compile or execute.
    TemplateError,
    /// The action is missing required configuration.
    Configuration,
    /// A numeric argument is out of range.
    Range,
    /// A collection argument is empty.
    Empty,
    /// An argument has the wrong type.
    Type,
    /// Anything else, including cancellation.
    Internal,
}

impl ErrorKind {
    /// Label used in audit records and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::FileNotFound => "file_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::PathTraversal => "path_traversal",
            Self::SymlinkDenied => "symlink_denied",
            Self::DiskFull => "disk_full",
            Self::SizeLimit => "size_limit",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ParseError => "parse_error",
            Self::TemplateError => "template_error",
            Self::Configuration => "configuration",
            Self::Range => "range",
            Self::Empty => "empty",
            Self::Type => "type",
            Self::Internal => "internal",
        }
    }

    /// One-line hint attached to errors of this kind when the caller gives
    /// none.
    pub const fn default_suggestion(self) -> Option<&'static str> {
        match self {
            Self::Validation => Some("check the operation inputs"),
            Self::FileNotFound => Some("check that the path exists"),
            Self::PermissionDenied => Some("check file permissions"),
            Self::PathTraversal => {
                Some("use a path under the workflow, output or temp directory")
            }
            Self::SymlinkDenied => Some("enable symlinks or use the link target directly"),
            Self::DiskFull => Some("free space or raise the write quota"),
            Self::SizeLimit => Some("raise the size limit or use a smaller file"),
            Self::ParseError => Some("check the file format"),
            Self::Configuration => Some("configure the missing directory"),
            Self::QuotaExceeded
            | Self::TemplateError
            | Self::Range
            | Self::Empty
            | Self::Type
            | Self::Internal => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source attached to errors raised because the step was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// The single error shape returned by every operation.
///
/// Messages name the operation and the kind. They never carry file
/// contents or the raw path of a refused traversal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation}: {kind}: {message}")]
pub struct OperationError {
    /// Operation that failed.
    pub operation: String,
    /// Classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Underlying error, if any.
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    /// One-line remediation hint.
    pub suggestion: Option<String>,
    /// Advisory marker for transient failures.
    pub retryable: bool,
}

impl OperationError {
    /// Create an error; the suggestion defaults from the kind.
    pub fn new(operation: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind,
            message: message.into(),
            cause: None,
            suggestion: kind.default_suggestion().map(str::to_owned),
            retryable: false,
        }
    }

    /// Shorthand for [`ErrorKind::Validation`].
    pub fn validation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Validation, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Internal, message)
    }

    /// Shorthand for [`ErrorKind::Range`].
    pub fn range(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Range, message)
    }

    /// Internal error caused by cancellation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::internal(operation, "operation cancelled").with_cause(Cancelled)
    }

    /// Attach an underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Replace the suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Set the retryable marker.
    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Whether the error was raised because the step was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Internal
            && self.cause.as_deref().is_some_and(|c| c.is::<Cancelled>())
    }
}

/// Conversion of crate-level errors into [`OperationError`].
pub trait IntoOperationError {
    /// Classify `self` as a failure of `operation`.
    fn for_operation(self, operation: &str) -> OperationError;
}

impl IntoOperationError for OperationError {
    fn for_operation(self, _operation: &str) -> OperationError {
        self
    }
}

impl IntoOperationError for io::Error {
    fn for_operation(self, operation: &str) -> OperationError {
        let kind = match self.kind() {
            io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::StorageFull => ErrorKind::DiskFull,
            _ => ErrorKind::Internal,
        };
        let message = match kind {
            ErrorKind::FileNotFound => "file not found".to_owned(),
            ErrorKind::PermissionDenied => "permission denied".to_owned(),
            ErrorKind::DiskFull => "no space left on device".to_owned(),
            _ => format!("i/o error: {}", self.kind()),
        };
        OperationError::new(operation, kind, message).with_cause(self)
    }
}

impl IntoOperationError for SandboxError {
    fn for_operation(self, operation: &str) -> OperationError {
        let kind = match &self {
            SandboxError::Configuration { .. } => ErrorKind::Configuration,
            SandboxError::SymlinkDenied { .. } => ErrorKind::SymlinkDenied,
            SandboxError::PathTraversal => ErrorKind::PathTraversal,
            SandboxError::Io { source } if source.kind() == io::ErrorKind::PermissionDenied => {
                ErrorKind::PermissionDenied
            }
            _ => ErrorKind::Internal,
        };
        OperationError::new(operation, kind, self.to_string()).with_cause(self)
    }
}

impl IntoOperationError for QuotaError {
    fn for_operation(self, operation: &str) -> OperationError {
        let kind = match &self {
            QuotaError::Exceeded { .. } => ErrorKind::DiskFull,
            _ => ErrorKind::Configuration,
        };
        OperationError::new(operation, kind, self.to_string()).with_cause(self)
    }
}

/// `map_err` shorthand for results carrying a convertible error.
pub trait ResultExt<T> {
    /// Convert the error side with [`IntoOperationError::for_operation`].
    fn with_operation(self, operation: &str) -> Result<T, OperationError>;
}

impl<T, E: IntoOperationError> ResultExt<T> for Result<T, E> {
    fn with_operation(self, operation: &str) -> Result<T, OperationError> {
        self.map_err(|e| e.for_operation(operation))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(io::ErrorKind::NotFound, ErrorKind::FileNotFound)]
    #[case(io::ErrorKind::PermissionDenied, ErrorKind::PermissionDenied)]
    #[case(io::ErrorKind::StorageFull, ErrorKind::DiskFull)]
    #[case(io::ErrorKind::BrokenPipe, ErrorKind::Internal)]
    fn io_errors_map_by_kind(#[case] io_kind: io::ErrorKind, #[case] expected: ErrorKind) {
        let err = io::Error::from(io_kind).for_operation("read_text");
        assert_eq!(err.kind, expected);
        assert_eq!(err.operation, "read_text");
        assert!(err.source().is_some());
    }

    #[rstest]
    #[case(SandboxError::PathTraversal, ErrorKind::PathTraversal)]
    #[case(SandboxError::SymlinkDenied { reason: "x".into() }, ErrorKind::SymlinkDenied)]
    #[case(
        SandboxError::Configuration { prefix: "$out/", setting: "output directory" },
        ErrorKind::Configuration
    )]
    fn sandbox_errors_map_by_variant(#[case] err: SandboxError, #[case] expected: ErrorKind) {
        assert_eq!(err.for_operation("write").kind, expected);
    }

    #[test]
    fn quota_refusal_is_disk_full() {
        let err = QuotaError::Exceeded {
            prefix: "/out".into(),
            used_bytes: 600,
            requested_bytes: 600,
            limit_bytes: 950,
        }
        .for_operation("write_text");
        assert_eq!(err.kind, ErrorKind::DiskFull);
        assert!(!err.retryable);
    }

    #[test]
    fn cancelled_is_internal_with_cause() {
        let err = OperationError::cancelled("sleep");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.is_cancelled());
        assert!(!OperationError::internal("sleep", "boom").is_cancelled());
    }

    #[test]
    fn display_names_operation_and_kind() {
        let err = OperationError::validation("read_json", "missing field `path`");
        assert_eq!(err.to_string(), "read_json: validation: missing field `path`");
        assert_eq!(err.suggestion.as_deref(), Some("check the operation inputs"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::FileNotFound).unwrap();
        assert_eq!(json, "\"file_not_found\"");
    }

    #[test]
    fn clones_share_cause() {
        let err = io::Error::from(io::ErrorKind::NotFound).for_operation("stat");
        let copy = err.clone();
        assert_eq!(copy.kind, err.kind);
        assert!(copy.source().is_some());
    }
}
