//! Structured audit records.
//!
//! One [`AuditEntry`] is produced per operation. Loggers are shared by all
//! workers, so every implementation is `Send + Sync` and must not block on
//! emission. When no logger is configured, use [`NoopAuditLogger`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Outcome recorded in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    /// Operation completed.
    Success,
    /// Operation returned an error.
    Error,
}

impl AuditResult {
    /// Field value used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// When the operation started.
    pub timestamp: DateTime<Utc>,
    /// Fully qualified operation name.
    pub operation: String,
    /// Best-effort primary path; empty when the operation has none.
    pub path: String,
    /// Outcome.
    pub result: AuditResult,
    /// Wall-clock duration.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Set exactly when `result` is [`AuditResult::Error`]; never empty.
    pub error_message: Option<String>,
    /// Owning workflow.
    pub workflow_id: String,
    /// Owning step.
    pub step_id: String,
}

impl AuditEntry {
    /// Start a record for an operation that has not finished yet.
    pub fn begin(
        operation: impl Into<String>,
        path: impl Into<String>,
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            path: path.into(),
            result: AuditResult::Success,
            duration: Duration::ZERO,
            bytes_read: 0,
            bytes_written: 0,
            error_message: None,
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
        }
    }

    /// Complete the record as a success.
    #[must_use]
    pub fn success(mut self, duration: Duration, bytes_read: u64, bytes_written: u64) -> Self {
        self.result = AuditResult::Success;
        self.duration = duration;
        self.bytes_read = bytes_read;
        self.bytes_written = bytes_written;
        self.error_message = None;
        self
    }

    /// Complete the record as a failure.
    #[must_use]
    pub fn error(mut self, duration: Duration, message: impl Into<String>) -> Self {
        let message = message.into();
        self.result = AuditResult::Error;
        self.duration = duration;
        self.error_message = Some(if message.trim().is_empty() {
            "unknown error".to_owned()
        } else {
            message
        });
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}

/// Receiver of audit records.
pub trait AuditLogger: Send + Sync {
    /// Emit one record.
    fn log(&self, entry: &AuditEntry);
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

impl AuditLogger for NoopAuditLogger {
    fn log(&self, _entry: &AuditEntry) {}
}

/// Emits records as `tracing` events on target `stepkit::audit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, entry: &AuditEntry) {
        let duration = format!("{:?}", entry.duration);
        let error = entry.error_message.as_deref().unwrap_or("");
        match entry.result {
            AuditResult::Error => tracing::error!(
                target: "stepkit::audit",
                operation = %entry.operation,
                path = %entry.path,
                result = entry.result.as_str(),
                duration = %duration,
                bytes_read = entry.bytes_read,
                bytes_written = entry.bytes_written,
                error = %error,
                workflow_id = %entry.workflow_id,
                step_id = %entry.step_id,
                "operation failed"
            ),
            AuditResult::Success => tracing::info!(
                target: "stepkit::audit",
                operation = %entry.operation,
                path = %entry.path,
                result = entry.result.as_str(),
                duration = %duration,
                bytes_read = entry.bytes_read,
                bytes_written = entry.bytes_written,
                error = %error,
                workflow_id = %entry.workflow_id,
                step_id = %entry.step_id,
                "operation completed"
            ),
        }
    }
}

/// Keeps records in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLogger {
    /// Empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record so far, in emission order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Number of records so far.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all records.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, entry: &AuditEntry) {
        self.entries.lock().push(entry.clone());
    }
}
