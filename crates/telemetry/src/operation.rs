//! Per-operation metrics.
//!
//! The operation wrapper reports one [`OperationSample`] per call into an
//! [`OperationMetricsSink`]. [`OperationMetrics`] maps samples onto the
//! reserved metric names in a [`MetricsRegistry`].

use std::time::Duration;

use crate::metrics::{Labels, MetricsRegistry};

/// Histogram of operation latency, labelled `operation` and `status`.
pub const OPERATION_DURATION: &str = "file_operation_duration_seconds";
/// Counter of bytes read.
pub const BYTES_READ: &str = "file_bytes_read_total";
/// Counter of bytes written.
pub const BYTES_WRITTEN: &str = "file_bytes_written_total";
/// Counter of failed operations, labelled `error_type`.
pub const ERRORS: &str = "file_errors_total";

/// Outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Completed successfully.
    Ok,
    /// Returned an error.
    Error,
}

impl OperationStatus {
    /// Label value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One observation reported by the wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSample<'a> {
    /// Fully qualified operation, e.g. `file.read_text`.
    pub operation: &'a str,
    /// Outcome.
    pub status: OperationStatus,
    /// Wall-clock time spent.
    pub duration: Duration,
    /// Bytes read from disk.
    pub bytes_read: u64,
    /// Bytes written to disk.
    pub bytes_written: u64,
    /// Error kind label on failure.
    pub error_kind: Option<&'a str>,
}

/// Destination for operation samples. Implementations are shared across
/// workers and must tolerate concurrent calls.
pub trait OperationMetricsSink: Send + Sync {
    /// Record one sample.
    fn record(&self, sample: &OperationSample<'_>);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOperationMetrics;

impl OperationMetricsSink for NoopOperationMetrics {
    fn record(&self, _sample: &OperationSample<'_>) {}
}

/// Sink backed by a [`MetricsRegistry`].
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    registry: MetricsRegistry,
}

impl OperationMetrics {
    /// Report into `registry`.
    pub const fn new(registry: MetricsRegistry) -> Self {
        Self { registry }
    }

    /// The backing registry.
    pub const fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }
}

impl OperationMetricsSink for OperationMetrics {
    fn record(&self, sample: &OperationSample<'_>) {
        self.registry
            .histogram(
                OPERATION_DURATION,
                Labels::new([
                    ("operation", sample.operation),
                    ("status", sample.status.as_str()),
                ]),
            )
            .observe(sample.duration.as_secs_f64());

        if sample.bytes_read > 0 {
            self.registry
                .counter(BYTES_READ, Labels::none())
                .inc_by(sample.bytes_read);
        }
        if sample.bytes_written > 0 {
            self.registry
                .counter(BYTES_WRITTEN, Labels::none())
                .inc_by(sample.bytes_written);
        }
        if let Some(kind) = sample.error_kind {
            self.registry
                .counter(ERRORS, Labels::new([("error_type", kind)]))
                .inc();
        }
    }
}
