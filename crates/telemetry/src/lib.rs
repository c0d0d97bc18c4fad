#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stepkit Telemetry
//!
//! Observability shared by every built-in action.
//!
//! This crate provides:
//! - [`MetricsRegistry`] -- in-memory labelled counters and histograms with
//!   Prometheus text exposition
//! - [`OperationMetrics`] -- the sink the operation wrapper reports into,
//!   with the reserved `file_*` metric names
//! - [`AuditLogger`] -- structured per-operation audit records, with
//!   tracing-backed, no-op and in-memory implementations
//! - [`logging`] -- `tracing-subscriber` initialisation from [`LogConfig`]

pub mod audit;
pub mod logging;
pub mod metrics;
pub mod operation;

pub use audit::{
    AuditEntry, AuditLogger, AuditResult, MemoryAuditLogger, NoopAuditLogger, TracingAuditLogger,
};
pub use logging::{LogConfig, LogError, LogFormat};
pub use metrics::{Counter, Histogram, HistogramSnapshot, Labels, MetricsRegistry};
pub use operation::{
    NoopOperationMetrics, OperationMetrics, OperationMetricsSink, OperationSample, OperationStatus,
};
