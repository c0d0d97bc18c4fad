//! Observability envelope applied to every action.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use stepkit_telemetry::{
    AuditEntry, AuditLogger, NoopAuditLogger, NoopOperationMetrics, OperationMetricsSink,
    OperationSample, OperationStatus,
};
use tracing::debug;

use crate::action::BuiltinAction;
use crate::context::ActionContext;
use crate::error::OperationError;
use crate::input::{Inputs, primary_path};
use crate::output::ActionOutput;

/// Decorator that times each call, reports metrics and writes one audit
/// record.
///
/// Errors from the inner action are forwarded unchanged.
pub struct Instrumented {
    inner: Arc<dyn BuiltinAction>,
    audit: Arc<dyn AuditLogger>,
    metrics: Arc<dyn OperationMetricsSink>,
}

impl Instrumented {
    /// Wrap `inner` with the given sinks.
    pub fn new(
        inner: Arc<dyn BuiltinAction>,
        audit: Arc<dyn AuditLogger>,
        metrics: Arc<dyn OperationMetricsSink>,
    ) -> Self {
        Self {
            inner,
            audit,
            metrics,
        }
    }

    /// Wrap `inner` with no-op sinks.
    pub fn unobserved(inner: Arc<dyn BuiltinAction>) -> Self {
        Self::new(inner, Arc::new(NoopAuditLogger), Arc::new(NoopOperationMetrics))
    }
}

impl fmt::Debug for Instrumented {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("action", &self.inner.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BuiltinAction for Instrumented {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn operations(&self) -> &[&'static str] {
        self.inner.operations()
    }

    async fn execute(
        &self,
        operation: &str,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError> {
        let qualified = format!("{}.{operation}", self.inner.name());
        let entry = AuditEntry::begin(
            qualified.as_str(),
            primary_path(inputs),
            ctx.workflow_id.as_str(),
            ctx.step_id.as_str(),
        );
        let started = Instant::now();

        let result = self.inner.execute(operation, inputs, ctx).await;
        let elapsed = started.elapsed();

        match result {
            Ok(mut output) => {
                self.metrics.record(&OperationSample {
                    operation: &qualified,
                    status: OperationStatus::Ok,
                    duration: elapsed,
                    bytes_read: output.io.bytes_read,
                    bytes_written: output.io.bytes_written,
                    error_kind: None,
                });
                self.audit.log(&entry.success(
                    elapsed,
                    output.io.bytes_read,
                    output.io.bytes_written,
                ));
                output
                    .metadata
                    .insert("operation".to_owned(), operation.into());
                output.metadata.insert(
                    "duration_ms".to_owned(),
                    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).into(),
                );
                Ok(output)
            }
            Err(err) => {
                debug!(operation = %qualified, kind = %err.kind, "operation failed");
                self.metrics.record(&OperationSample {
                    operation: &qualified,
                    status: OperationStatus::Error,
                    duration: elapsed,
                    bytes_read: 0,
                    bytes_written: 0,
                    error_kind: Some(err.kind.as_str()),
                });
                self.audit.log(&entry.error(elapsed, err.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stepkit_telemetry::metrics::Labels;
    use stepkit_telemetry::{AuditResult, MemoryAuditLogger, MetricsRegistry, OperationMetrics};

    use super::*;
    use crate::error::ErrorKind;

    struct Echo;

    #[async_trait]
    impl BuiltinAction for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn operations(&self) -> &[&'static str] {
            &["ok", "fail"]
        }

        async fn execute(
            &self,
            operation: &str,
            _inputs: &Inputs,
            _ctx: &ActionContext,
        ) -> Result<ActionOutput, OperationError> {
            match operation {
                "ok" => Ok(ActionOutput::new("done").with_bytes_written(4)),
                _ => Err(OperationError::new(operation, ErrorKind::PathTraversal, "nope")),
            }
        }
    }

    fn wrapped() -> (Instrumented, Arc<MemoryAuditLogger>, MetricsRegistry) {
        let audit = Arc::new(MemoryAuditLogger::new());
        let registry = MetricsRegistry::new();
        let action = Instrumented::new(
            Arc::new(Echo),
            audit.clone(),
            Arc::new(OperationMetrics::new(registry.clone())),
        );
        (action, audit, registry)
    }

    #[tokio::test]
    async fn success_is_audited_and_stamped() {
        let (action, audit, registry) = wrapped();
        let mut inputs = Inputs::new();
        inputs.insert("path".into(), "a.txt".into());

        let out = action
            .execute("ok", &inputs, &ActionContext::new("wf", "s1"))
            .await
            .unwrap();

        assert_eq!(out.metadata["operation"], "ok");
        assert!(out.metadata["duration_ms"].is_u64());

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "echo.ok");
        assert_eq!(entries[0].path, "a.txt");
        assert_eq!(entries[0].result, AuditResult::Success);
        assert_eq!(entries[0].bytes_written, 4);
        assert_eq!(entries[0].workflow_id, "wf");

        assert_eq!(
            registry.counter_value("file_bytes_written_total", &Labels::none()),
            4
        );
    }

    #[tokio::test]
    async fn errors_are_forwarded_unchanged() {
        let (action, audit, registry) = wrapped();
        let err = action
            .execute("fail", &Inputs::new(), &ActionContext::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::PathTraversal);
        assert_eq!(err.message, "nope");

        let entries = audit.entries();
        assert_eq!(entries[0].result, AuditResult::Error);
        assert!(!entries[0].error_message.as_deref().unwrap_or("").is_empty());
        assert_eq!(
            registry.counter_value(
                "file_errors_total",
                &Labels::new([("error_type", "path_traversal")])
            ),
            1
        );
    }
}
