use tokio_util::sync::CancellationToken;

use crate::error::OperationError;

/// Per-call execution context.
///
/// Carries the identifiers stamped into audit records and the cancellation
/// signal long-running operations race against.
///
/// Actions **must** check [`check_cancelled`](Self::check_cancelled) between
/// blocking steps and select on [`cancellation`](Self::cancellation) while
/// waiting.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// Workflow this call belongs to.
    pub workflow_id: String,
    /// Step within the workflow.
    pub step_id: String,
    /// Cancellation signal.
    pub cancellation: CancellationToken,
}

impl ActionContext {
    /// Context with a fresh, untriggered token.
    pub fn new(workflow_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail with a cancellation error if the token has fired.
    pub fn check_cancelled(&self, operation: &str) -> Result<(), OperationError> {
        if self.cancellation.is_cancelled() {
            Err(OperationError::cancelled(operation))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_cancelled_reports_cancellation() {
        let ctx = ActionContext::new("wf", "step");
        assert!(ctx.check_cancelled("sleep").is_ok());

        ctx.cancellation.cancel();
        let err = ctx.check_cancelled("sleep").unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.operation, "sleep");
    }

    #[test]
    fn clones_share_the_token() {
        let ctx = ActionContext::new("wf", "step");
        let child = ctx.clone();
        ctx.cancellation.cancel();
        assert!(child.is_cancelled());
    }
}
