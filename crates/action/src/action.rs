use async_trait::async_trait;

use crate::context::ActionContext;
use crate::error::OperationError;
use crate::input::Inputs;
use crate::output::ActionOutput;

/// A built-in action: a named set of operations sharing configuration.
///
/// Instances outlive any single call and are shared across workers as
/// `Arc<dyn BuiltinAction>`.
#[async_trait]
pub trait BuiltinAction: Send + Sync {
    /// Registry key, e.g. `file`.
    fn name(&self) -> &str;

    /// Operations this action accepts.
    fn operations(&self) -> &[&'static str];

    /// Run one operation.
    ///
    /// Unknown operations return a validation error.
    async fn execute(
        &self,
        operation: &str,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError>;
}

/// Validation error for an operation the action does not provide.
pub fn unknown_operation(action: &str, operation: &str) -> OperationError {
    OperationError::validation(operation, format!("unknown {action} operation `{operation}`"))
}
