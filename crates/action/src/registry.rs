//! Name-keyed dispatch over registered actions, with optional audit and metrics.

use std::collections::HashMap;
use std::sync::Arc;

use stepkit_telemetry::{AuditLogger, OperationMetricsSink};

use crate::action::{BuiltinAction, unknown_operation};
use crate::context::ActionContext;
use crate::error::OperationError;
use crate::input::Inputs;
use crate::output::ActionOutput;
use crate::wrapper::Instrumented;

/// Dispatcher from `(action, operation)` to a registered implementation.
///
/// Actions are stored as `Arc<dyn BuiltinAction>` so concurrent steps share
/// one instance and its quota ledger.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use stepkit_action::{
///     ActionContext, ActionOutput, ActionRegistry, BuiltinAction, Inputs, OperationError,
/// };
///
/// struct Ping;
///
/// #[async_trait]
/// impl BuiltinAction for Ping {
///     fn name(&self) -> &str { "ping" }
///     fn operations(&self) -> &[&'static str] { &["pong"] }
///     async fn execute(
///         &self,
///         _operation: &str,
///         _inputs: &Inputs,
///         _ctx: &ActionContext,
///     ) -> Result<ActionOutput, OperationError> {
///         Ok(ActionOutput::new("pong"))
///     }
/// }
///
/// let mut registry = ActionRegistry::new();
/// registry.register(Arc::new(Ping));
/// assert!(registry.contains("ping"));
/// assert_eq!(registry.operations(), vec!["ping.pong".to_string()]);
/// ```
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn BuiltinAction>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Overwrites any existing action with the same name.
    pub fn register(&mut self, action: Arc<dyn BuiltinAction>) {
        self.actions.insert(action.name().to_owned(), action);
    }

    /// Look up an action by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn BuiltinAction>> {
        self.actions.get(name)
    }

    /// Check whether an action with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Remove an action by name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn BuiltinAction>> {
        self.actions.remove(name)
    }

    /// Every `action.operation` pair, sorted.
    pub fn operations(&self) -> Vec<String> {
        let mut ops: Vec<String> = self
            .actions
            .iter()
            .flat_map(|(name, action)| {
                action
                    .operations()
                    .iter()
                    .map(move |op| format!("{name}.{op}"))
            })
            .collect();
        ops.sort();
        ops
    }

    /// Wrap every registered action with timing, metrics and audit.
    #[must_use]
    pub fn with_observability(
        self,
        audit: Arc<dyn AuditLogger>,
        metrics: Arc<dyn OperationMetricsSink>,
    ) -> Self {
        let actions = self
            .actions
            .into_iter()
            .map(|(name, action)| {
                let wrapped: Arc<dyn BuiltinAction> =
                    Arc::new(Instrumented::new(action, audit.clone(), metrics.clone()));
                (name, wrapped)
            })
            .collect();
        Self { actions }
    }

    /// Run `operation` on the action registered as `action`.
    ///
    /// Unknown actions and operations are validation errors.
    pub async fn dispatch(
        &self,
        action: &str,
        operation: &str,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError> {
        let Some(target) = self.actions.get(action) else {
            return Err(OperationError::validation(
                operation,
                format!("unknown action `{action}`"),
            ));
        };
        if !target.operations().iter().any(|op| *op == operation) {
            return Err(unknown_operation(action, operation));
        }
        target.execute(operation, inputs, ctx).await
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("count", &self.actions.len())
            .field("keys", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
