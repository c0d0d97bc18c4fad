//! # Stepkit Builtin
//!
//! The built-in actions workflow steps call to touch the outside world:
//!
//! - [`FileAction`] (`file`) -- sandboxed reads, atomic writes, listings,
//!   copies and template rendering, charged against write quotas
//! - [`UtilityAction`] (`utility`) -- random values, IDs, arithmetic,
//!   timestamps and cancellable sleeps
//! - [`ShellAction`] (`shell`) -- one command with a bounded lifetime
//!
//! All three are configured from one [`ActionConfig`] and registered with
//! [`register_builtins`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use stepkit_action::{ActionContext, ActionRegistry};
//! use stepkit_builtin::{ActionConfig, register_builtins};
//! use stepkit_telemetry::{MetricsRegistry, OperationMetrics, TracingAuditLogger};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = ActionRegistry::new();
//! register_builtins(&mut registry, &ActionConfig::new("/srv/workflow"))?;
//! let registry = registry.with_observability(
//!     Arc::new(TracingAuditLogger),
//!     Arc::new(OperationMetrics::new(MetricsRegistry::new())),
//! );
//!
//! let inputs = json!({"path": "./hello.txt", "content": "Hello"});
//! registry
//!     .dispatch("file", "write_text", inputs.as_object().unwrap(), &ActionContext::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Action configuration.
pub mod config;
mod file;
mod shell;
pub mod template;
mod utility;

use std::sync::Arc;

use stepkit_action::ActionRegistry;
use tracing::info;

pub use config::{
    ActionConfig, ConfigError, FileConfig, QuotaConfig, ShellConfig, UtilityConfig,
};
pub use file::FileAction;
pub use shell::ShellAction;
pub use utility::UtilityAction;

/// Register `file`, `utility` and `shell` built from `config`.
///
/// # Errors
///
/// Returns [`ConfigError`] when the configuration fails validation or a
/// quota prefix cannot be resolved.
pub fn register_builtins(
    registry: &mut ActionRegistry,
    config: &ActionConfig,
) -> Result<(), ConfigError> {
    config.validate()?;
    registry.register(Arc::new(FileAction::new(config)?));
    registry.register(Arc::new(UtilityAction::new(&config.utility)));
    registry.register(Arc::new(ShellAction::new(config)));
    info!(actions = registry.len(), "registered built-in actions");
    Ok(())
}
