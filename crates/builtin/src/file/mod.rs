//! The `file` action: sandboxed reads, atomic writes, listings and
//! template rendering.
//!
//! Every path-bearing input goes through the [`PathResolver`]. Every write
//! is charged to the [`QuotaTracker`] before any byte reaches the disk.

mod atomic;
mod codec;
mod fsops;
mod read;
mod write;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use stepkit_action::{
    ActionContext, ActionOutput, BuiltinAction, ErrorKind, Inputs, OperationError, ResultExt,
    unknown_operation,
};
use stepkit_sandbox::{PathResolver, QuotaTracker, ResolvedPath};
use tracing::debug;

use crate::config::{ActionConfig, ConfigError, FileConfig};

use self::atomic::WriteOptions;

const OPERATIONS: &[&str] = &[
    "read",
    "read_text",
    "read_json",
    "read_yaml",
    "read_csv",
    "read_lines",
    "write",
    "write_text",
    "write_json",
    "write_yaml",
    "append",
    "render",
    "list",
    "exists",
    "stat",
    "mkdir",
    "copy",
    "move",
    "delete",
];

/// Filesystem action confined to the configured sandbox.
///
/// # Examples
///
/// ```no_run
/// use serde_json::json;
/// use stepkit_action::{ActionContext, BuiltinAction};
/// use stepkit_builtin::{ActionConfig, FileAction};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let file = FileAction::new(&ActionConfig::new("/srv/workflow"))?;
/// let inputs = json!({"path": "./a.txt", "content": "Hello"});
/// let out = file
///     .execute("write_text", inputs.as_object().unwrap(), &ActionContext::default())
///     .await?;
/// assert_eq!(out.metadata["bytes"], 5);
/// # Ok(())
/// # }
/// ```
pub struct FileAction {
    resolver: PathResolver,
    quota: Arc<QuotaTracker>,
    files: FileConfig,
}

impl FileAction {
    /// Build the action with its own quota tracker.
    ///
    /// Quota keys are resolved with the same prefix language as paths, so
    /// `$out` caps the output directory.
    pub fn new(config: &ActionConfig) -> Result<Self, ConfigError> {
        let quota = Arc::new(QuotaTracker::new(config.quota.thresholds)?);
        Self::with_quota_tracker(config, quota)
    }

    /// Build the action around a tracker shared with other components.
    /// Configured quota limits are registered on it.
    pub fn with_quota_tracker(
        config: &ActionConfig,
        quota: Arc<QuotaTracker>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = PathResolver::new(config.dirs.clone(), config.policy.clone());
        for (prefix, bytes) in &config.quota.limits {
            if *bytes == 0 {
                return Err(ConfigError::Zero {
                    field: "quota.limits",
                });
            }
            let resolved = resolver
                .resolve(prefix)
                .map_err(|e| ConfigError::QuotaPrefix {
                    prefix: prefix.clone(),
                    message: e.to_string(),
                })?;
            debug!(prefix = %resolved, bytes, "registered write quota");
            quota.set_quota(resolved.as_path(), *bytes);
        }
        Ok(Self {
            resolver,
            quota,
            files: config.files.clone(),
        })
    }

    /// The tracker charged by writes.
    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// The resolver applied to every path input.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    fn resolve(&self, operation: &str, raw: &str) -> Result<ResolvedPath, OperationError> {
        self.resolver.resolve(raw).with_operation(operation)
    }

    fn charge(&self, operation: &str, path: &Path, bytes: u64) -> Result<(), OperationError> {
        self.quota.track_write(path, bytes).with_operation(operation)
    }

    const fn write_options(&self) -> WriteOptions {
        WriteOptions {
            fsync: self.files.fsync,
            create_parents: self.files.create_parents,
        }
    }
}

impl fmt::Debug for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAction")
            .field("resolver", &self.resolver)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BuiltinAction for FileAction {
    fn name(&self) -> &str {
        "file"
    }

    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    async fn execute(
        &self,
        operation: &str,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError> {
        ctx.check_cancelled(operation)?;
        match operation {
            "read" => self.read(inputs).await,
            "read_text" => self.read_text(inputs).await,
            "read_json" => self.read_json(inputs).await,
            "read_yaml" => self.read_structured(operation, codec::Format::Yaml, inputs).await,
            "read_csv" => self.read_structured(operation, codec::Format::Csv, inputs).await,
            "read_lines" => self.read_lines(inputs).await,
            "write" => self.write(inputs).await,
            "write_text" => self.write_text(inputs).await,
            "write_json" => self.write_encoded(operation, codec::Format::Json, inputs).await,
            "write_yaml" => self.write_encoded(operation, codec::Format::Yaml, inputs).await,
            "append" => self.append(inputs).await,
            "render" => self.render(inputs).await,
            "list" => self.list(inputs).await,
            "exists" => self.exists(inputs).await,
            "stat" => self.stat(inputs).await,
            "mkdir" => self.mkdir(inputs).await,
            "copy" => self.copy(inputs, ctx).await,
            "move" => self.move_path(inputs, ctx).await,
            "delete" => self.delete(inputs).await,
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}

/// Refuse sizes above `limit`.
fn check_size(operation: &str, size: u64, limit: u64) -> Result<(), OperationError> {
    if size > limit {
        return Err(OperationError::new(
            operation,
            ErrorKind::SizeLimit,
            format!("{size} bytes exceeds the {limit} byte limit"),
        ));
    }
    Ok(())
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(operation: &str, f: F) -> Result<T, OperationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, OperationError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join) => Err(OperationError::internal(operation, "filesystem task failed").with_cause(join)),
    }
}
