//! The `shell` action: run one command with a bounded lifetime.
//!
//! A string command runs through the configured shell (`sh -c` by default);
//! a list runs directly without a shell. The child is killed when the
//! timeout fires, when the step is cancelled, or when the call is dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use stepkit_action::{
    ActionContext, ActionOutput, BuiltinAction, Inputs, OperationError, ResultExt, parse_input,
    unknown_operation,
};
use stepkit_sandbox::PathResolver;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{ActionConfig, ShellConfig};

const OPERATIONS: &[&str] = &["run"];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandLine {
    Shell(String),
    Argv(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunInput {
    command: CommandLine,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Runs external commands inside the sandboxed working directory.
pub struct ShellAction {
    resolver: PathResolver,
    config: ShellConfig,
}

impl ShellAction {
    /// Build from configuration.
    pub fn new(config: &ActionConfig) -> Self {
        Self {
            resolver: PathResolver::new(config.dirs.clone(), config.policy.clone()),
            config: config.shell.clone(),
        }
    }

    fn command(&self, line: &CommandLine) -> Result<(Command, String), OperationError> {
        const OP: &str = "run";
        match line {
            CommandLine::Shell(script) => {
                if script.trim().is_empty() {
                    return Err(OperationError::validation(OP, "command must not be empty"));
                }
                let mut cmd = Command::new(&self.config.shell);
                cmd.arg("-c").arg(script);
                Ok((cmd, self.config.shell.clone()))
            }
            CommandLine::Argv(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(OperationError::validation(OP, "command must not be empty"));
                };
                if program.is_empty() {
                    return Err(OperationError::validation(OP, "program name must not be empty"));
                }
                let mut cmd = Command::new(program);
                cmd.args(args);
                Ok((cmd, program.clone()))
            }
        }
    }

    /// The call's timeout, capped by the configured one.
    fn timeout(&self, requested: Option<u64>) -> Result<Duration, OperationError> {
        let ms = match requested {
            Some(0) => {
                return Err(OperationError::validation("run", "timeout_ms must be greater than zero"));
            }
            Some(ms) => ms.min(self.config.timeout_ms),
            None => self.config.timeout_ms,
        };
        Ok(Duration::from_millis(ms))
    }

    async fn run(&self, inputs: &Inputs, ctx: &ActionContext) -> Result<ActionOutput, OperationError> {
        const OP: &str = "run";
        let input: RunInput = parse_input(OP, inputs)?;
        let timeout = self.timeout(input.timeout_ms)?;

        let raw_dir = input
            .dir
            .as_deref()
            .or(Some(self.config.working_dir.as_str()).filter(|d| !d.is_empty()))
            .unwrap_or(".");
        let dir = self.resolver.resolve(raw_dir).with_operation(OP)?;
        let meta = tokio::fs::metadata(&dir).await.with_operation(OP)?;
        if !meta.is_dir() {
            return Err(OperationError::validation(OP, "working directory is not a directory"));
        }

        let (mut cmd, program) = self.command(&input.command)?;
        cmd.current_dir(&dir)
            .envs(&self.config.env)
            .envs(&input.env)
            .kill_on_drop(true);

        debug!(program = %program, dir = %dir, timeout_ms = timeout.as_millis() as u64, "running command");
        let output = tokio::select! {
            result = cmd.output() => result.map_err(|e| {
                OperationError::internal(OP, format!("failed to start `{program}`: {e}")).with_cause(e)
            })?,
            () = tokio::time::sleep(timeout) => {
                warn!(program = %program, timeout_ms = timeout.as_millis() as u64, "command timed out");
                return Err(OperationError::internal(
                    OP,
                    format!("command timed out after {} ms", timeout.as_millis()),
                ));
            }
            () = ctx.cancellation.cancelled() => {
                debug!(program = %program, "command cancelled");
                return Err(OperationError::cancelled(OP));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            let trimmed = stderr.trim();
            let message = if trimmed.is_empty() {
                format!("command failed: {}", output.status)
            } else {
                trimmed.to_owned()
            };
            return Err(OperationError::internal(OP, message)
                .with_suggestion(format!("`{program}` exited with code {exit_code}")));
        }

        let read = (output.stdout.len() + output.stderr.len()) as u64;
        Ok(ActionOutput::new(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
        .with_meta("dir", dir.to_string_lossy())
        .with_meta("exit_code", exit_code)
        .with_bytes_read(read))
    }
}

impl fmt::Debug for ShellAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellAction")
            .field("shell", &self.config.shell)
            .field("timeout_ms", &self.config.timeout_ms)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BuiltinAction for ShellAction {
    fn name(&self) -> &str {
        "shell"
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
            "run" => self.run(inputs, ctx).await,
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use stepkit_action::ErrorKind;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn inputs(value: Value) -> Inputs {
        match value {
            Value::Object(map) => map,
            _ => Inputs::new(),
        }
    }

    fn action(dir: &std::path::Path) -> ShellAction {
        ShellAction::new(&ActionConfig::new(dir))
    }

    #[tokio::test]
    async fn string_commands_run_through_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let out = action(dir.path())
            .execute("run", &inputs(json!({"command": "echo hi && echo err >&2"})), &ActionContext::default())
            .await
            .unwrap();
        assert_eq!(out.response["stdout"], "hi\n");
        assert_eq!(out.response["stderr"], "err\n");
        assert_eq!(out.response["exit_code"], 0);
    }

    #[tokio::test]
    async fn list_commands_skip_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let out = action(dir.path())
            .execute("run", &inputs(json!({"command": ["echo", "$HOME"]})), &ActionContext::default())
            .await
            .unwrap();
        assert_eq!(out.response["stdout"], "$HOME\n");
    }

    #[tokio::test]
    async fn runs_in_the_workflow_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let out = action(dir.path())
            .execute("run", &inputs(json!({"command": "pwd", "dir": "sub"})), &ActionContext::default())
            .await
            .unwrap();
        let printed = out.response["stdout"].as_str().unwrap().trim().to_owned();
        assert!(printed.ends_with("sub"), "{printed}");
    }

    #[tokio::test]
    async fn caller_env_overrides_configured_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ActionConfig::new(dir.path());
        config.shell.env.insert("GREETING".into(), "config".into());
        config.shell.env.insert("OTHER".into(), "kept".into());
        let out = ShellAction::new(&config)
            .execute(
                "run",
                &inputs(json!({"command": "echo $GREETING $OTHER", "env": {"GREETING": "caller"}})),
                &ActionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.response["stdout"], "caller kept\n");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_trimmed_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = action(dir.path())
            .execute("run", &inputs(json!({"command": "echo '  boom  ' >&2; exit 3"})), &ActionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "boom");
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = action(dir.path())
            .execute("run", &inputs(json!({"command": "sleep 5", "timeout_ms": 50})), &ActionContext::default())
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_stops_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let ctx = ActionContext::default().with_cancellation(token.clone());
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });
        let err = action(dir.path())
            .execute("run", &inputs(json!({"command": "sleep 5"})), &ctx)
            .await
            .unwrap_err();
        cancel.await.unwrap();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn directory_outside_the_sandbox_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = action(dir.path())
            .execute("run", &inputs(json!({"command": "true", "dir": "../"})), &ActionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathTraversal);
    }

    #[tokio::test]
    async fn empty_commands_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shell = action(dir.path());
        for command in [json!(""), json!([])] {
            let err = shell
                .execute("run", &inputs(json!({"command": command})), &ActionContext::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation);
        }
    }
}
