//! Directory and metadata operations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use stepkit_action::{
    ActionContext, ActionOutput, Inputs, OperationError, ResultExt, parse_input,
};
use stepkit_sandbox::path::is_within;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::atomic::{WriteOptions, copy_atomic};
use super::{FileAction, blocking, check_size};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathInput {
    path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EntryFilter {
    Files,
    Dirs,
    #[default]
    All,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListInput {
    #[serde(default = "current_dir")]
    path: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default, rename = "type")]
    filter: EntryFilter,
}

fn current_dir() -> String {
    ".".to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MkdirInput {
    path: String,
    #[serde(default)]
    parents: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransferInput {
    source: String,
    dest: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MoveInput {
    source: String,
    dest: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteInput {
    path: String,
    #[serde(default)]
    recursive: bool,
}

fn mod_time(meta: &fs::Metadata) -> Value {
    meta.modified()
        .map(|t| Value::String(rfc3339(t)))
        .unwrap_or(Value::Null)
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn mode_string(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:04o}", meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn mode_string(meta: &fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "0444".to_owned()
    } else {
        "0666".to_owned()
    }
}

/// Compiled `list` pattern. Patterns without `/` match entry names; others
/// match the path relative to the listed directory, where `**` spans
/// directories.
struct Matcher {
    pattern: glob::Pattern,
    by_path: bool,
}

impl Matcher {
    fn new(operation: &str, raw: &str) -> Result<Self, OperationError> {
        let pattern = glob::Pattern::new(raw)
            .map_err(|e| OperationError::validation(operation, format!("invalid pattern: {e}")))?;
        Ok(Self {
            pattern,
            by_path: raw.contains('/'),
        })
    }

    fn matches(&self, relative: &Path) -> bool {
        if self.by_path {
            let opts = glob::MatchOptions {
                require_literal_separator: true,
                ..glob::MatchOptions::new()
            };
            self.pattern.matches_path_with(relative, opts)
        } else {
            relative
                .file_name()
                .is_some_and(|name| self.pattern.matches(&name.to_string_lossy()))
        }
    }
}

/// Files and directories of a tree, gathered before anything is copied.
#[derive(Debug, Default)]
struct CopyPlan {
    dirs: Vec<PathBuf>,
    files: Vec<(PathBuf, u64)>,
    skipped: usize,
    total_bytes: u64,
}

/// Walk `source` without following symlinks. Symlinks inside the tree are
/// skipped so a copy can never pull content from outside the sandbox.
fn plan_tree(operation: &str, source: &Path, max_file_size: u64) -> Result<CopyPlan, OperationError> {
    let mut plan = CopyPlan::default();
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from).with_operation(operation)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map(Path::to_path_buf)
            .map_err(|_| OperationError::internal(operation, "walk left the source tree"))?;
        let kind = entry.file_type();
        if kind.is_symlink() {
            warn!(path = %entry.path().display(), "skipping symlink inside copied tree");
            plan.skipped += 1;
        } else if kind.is_dir() {
            plan.dirs.push(relative);
        } else {
            let size = entry.metadata().map_err(io::Error::from).with_operation(operation)?.len();
            check_size(operation, size, max_file_size)?;
            plan.total_bytes = plan.total_bytes.saturating_add(size);
            plan.files.push((relative, size));
        }
    }
    Ok(plan)
}

fn execute_plan(
    operation: &str,
    plan: &CopyPlan,
    source: &Path,
    dest: &Path,
    opts: WriteOptions,
    cancel: &CancellationToken,
) -> Result<(), OperationError> {
    for dir in &plan.dirs {
        fs::create_dir_all(dest.join(dir)).with_operation(operation)?;
    }
    for (file, _) in &plan.files {
        if cancel.is_cancelled() {
            return Err(OperationError::cancelled(operation));
        }
        copy_atomic(&source.join(file), &dest.join(file), opts).with_operation(operation)?;
    }
    Ok(())
}

impl FileAction {
    pub(super) async fn list(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "list";
        let input: ListInput = parse_input(OP, inputs)?;
        let root = self.resolve(OP, &input.path)?;
        let matcher = input
            .pattern
            .as_deref()
            .map(|p| Matcher::new(OP, p))
            .transpose()?;

        let meta = tokio::fs::metadata(&root).await.with_operation(OP)?;
        if !meta.is_dir() {
            return Err(OperationError::validation(OP, "path is not a directory"));
        }

        let root_path = root.as_path().to_path_buf();
        let recursive = input.recursive;
        let filter = input.filter;
        let mut entries = blocking(OP, move || {
            let depth = if recursive { usize::MAX } else { 1 };
            let mut found = Vec::new();
            for entry in WalkDir::new(&root_path).min_depth(1).max_depth(depth) {
                let entry = entry.map_err(io::Error::from).with_operation(OP)?;
                let is_dir = entry.file_type().is_dir();
                let keep = match filter {
                    EntryFilter::Files => !is_dir,
                    EntryFilter::Dirs => is_dir,
                    EntryFilter::All => true,
                };
                let relative = entry.path().strip_prefix(&root_path).unwrap_or(entry.path());
                if !keep || matcher.as_ref().is_some_and(|m| !m.matches(relative)) {
                    continue;
                }
                let meta = entry.metadata().map_err(io::Error::from).with_operation(OP)?;
                found.push((
                    entry.path().to_string_lossy().into_owned(),
                    json!({
                        "name": entry.file_name().to_string_lossy(),
                        "path": entry.path().to_string_lossy(),
                        "size": if is_dir { 0 } else { meta.len() },
                        "isDir": is_dir,
                        "modTime": mod_time(&meta),
                    }),
                ));
            }
            Ok(found)
        })
        .await?;

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let count = entries.len();
        let items: Vec<Value> = entries.into_iter().map(|(_, v)| v).collect();
        Ok(ActionOutput::new(Value::Array(items))
            .with_meta("path", root.to_string_lossy())
            .with_meta("count", count))
    }

    pub(super) async fn exists(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "exists";
        let input: PathInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let exists = tokio::fs::try_exists(&path).await.with_operation(OP)?;
        Ok(ActionOutput::new(exists).with_meta("path", path.to_string_lossy()))
    }

    pub(super) async fn stat(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "stat";
        let input: PathInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let meta = tokio::fs::metadata(&path).await.with_operation(OP)?;
        let response = json!({
            "name": file_name(path.as_path()),
            "size": meta.len(),
            "isDir": meta.is_dir(),
            "modTime": mod_time(&meta),
            "mode": mode_string(&meta),
        });
        Ok(ActionOutput::new(response).with_meta("path", path.to_string_lossy()))
    }

    pub(super) async fn mkdir(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "mkdir";
        let input: MkdirInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Ok(ActionOutput::new(path.to_string_lossy())
                    .with_meta("path", path.to_string_lossy())
                    .with_meta("created", false));
            }
            Ok(_) => {
                return Err(OperationError::validation(
                    OP,
                    "path exists and is not a directory",
                ));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_operation(OP),
        }

        if input.parents {
            tokio::fs::create_dir_all(&path).await.with_operation(OP)?;
        } else {
            tokio::fs::create_dir(&path).await.with_operation(OP)?;
        }
        debug!(path = %path, "directory created");
        Ok(ActionOutput::new(path.to_string_lossy())
            .with_meta("path", path.to_string_lossy())
            .with_meta("created", true))
    }

    pub(super) async fn copy(
        &self,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError> {
        const OP: &str = "copy";
        let input: TransferInput = parse_input(OP, inputs)?;
        let source = self.resolve(OP, &input.source)?;
        let dest = self.resolve(OP, &input.dest)?;
        let meta = tokio::fs::metadata(&source).await.with_operation(OP)?;

        let (bytes, skipped) = if meta.is_dir() {
            if !input.recursive {
                return Err(OperationError::validation(
                    OP,
                    "source is a directory; set recursive to copy it",
                ));
            }
            self.copy_tree(OP, source.as_path(), dest.as_path(), ctx).await?
        } else {
            let size = meta.len();
            check_size(OP, size, self.files.max_file_size)?;
            self.charge(OP, dest.as_path(), size)?;
            let (src, dst) = (source.as_path().to_path_buf(), dest.as_path().to_path_buf());
            let opts = self.write_options();
            blocking(OP, move || copy_atomic(&src, &dst, opts).with_operation(OP)).await?;
            (size, 0)
        };

        Ok(ActionOutput::new(dest.to_string_lossy())
            .with_meta("source", source.to_string_lossy())
            .with_meta("dest", dest.to_string_lossy())
            .with_meta("bytes", bytes)
            .with_meta("skipped", skipped)
            .with_bytes_read(bytes)
            .with_bytes_written(bytes))
    }

    /// Plan, charge the whole tree to the quota, then copy.
    async fn copy_tree(
        &self,
        operation: &'static str,
        source: &Path,
        dest: &Path,
        ctx: &ActionContext,
    ) -> Result<(u64, usize), OperationError> {
        if is_within(dest, source) {
            return Err(OperationError::validation(
                operation,
                "cannot copy a directory into itself",
            ));
        }

        let limit = self.files.max_file_size;
        let src = source.to_path_buf();
        let plan = blocking(operation, move || plan_tree(operation, &src, limit)).await?;
        let (total, skipped, files) = (plan.total_bytes, plan.skipped, plan.files.len());
        self.charge(operation, dest, total)?;
        ctx.check_cancelled(operation)?;

        let (src, dst) = (source.to_path_buf(), dest.to_path_buf());
        let (opts, cancel) = (self.write_options(), ctx.cancellation.clone());
        blocking(operation, move || execute_plan(operation, &plan, &src, &dst, opts, &cancel)).await?;
        debug!(
            source = %source.display(),
            dest = %dest.display(),
            files,
            bytes = total,
            "directory copied"
        );
        Ok((total, skipped))
    }

    async fn ensure_parent(&self, operation: &str, path: &Path) -> Result<(), OperationError> {
        if !self.files.create_parents {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_operation(operation)?;
        }
        Ok(())
    }

    /// Rename, or copy then delete when the rename crosses devices.
    pub(super) async fn move_path(
        &self,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError> {
        const OP: &str = "move";
        let input: MoveInput = parse_input(OP, inputs)?;
        let source = self.resolve(OP, &input.source)?;
        let dest = self.resolve(OP, &input.dest)?;
        let meta = tokio::fs::metadata(&source).await.with_operation(OP)?;

        if meta.is_dir() && is_within(dest.as_path(), source.as_path()) {
            return Err(OperationError::validation(OP, "cannot move a directory into itself"));
        }

        let size = if meta.is_dir() {
            let src = source.as_path().to_path_buf();
            let limit = self.files.max_file_size;
            blocking(OP, move || plan_tree(OP, &src, limit)).await?.total_bytes
        } else {
            meta.len()
        };
        self.charge(OP, dest.as_path(), size)?;
        self.ensure_parent(OP, dest.as_path()).await?;

        let mut method = "rename";
        match tokio::fs::rename(&source, &dest).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                debug!(source = %source, dest = %dest, "rename crosses devices, copying");
                method = "copy";
                if meta.is_dir() {
                    let src = source.as_path().to_path_buf();
                    let dst = dest.as_path().to_path_buf();
                    let limit = self.files.max_file_size;
                    let (opts, cancel) = (self.write_options(), ctx.cancellation.clone());
                    blocking(OP, move || {
                        let plan = plan_tree(OP, &src, limit)?;
                        execute_plan(OP, &plan, &src, &dst, opts, &cancel)?;
                        fs::remove_dir_all(&src).with_operation(OP)
                    })
                    .await?;
                } else {
                    let (src, dst) = (source.as_path().to_path_buf(), dest.as_path().to_path_buf());
                    let opts = self.write_options();
                    blocking(OP, move || copy_atomic(&src, &dst, opts).with_operation(OP)).await?;
                    tokio::fs::remove_file(&source).await.with_operation(OP)?;
                }
            }
            Err(err) => return Err(err).with_operation(OP),
        }

        Ok(ActionOutput::new(dest.to_string_lossy())
            .with_meta("source", source.to_string_lossy())
            .with_meta("dest", dest.to_string_lossy())
            .with_meta("bytes", size)
            .with_meta("method", method)
            .with_bytes_written(size))
    }

    pub(super) async fn delete(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "delete";
        let input: DeleteInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;

        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ActionOutput::new(false)
                    .with_meta("path", path.to_string_lossy())
                    .with_meta("deleted", false));
            }
            Err(err) => return Err(err).with_operation(OP),
        };

        if meta.is_dir() {
            if !input.recursive {
                return Err(OperationError::validation(
                    OP,
                    "path is a directory; set recursive to delete it",
                ));
            }
            tokio::fs::remove_dir_all(&path).await.with_operation(OP)?;
        } else {
            tokio::fs::remove_file(&path).await.with_operation(OP)?;
        }
        debug!(path = %path, "deleted");
        Ok(ActionOutput::new(true)
            .with_meta("path", path.to_string_lossy())
            .with_meta("deleted", true))
    }
}
