//! Write, append and render operations of the `file` action.

use serde::Deserialize;
use serde_json::Value;
use stepkit_action::{ActionOutput, ErrorKind, Inputs, OperationError, ResultExt, parse_input};
use stepkit_sandbox::ResolvedPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::atomic::write_atomic;
use super::codec::{self, Format};
use super::{FileAction, blocking, check_size};
use crate::template::Template;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WriteInput {
    path: String,
    content: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextInput {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RenderInput {
    template: String,
    output: String,
    #[serde(default)]
    data: Value,
}

/// Encode structured content. Text targets fall back to JSON.
fn encode(operation: &str, format: Format, content: &Value) -> Result<Vec<u8>, OperationError> {
    let encoded = match format {
        Format::Json | Format::Text => codec::to_json(content),
        Format::Yaml => codec::to_yaml(content),
        Format::Csv => codec::to_csv(content),
    };
    encoded.map_err(|m| {
        OperationError::new(
            operation,
            ErrorKind::Type,
            format!("cannot encode content as {}: {m}", format.as_str()),
        )
    })
}

fn write_output(path: &ResolvedPath, bytes: u64) -> ActionOutput {
    ActionOutput::new(path.to_string_lossy())
        .with_meta("bytes", bytes)
        .with_meta("path", path.to_string_lossy())
        .with_bytes_written(bytes)
}

impl FileAction {
    /// Size check, quota charge, then atomic replace.
    async fn commit(
        &self,
        operation: &str,
        path: &ResolvedPath,
        bytes: Vec<u8>,
    ) -> Result<u64, OperationError> {
        let size = bytes.len() as u64;
        check_size(operation, size, self.files.max_file_size)?;
        self.charge(operation, path.as_path(), size)?;

        let target = path.as_path().to_path_buf();
        let opts = self.write_options();
        let op = operation.to_owned();
        blocking(operation, move || write_atomic(&target, &bytes, opts).with_operation(&op)).await?;
        debug!(path = %path, bytes = size, "file written");
        Ok(size)
    }

    pub(super) async fn write(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "write";
        let input: WriteInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let format = Format::from_path(path.as_path());
        let bytes = match input.content {
            Value::String(text) => text.into_bytes(),
            other => encode(OP, format, &other)?,
        };
        let size = self.commit(OP, &path, bytes).await?;
        Ok(write_output(&path, size))
    }

    pub(super) async fn write_text(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "write_text";
        let input: TextInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let size = self.commit(OP, &path, input.content.into_bytes()).await?;
        Ok(write_output(&path, size))
    }

    pub(super) async fn write_encoded(
        &self,
        operation: &str,
        format: Format,
        inputs: &Inputs,
    ) -> Result<ActionOutput, OperationError> {
        let input: WriteInput = parse_input(operation, inputs)?;
        let path = self.resolve(operation, &input.path)?;
        let bytes = encode(operation, format, &input.content)?;
        let size = self.commit(operation, &path, bytes).await?;
        Ok(write_output(&path, size))
    }

    pub(super) async fn append(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "append";
        let input: TextInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let bytes = input.content.into_bytes();
        let size = bytes.len() as u64;
        check_size(OP, size, self.files.max_file_size)?;
        self.charge(OP, path.as_path(), size)?;

        if self.files.create_parents {
            if let Some(parent) = path.as_path().parent() {
                tokio::fs::create_dir_all(parent).await.with_operation(OP)?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_operation(OP)?;
        file.write_all(&bytes).await.with_operation(OP)?;
        file.flush().await.with_operation(OP)?;
        if self.files.fsync {
            file.sync_all().await.with_operation(OP)?;
        }
        Ok(write_output(&path, size))
    }

    pub(super) async fn render(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "render";
        let input: RenderInput = parse_input(OP, inputs)?;
        let template_path = self.resolve(OP, &input.template)?;
        let output = self.resolve(OP, &input.output)?;

        let (source, read) = self
            .load_text(OP, &template_path, self.files.max_file_size)
            .await?;
        let template = Template::parse(source).with_operation(OP)?;
        let rendered = template.render(&input.data).with_operation(OP)?;
        let size = self.commit(OP, &output, rendered.into_bytes()).await?;

        Ok(write_output(&output, size)
            .with_meta("template", template_path.to_string_lossy())
            .with_meta("output", output.to_string_lossy())
            .with_bytes_read(read))
    }
}
