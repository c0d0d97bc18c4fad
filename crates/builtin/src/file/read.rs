//! Read operations of the `file` action.

use serde::Deserialize;
use serde_json::Value;
use stepkit_action::{ActionOutput, ErrorKind, Inputs, OperationError, ResultExt, parse_input};
use stepkit_sandbox::ResolvedPath;
use tracing::debug;

use super::codec::{self, Format};
use super::{FileAction, check_size};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathInput {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadJsonInput {
    path: String,
    #[serde(default)]
    extract: Option<String>,
}

fn parse_error(operation: &str, message: String) -> OperationError {
    OperationError::new(operation, ErrorKind::ParseError, message)
}

impl FileAction {
    /// Read and decode a file whose size is at most `limit`.
    pub(super) async fn load_text(
        &self,
        operation: &str,
        path: &ResolvedPath,
        limit: u64,
    ) -> Result<(String, u64), OperationError> {
        let meta = tokio::fs::metadata(path).await.with_operation(operation)?;
        if meta.is_dir() {
            return Err(OperationError::validation(operation, "path is a directory"));
        }
        check_size(operation, meta.len(), limit)?;
        let bytes = tokio::fs::read(path).await.with_operation(operation)?;
        let size = bytes.len() as u64;
        let text = codec::decode_text(bytes).map_err(|m| parse_error(operation, m))?;
        Ok((text, size))
    }

    fn read_output(path: &ResolvedPath, response: Value, bytes: u64) -> ActionOutput {
        ActionOutput::new(response)
            .with_meta("bytes", bytes)
            .with_meta("path", path.to_string_lossy())
            .with_bytes_read(bytes)
    }

    pub(super) async fn read(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "read";
        let input: PathInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let format = Format::from_path(path.as_path());

        if !format.is_structured() {
            let (text, bytes) = self.load_text(OP, &path, self.files.max_file_size).await?;
            return Ok(Self::read_output(&path, Value::String(text), bytes).with_meta("format", "text"));
        }

        let (text, bytes) = self.load_text(OP, &path, self.files.max_parse_size).await?;
        match codec::parse(format, &text) {
            Ok(value) => Ok(Self::read_output(&path, value, bytes).with_meta("format", format.as_str())),
            Err(message) if self.files.parse_fallback_to_text => {
                debug!(path = %path, error = %message, "structured parse failed, returning raw text");
                Ok(Self::read_output(&path, Value::String(text), bytes).with_meta("format", "text"))
            }
            Err(message) => Err(parse_error(OP, message)),
        }
    }

    pub(super) async fn read_text(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "read_text";
        let input: PathInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let (text, bytes) = self.load_text(OP, &path, self.files.max_file_size).await?;
        Ok(Self::read_output(&path, Value::String(text), bytes))
    }

    pub(super) async fn read_lines(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "read_lines";
        let input: PathInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let (text, bytes) = self.load_text(OP, &path, self.files.max_file_size).await?;
        let lines: Vec<Value> = text.lines().map(|l| Value::String(l.to_owned())).collect();
        let count = lines.len();
        Ok(Self::read_output(&path, Value::Array(lines), bytes).with_meta("lines", count))
    }

    pub(super) async fn read_json(&self, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "read_json";
        let input: ReadJsonInput = parse_input(OP, inputs)?;
        let path = self.resolve(OP, &input.path)?;
        let (text, bytes) = self.load_text(OP, &path, self.files.max_parse_size).await?;
        let doc = codec::parse_json(&text).map_err(|m| parse_error(OP, m))?;

        let response = match input.extract.as_deref() {
            Some(expr) => codec::extract(&doc, expr)
                .map_err(|m| OperationError::validation(OP, m))?
                .clone(),
            None => doc,
        };
        Ok(Self::read_output(&path, response, bytes))
    }

    pub(super) async fn read_structured(
        &self,
        operation: &str,
        format: Format,
        inputs: &Inputs,
    ) -> Result<ActionOutput, OperationError> {
        let input: PathInput = parse_input(operation, inputs)?;
        let path = self.resolve(operation, &input.path)?;
        let (text, bytes) = self
            .load_text(operation, &path, self.files.max_parse_size)
            .await?;
        let value = codec::parse(format, &text).map_err(|m| parse_error(operation, m))?;
        let rows = match (&value, format) {
            (Value::Array(rows), Format::Csv) => Some(rows.len()),
            _ => None,
        };
        let out = Self::read_output(&path, value, bytes);
        Ok(match rows {
            Some(count) => out.with_meta("rows", count),
            None => out,
        })
    }
}
