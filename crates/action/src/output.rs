use serde::Serialize;
use serde_json::{Map, Value};

/// Bytes moved by one operation; reported to metrics and audit, not to the
/// caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Bytes read from disk.
    pub bytes_read: u64,
    /// Bytes written to disk.
    pub bytes_written: u64,
}

/// Successful result of an operation: the primary value plus metadata.
///
/// `metadata` is always present, possibly empty.
///
/// # Examples
///
/// ```
/// use stepkit_action::ActionOutput;
///
/// let out = ActionOutput::new("Hello")
///     .with_meta("bytes", 5)
///     .with_bytes_read(5);
/// assert_eq!(out.response, "Hello");
/// assert_eq!(out.metadata["bytes"], 5);
/// assert_eq!(out.io.bytes_read, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutput {
    /// The primary value.
    pub response: Value,
    /// Auxiliary keys such as `bytes`, `path` or `created`.
    pub metadata: Map<String, Value>,
    /// I/O accounting for observability.
    #[serde(skip)]
    pub io: IoStats,
}

impl ActionOutput {
    /// Output with empty metadata.
    pub fn new(response: impl Into<Value>) -> Self {
        Self {
            response: response.into(),
            metadata: Map::new(),
            io: IoStats::default(),
        }
    }

    /// Add one metadata key.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Record bytes read.
    #[must_use]
    pub const fn with_bytes_read(mut self, bytes: u64) -> Self {
        self.io.bytes_read = bytes;
        self
    }

    /// Record bytes written.
    #[must_use]
    pub const fn with_bytes_written(mut self, bytes: u64) -> Self {
        self.io.bytes_written = bytes;
        self
    }

    /// Look up a metadata key.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_without_io_stats() {
        let out = ActionOutput::new(json!([1, 2]))
            .with_meta("path", "/w/a.txt")
            .with_bytes_written(9);
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"response": [1, 2], "metadata": {"path": "/w/a.txt"}})
        );
    }

    #[test]
    fn metadata_is_never_absent() {
        let out = ActionOutput::new(true);
        assert!(out.metadata.is_empty());
        assert_eq!(serde_json::to_value(&out).unwrap()["metadata"], json!({}));
    }
}
