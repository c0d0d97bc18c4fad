//! Boundary between the dynamic input map and typed per-operation inputs.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::OperationError;

/// Dynamic inputs as supplied by a workflow step.
pub type Inputs = Map<String, Value>;

/// Keys inspected, in order, for the path recorded in audit entries.
const PATH_KEYS: &[&str] = &["path", "source", "template", "output", "dir"];

/// Deserialize `inputs` into the operation's input struct.
///
/// Missing, unknown or mistyped keys become a validation error whose
/// message names the key.
pub fn parse_input<T: DeserializeOwned>(operation: &str, inputs: &Inputs) -> Result<T, OperationError> {
    serde_json::from_value(Value::Object(inputs.clone()))
        .map_err(|e| OperationError::validation(operation, format!("invalid input: {e}")))
}

/// Best-effort primary path of a call, empty when none is present.
pub fn primary_path(inputs: &Inputs) -> String {
    PATH_KEYS
        .iter()
        .find_map(|key| inputs.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_owned()
}
