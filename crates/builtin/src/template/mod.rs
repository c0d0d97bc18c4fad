//! Sandboxed text templates.
//!
//! A Go-style template language rendered against JSON data:
//!
//! - `{{ .field.path }}`, `{{ . }}`, `{{ $ }}` and `{{ $var.path }}`
//! - pipelines: `{{ .name | trim | upper }}`; the piped value becomes the
//!   last argument
//! - `{{ if }}…{{ else if }}…{{ else }}…{{ end }}`
//! - `{{ range $i, $v := .items }}…{{ else }}…{{ end }}`
//! - `{{ with .x }}…{{ end }}`
//! - `{{ $x := … }}` and `{{ $x = … }}`
//! - `{{/* comments */}}`, and `{{-`/`-}}` whitespace trimming
//!
//! Only the functions in [`FUNCTIONS`] exist. Referencing any other name
//! fails at parse time with [`TemplateError::UnknownFunction`].

mod exec;
mod funcs;
mod lex;
mod parse;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepkit_action::{ErrorKind, IntoOperationError, OperationError};
use tracing::trace;

pub use funcs::FUNCTIONS;

/// Maximum number of actions in a single template.
const MAX_TEMPLATE_ACTIONS: usize = 10_000;

/// Position in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, in characters).
    pub column: usize,
}

impl Position {
    /// Line and column of byte `offset` in `source`.
    pub fn at(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = source.get(..offset).unwrap_or(source);
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = before[line_start..].chars().count() + 1;
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Errors from parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// The template is malformed.
    #[error("template syntax error at {position}: {message}")]
    Syntax {
        /// Where the problem was found.
        position: Position,
        /// What is wrong.
        message: String,
    },

    /// The template references a function outside the whitelist.
    #[error("function `{name}` is not available in templates ({position})")]
    UnknownFunction {
        /// The referenced name.
        name: String,
        /// Where it was referenced.
        position: Position,
    },

    /// Rendering failed.
    #[error("template execution failed at {position}: {message}")]
    Exec {
        /// The action that failed.
        position: Position,
        /// What went wrong.
        message: String,
    },

    /// The template has more actions than allowed.
    #[error("template contains too many actions: {count} (max {max})")]
    TooManyActions {
        /// Actions found.
        count: usize,
        /// The limit.
        max: usize,
    },
}

impl TemplateError {
    pub(crate) fn syntax(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position: Position::at(source, offset),
            message: message.into(),
        }
    }

    pub(crate) fn exec(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self::Exec {
            position: Position::at(source, offset),
            message: message.into(),
        }
    }

    pub(crate) fn unknown_function(source: &str, offset: usize, name: &str) -> Self {
        Self::UnknownFunction {
            name: name.to_owned(),
            position: Position::at(source, offset),
        }
    }

    /// Where the error occurred, if known.
    pub const fn position(&self) -> Option<Position> {
        match self {
            Self::Syntax { position, .. }
            | Self::UnknownFunction { position, .. }
            | Self::Exec { position, .. } => Some(*position),
            Self::TooManyActions { .. } => None,
        }
    }
}

impl IntoOperationError for TemplateError {
    fn for_operation(self, operation: &str) -> OperationError {
        let kind = match &self {
            Self::UnknownFunction { .. } => ErrorKind::Validation,
            _ => ErrorKind::TemplateError,
        };
        OperationError::new(operation, kind, self.to_string())
            .with_suggestion(format!("templates may only call: {}", FUNCTIONS.join(", ")))
            .with_cause(self)
    }
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone)]
pub struct Template {
    source: Arc<str>,
    nodes: Vec<parse::Node>,
}

impl Template {
    /// Parse `source`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] for malformed input and
    /// [`TemplateError::UnknownFunction`] for names outside the whitelist.
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source: Arc<str> = Arc::from(source.into());
        let items = lex::split(&source)?;

        let count = items
            .iter()
            .filter(|i| matches!(i, lex::Item::Action { .. }))
            .count();
        if count > MAX_TEMPLATE_ACTIONS {
            return Err(TemplateError::TooManyActions {
                count,
                max: MAX_TEMPLATE_ACTIONS,
            });
        }

        let nodes = parse::Parser::new(&source, items).parse()?;
        trace!(actions = count, "parsed template");
        Ok(Self { source, nodes })
    }

    /// The original source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against `data`, which becomes `.` and `$`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Exec`] when evaluation fails.
    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        exec::Exec::new(&self.source, data).run(&self.nodes, data)
    }
}

/// Parse and render in one step.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stepkit_builtin::template::render;
///
/// let out = render("Hi {{ .name | upper }}!", &json!({"name": "ada"})).unwrap();
/// assert_eq!(out, "Hi ADA!");
/// ```
pub fn render(source: &str, data: &Value) -> Result<String, TemplateError> {
    Template::parse(source)?.render(data)
}
