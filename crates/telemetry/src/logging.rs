//! Subscriber initialisation.
//!
//! Installs a global `tracing` subscriber built from a [`LogConfig`]:
//! an [`EnvFilter`] followed by one `fmt` layer in the chosen format.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the `fmt` layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented.
    Pretty,
    /// Single line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `stepkit=debug,warn`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Emit ANSI colours (ignored for JSON).
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
            ansi: true,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The filter directive did not parse.
    #[error("invalid log filter `{directive}`: {message}")]
    Filter {
        /// The rejected directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber is already installed.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

impl LogConfig {
    /// Config for a given filter directive with default format.
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    fn filter(&self) -> Result<EnvFilter, LogError> {
        EnvFilter::try_new(&self.level).map_err(|e| LogError::Filter {
            directive: self.level.clone(),
            message: e.to_string(),
        })
    }

    /// Install the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Filter`] for a bad directive and
    /// [`LogError::AlreadyInitialized`] if any global subscriber exists.
    pub fn init(&self) -> Result<(), LogError> {
        let filter = self.filter()?;
        let registry = Registry::default().with(filter);

        let result = match self.format {
            LogFormat::Pretty => registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(self.ansi))
                .try_init(),
            LogFormat::Compact => registry
                .with(tracing_subscriber::fmt::layer().compact().with_ansi(self.ansi))
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_ansi(false),
                )
                .try_init(),
        };

        result.map_err(|_| LogError::AlreadyInitialized)
    }
}

/// Install a compact subscriber at `level`.
///
/// # Errors
///
/// See [`LogConfig::init`].
pub fn init(level: &str) -> Result<(), LogError> {
    LogConfig::with_level(level).init()
}
