//! Action configuration.
//!
//! One [`ActionConfig`] is shared by the file, utility and shell actions.
//! Every field has a default, so an empty document is a valid config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stepkit_sandbox::{BaseDirs, QuotaError, QuotaThresholds, SandboxPolicy};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("failed to read config file `{}`: {source}", path.display())]
    Read {
        /// The file that could not be read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension is not `.yaml`, `.yml` or `.json`.
    #[error("unsupported config format for `{}`", path.display())]
    UnsupportedFormat {
        /// The rejected path.
        path: PathBuf,
    },

    /// YAML did not deserialize.
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON did not deserialize.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Quota thresholds are out of range.
    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// A numeric setting must be positive.
    #[error("`{field}` must be greater than zero")]
    Zero {
        /// Dotted name of the setting.
        field: &'static str,
    },

    /// A quota prefix could not be resolved.
    #[error("quota prefix `{prefix}` is invalid: {message}")]
    QuotaPrefix {
        /// The configured prefix.
        prefix: String,
        /// Why it was rejected.
        message: String,
    },
}

const fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

const fn default_max_parse_size() -> u64 {
    10 * 1024 * 1024
}

const fn default_true() -> bool {
    true
}

const fn default_shell_timeout_ms() -> u64 {
    30_000
}

fn default_shell() -> String {
    "sh".to_owned()
}

const fn default_max_id_length() -> usize {
    256
}

/// Size limits and write behaviour of the file action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Largest file read as text or copied.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Largest file parsed as JSON, YAML or CSV.
    #[serde(default = "default_max_parse_size")]
    pub max_parse_size: u64,
    /// `fsync` the temp file before the atomic rename.
    #[serde(default)]
    pub fsync: bool,
    /// Create missing parent directories on write.
    #[serde(default = "default_true")]
    pub create_parents: bool,
    /// `read` returns raw text when a structured file does not parse,
    /// instead of failing with `parse_error`.
    #[serde(default)]
    pub parse_fallback_to_text: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_parse_size: default_max_parse_size(),
            fsync: false,
            create_parents: true,
            parse_fallback_to_text: false,
        }
    }
}

/// Write quotas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    /// Warn and refuse fractions.
    pub thresholds: QuotaThresholds,
    /// Byte caps keyed by path; keys use the path prefix language
    /// (`$out`, `$temp/logs`, …).
    pub limits: BTreeMap<String, u64>,
}

/// Defaults for the shell action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    /// Working directory; empty means the workflow directory.
    #[serde(default)]
    pub working_dir: String,
    /// Upper bound on command run time.
    #[serde(default = "default_shell_timeout_ms")]
    pub timeout_ms: u64,
    /// Variables merged over the parent environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Interpreter for string commands, invoked as `<shell> -c <command>`.
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            working_dir: String::new(),
            timeout_ms: default_shell_timeout_ms(),
            env: BTreeMap::new(),
            shell: default_shell(),
        }
    }
}

/// Defaults for the utility action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UtilityConfig {
    /// Seed for a deterministic random source. Unset means OS entropy.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Upper bound for generated ID lengths.
    #[serde(default = "default_max_id_length")]
    pub max_id_length: usize,
}

impl Default for UtilityConfig {
    fn default() -> Self {
        Self {
            random_seed: None,
            max_id_length: default_max_id_length(),
        }
    }
}

/// Configuration of the built-in actions. Immutable once an action is
/// constructed from it.
///
/// # Examples
///
/// ```
/// use stepkit_builtin::ActionConfig;
///
/// let config = ActionConfig::from_yaml_str(
///     "dirs:\n  workflow_dir: /srv/wf\n  output_dir: /srv/out\nquota:\n  limits:\n    $out: 1048576\n",
/// )
/// .unwrap();
/// assert_eq!(config.quota.limits["$out"], 1_048_576);
/// assert_eq!(config.shell.timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionConfig {
    /// Base directories for the prefix language.
    pub dirs: BaseDirs,
    /// Sandbox policy.
    pub policy: SandboxPolicy,
    /// File action settings.
    pub files: FileConfig,
    /// Write quotas.
    pub quota: QuotaConfig,
    /// Shell action settings.
    pub shell: ShellConfig,
    /// Utility action settings.
    pub utility: UtilityConfig,
}

impl ActionConfig {
    /// Config anchored at `workflow_dir` with every other setting default.
    pub fn new(workflow_dir: impl Into<PathBuf>) -> Self {
        Self {
            dirs: BaseDirs::new(workflow_dir),
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`, `.yml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let text = || {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        };
        match ext.as_deref() {
            Some("yaml" | "yml") => Self::from_yaml_str(&text()?),
            Some("json") => Self::from_json_str(&text()?),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quota.thresholds.validate()?;
        let positive = [
            ("files.max_file_size", self.files.max_file_size),
            ("files.max_parse_size", self.files.max_parse_size),
            ("shell.timeout_ms", self.shell.timeout_ms),
            ("utility.max_id_length", self.utility.max_id_length as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = ActionConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ActionConfig::default());
        assert_eq!(config.files.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.files.max_parse_size, 10 * 1024 * 1024);
        assert!(config.files.create_parents);
        assert!(!config.files.parse_fallback_to_text);
        assert_eq!(config.shell.shell, "sh");
    }

    #[test]
    fn json_and_yaml_agree() {
        let yaml = ActionConfig::from_yaml_str(
            "policy:\n  allow_symlinks: true\nutility:\n  random_seed: 7\n",
        )
        .unwrap();
        let json = ActionConfig::from_json_str(
            r#"{"policy": {"allow_symlinks": true}, "utility": {"random_seed": 7}}"#,
        )
        .unwrap();
        assert_eq!(yaml, json);
        assert_eq!(yaml.utility.random_seed, Some(7));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            ActionConfig::from_json_str(r#"{"bogus": 1}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[rstest]
    #[case(r#"{"files": {"max_file_size": 0}}"#, "files.max_file_size")]
    #[case(r#"{"shell": {"timeout_ms": 0}}"#, "shell.timeout_ms")]
    #[case(r#"{"utility": {"max_id_length": 0}}"#, "utility.max_id_length")]
    fn zero_limits_are_rejected(#[case] json: &str, #[case] expected: &str) {
        match ActionConfig::from_json_str(json) {
            Err(ConfigError::Zero { field }) => assert_eq!(field, expected),
            other => panic!("expected Zero error, got {other:?}"),
        }
    }

    #[test]
    fn bad_thresholds_are_rejected() {
        let err = ActionConfig::from_json_str(r#"{"quota": {"thresholds": {"warn": 0.9, "error": 0.5}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Quota(_)));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("c.yml");
        std::fs::write(&yaml, "shell:\n  timeout_ms: 5000\n").unwrap();
        assert_eq!(ActionConfig::load(&yaml).unwrap().shell.timeout_ms, 5000);

        let toml = dir.path().join("c.toml");
        std::fs::write(&toml, "").unwrap();
        assert!(matches!(
            ActionConfig::load(&toml),
            Err(ConfigError::UnsupportedFormat { .. })
        ));

        assert!(matches!(
            ActionConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
