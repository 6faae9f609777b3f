//! Configuration loading and validation for ironloop.
//!
//! Settings live in a `KEY=VALUE` text file at `~/.ironloop/config`, with
//! environment variables of the same names taking precedence. The file is
//! read once at process start into an immutable [`RuntimeSettings`];
//! nothing else in the runtime holds global state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable runtime settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Default model identifier
    pub model: String,

    /// Base URL of the OpenAI-compatible endpoint
    pub api_base: String,

    /// API key for the endpoint
    pub api_key: Option<String>,

    /// Maximum inner-loop iterations per task
    pub max_iterations: u32,

    /// Global tool timeout
    pub tool_timeout: Duration,

    /// Maximum outer verification-loop iterations
    pub ralph_loop_max_iterations: u32,

    /// Whether memory compression is enabled
    pub memory_enabled: bool,

    /// Stored-token threshold that arms compression
    pub memory_compression_threshold: usize,

    /// Short-term buffer capacity (messages)
    pub memory_short_term_size: usize,

    /// Minimum recent messages preserved through compression
    pub memory_short_term_min_size: usize,

    /// Target compressed-size ratio
    pub memory_compression_ratio: f64,

    /// Retry attempts after the initial call
    pub retry_max_attempts: u32,

    /// Initial retry backoff
    pub retry_initial_delay: Duration,

    /// Backoff ceiling
    pub retry_max_delay: Duration,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".into()
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key: None,
            max_iterations: 1000,
            tool_timeout: Duration::from_secs(600),
            ralph_loop_max_iterations: 3,
            memory_enabled: true,
            memory_compression_threshold: 60_000,
            memory_short_term_size: 100,
            memory_short_term_min_size: 6,
            memory_compression_ratio: 0.3,
            retry_max_attempts: 3,
            retry_initial_delay: Duration::from_secs_f64(1.0),
            retry_max_delay: Duration::from_secs_f64(60.0),
        }
    }
}

impl RuntimeSettings {
    /// Load settings from the default location (`~/.ironloop/config`) with
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::runtime_dir().join("config"))
    }

    /// Load settings from a specific file, then apply environment
    /// variable overrides. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            parse_key_values(&content, &mut values)?;
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
        }

        // Environment variables take precedence over file values.
        for key in RECOGNIZED_KEYS {
            if let Ok(val) = std::env::var(key) {
                values.insert((*key).to_string(), val);
            }
        }

        let settings = Self::from_values(&values)?;
        settings.validate()?;
        Ok(settings)
    }

    /// The per-user runtime directory (`~/.ironloop`).
    pub fn runtime_dir() -> PathBuf {
        dirs_home().join(".ironloop")
    }

    /// Where sessions are persisted.
    pub fn sessions_dir() -> PathBuf {
        Self::runtime_dir().join("sessions")
    }

    /// Where verbose logs are written.
    pub fn logs_dir() -> PathBuf {
        Self::runtime_dir().join("logs")
    }

    fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            model: values
                .get("MODEL")
                .cloned()
                .unwrap_or(defaults.model),
            api_base: values
                .get("API_BASE")
                .cloned()
                .unwrap_or(defaults.api_base),
            api_key: values.get("API_KEY").cloned().or(defaults.api_key),
            max_iterations: parse(values, "MAX_ITERATIONS", defaults.max_iterations)?,
            tool_timeout: Duration::from_secs(parse(
                values,
                "TOOL_TIMEOUT",
                defaults.tool_timeout.as_secs(),
            )?),
            ralph_loop_max_iterations: parse(
                values,
                "RALPH_LOOP_MAX_ITERATIONS",
                defaults.ralph_loop_max_iterations,
            )?,
            memory_enabled: parse_bool(values, "MEMORY_ENABLED", defaults.memory_enabled)?,
            memory_compression_threshold: parse(
                values,
                "MEMORY_COMPRESSION_THRESHOLD",
                defaults.memory_compression_threshold,
            )?,
            memory_short_term_size: parse(
                values,
                "MEMORY_SHORT_TERM_SIZE",
                defaults.memory_short_term_size,
            )?,
            memory_short_term_min_size: parse(
                values,
                "MEMORY_SHORT_TERM_MIN_SIZE",
                defaults.memory_short_term_min_size,
            )?,
            memory_compression_ratio: parse(
                values,
                "MEMORY_COMPRESSION_RATIO",
                defaults.memory_compression_ratio,
            )?,
            retry_max_attempts: parse(values, "RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_initial_delay: Duration::from_secs_f64(parse(
                values,
                "RETRY_INITIAL_DELAY",
                defaults.retry_initial_delay.as_secs_f64(),
            )?),
            retry_max_delay: Duration::from_secs_f64(parse(
                values,
                "RETRY_MAX_DELAY",
                defaults.retry_max_delay.as_secs_f64(),
            )?),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_ITERATIONS must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory_compression_ratio) {
            return Err(ConfigError::ValidationError(
                "MEMORY_COMPRESSION_RATIO must be between 0.0 and 1.0".into(),
            ));
        }
        if self.memory_short_term_min_size > self.memory_short_term_size {
            return Err(ConfigError::ValidationError(
                "MEMORY_SHORT_TERM_MIN_SIZE must not exceed MEMORY_SHORT_TERM_SIZE".into(),
            ));
        }
        if self.retry_initial_delay > self.retry_max_delay {
            return Err(ConfigError::ValidationError(
                "RETRY_INITIAL_DELAY must not exceed RETRY_MAX_DELAY".into(),
            ));
        }
        Ok(())
    }
}

/// Keys recognized in the config file and the environment.
const RECOGNIZED_KEYS: &[&str] = &[
    "MODEL",
    "API_BASE",
    "API_KEY",
    "MAX_ITERATIONS",
    "TOOL_TIMEOUT",
    "RALPH_LOOP_MAX_ITERATIONS",
    "MEMORY_ENABLED",
    "MEMORY_COMPRESSION_THRESHOLD",
    "MEMORY_SHORT_TERM_SIZE",
    "MEMORY_SHORT_TERM_MIN_SIZE",
    "MEMORY_COMPRESSION_RATIO",
    "RETRY_MAX_ATTEMPTS",
    "RETRY_INITIAL_DELAY",
    "RETRY_MAX_DELAY",
];

fn parse_key_values(
    content: &str,
    values: &mut HashMap<String, String>,
) -> Result<(), ConfigError> {
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::ParseError {
                line: lineno + 1,
                reason: format!("expected KEY=VALUE, got '{line}'"),
            });
        };
        let key = key.trim();
        if !RECOGNIZED_KEYS.contains(&key) {
            tracing::warn!(key, "Ignoring unrecognized config key");
            continue;
        }
        values.insert(key.to_string(), value.trim().to_string());
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(
    values: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match values.get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(
    values: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match values.get(key).map(|v| v.to_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: v,
        }),
        None => Ok(default),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config line {line}: {reason}")]
    ParseError { line: usize, reason: String },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(content: &str) -> Result<RuntimeSettings, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        RuntimeSettings::load_from(file.path())
    }

    #[test]
    fn defaults_are_valid() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.max_iterations, 1000);
        assert_eq!(settings.tool_timeout, Duration::from_secs(600));
        assert_eq!(settings.ralph_loop_max_iterations, 3);
        assert_eq!(settings.memory_compression_threshold, 60_000);
        assert_eq!(settings.memory_short_term_size, 100);
        assert_eq!(settings.memory_short_term_min_size, 6);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_file_returns_defaults() {
        let settings = RuntimeSettings::load_from(Path::new("/nonexistent/config")).unwrap();
        assert_eq!(settings.max_iterations, 1000);
    }

    #[test]
    fn key_value_parsing() {
        let settings = load_str(
            "# comment line\n\
             MAX_ITERATIONS=50\n\
             TOOL_TIMEOUT=30\n\
             MEMORY_ENABLED=false\n\
             MEMORY_COMPRESSION_RATIO=0.5\n",
        )
        .unwrap();
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.tool_timeout, Duration::from_secs(30));
        assert!(!settings.memory_enabled);
        assert!((settings.memory_compression_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_line_rejected() {
        let err = load_str("MAX_ITERATIONS 50\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { line: 1, .. }));
    }

    #[test]
    fn invalid_value_rejected() {
        let err = load_str("MAX_ITERATIONS=lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn unrecognized_key_ignored() {
        let settings = load_str("SOME_FUTURE_KEY=1\nMAX_ITERATIONS=7\n").unwrap();
        assert_eq!(settings.max_iterations, 7);
    }

    #[test]
    fn min_size_must_not_exceed_size() {
        let err = load_str("MEMORY_SHORT_TERM_SIZE=4\nMEMORY_SHORT_TERM_MIN_SIZE=10\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn ratio_out_of_range_rejected() {
        let err = load_str("MEMORY_COMPRESSION_RATIO=1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}
