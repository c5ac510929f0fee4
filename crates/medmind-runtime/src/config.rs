//! Runtime configuration.
//!
//! Loaded from YAML, every field optional:
//!
//! ```yaml
//! provider: gemini
//! model: gemini-2.5-flash
//! max_output_tokens: 8192
//! temperature: 0.2
//! request_timeout: 90s
//! use_fixtures: true
//! provider_options:
//!   base_url: https://generativelanguage.googleapis.com/v1beta
//! ```
//!
//! `MEDMIND_MODEL` and `MEDMIND_REQUEST_TIMEOUT` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::{gemini, GenerationConfig};

pub const MODEL_ENV: &str = "MEDMIND_MODEL";
pub const REQUEST_TIMEOUT_ENV: &str = "MEDMIND_REQUEST_TIMEOUT";

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid duration '{value}' for {field}: {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provider type name in the registry.
    pub provider: String,

    pub model: String,

    pub max_output_tokens: u32,

    /// `None` keeps the provider default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(with = "duration_str")]
    pub request_timeout: Duration,

    /// Serve cached fixtures for recognised demo cases.
    pub use_fixtures: bool,

    /// Passed to the provider factory as-is.
    pub provider_options: serde_json::Value,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: gemini::DEFAULT_MODEL.to_string(),
            max_output_tokens: 8192,
            temperature: None,
            request_timeout: Duration::from_secs(90),
            use_fixtures: true,
            provider_options: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `MEDMIND_MODEL` and `MEDMIND_REQUEST_TIMEOUT`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(
            std::env::var(MODEL_ENV).ok(),
            std::env::var(REQUEST_TIMEOUT_ENV).ok(),
        )
    }

    fn with_overrides(
        mut self,
        model: Option<String>,
        request_timeout: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            tracing::debug!(model = %model, "Model overridden from environment");
            self.model = model;
        }
        if let Some(value) = request_timeout {
            self.request_timeout = parse_duration("request_timeout", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::Invalid {
                    field: "temperature",
                    reason: format!("{} is outside 0.0..=2.0", t),
                });
            }
        }
        Ok(())
    }

    /// Generation settings for one call, carrying `response_schema`.
    pub fn generation_config(&self, response_schema: Option<serde_json::Value>) -> GenerationConfig {
        GenerationConfig {
            model: self.model.clone(),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            timeout: self.request_timeout,
            response_schema,
        }
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
        source,
    })
}

/// Durations as humantime strings (`"30s"`, `"2m"`).
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }
}
