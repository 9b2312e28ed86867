//! Client Settings
//!
//! Global settings, read from a JSON value or a TOML file. Every source goes
//! through [`validate_settings`] before it is deserialised.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::validation::{validate_settings, ValidationError};

/// Settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

impl From<url::ParseError> for ConfigError {
    fn from(err: url::ParseError) -> Self {
        ConfigError::Validation(ValidationError::InvalidValue {
            key: "url".to_string(),
            reason: err.to_string(),
        })
    }
}

/// Result type alias for settings operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Verbose technical logging, payload dumps
    Development,
    #[default]
    Production,
    Test,
}

/// Where the client runs, selects the liveness probe strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// Poll reachability of the API
    #[default]
    Headless,
    /// Follow the host's online / offline signals
    Browser,
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base URL of the API
    pub url: String,
    /// API version path segment
    pub version: String,
    /// Log verbosity, 0 to 2
    pub debug: u8,
    /// Failed authentication attempts tolerated before giving up
    pub max_tries: u32,
    /// Minimum seconds between two authentication attempts
    pub connection_timeout: u64,
    /// Return results to the caller instead of publishing them
    pub respond_direct: bool,
    pub environment: Environment,
    pub context: ExecutionContext,
    /// Seconds between reachability polls (headless)
    pub probe_interval: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3030".to_string(),
            version: "v1".to_string(),
            debug: 0,
            max_tries: 5,
            connection_timeout: 10,
            respond_direct: true,
            environment: Environment::Production,
            context: ExecutionContext::Headless,
            probe_interval: 3,
        }
    }
}

impl ClientSettings {
    /// Validate and deserialise a settings object
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        validate_settings(value)?;
        let settings: Self = serde_json::from_value(value.clone())?;
        settings.endpoint()?;
        Ok(settings)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let value: Value = toml::from_str(text)?;
        Self::from_value(&value)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parsed API base URL
    pub fn endpoint(&self) -> ConfigResult<Url> {
        Ok(Url::parse(&self.url)?)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval.max(1))
    }

    /// Per-request timeout of a reachability poll; half the interval so a
    /// hung check never delays the next tick
    pub fn probe_timeout(&self) -> Duration {
        self.probe_interval() / 2
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Log level implied by `debug` and `environment`
    pub fn log_level(&self) -> log::LevelFilter {
        if self.is_development() {
            return log::LevelFilter::Trace;
        }
        match self.debug {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let settings = ClientSettings::from_value(&json!({ "maxTries": 2 })).unwrap();
        assert_eq!(settings.max_tries, 2);
        assert_eq!(settings.version, "v1");
        assert_eq!(settings.connection_timeout(), Duration::from_secs(10));
        assert!(settings.respond_direct);
        assert_eq!(settings.context, ExecutionContext::Headless);
    }

    #[test]
    fn test_debug_must_be_number() {
        let err = ClientSettings::from_value(&json!({ "debug": "1" })).unwrap_err();
        match err {
            ConfigError::Validation(ValidationError::WrongType { key, .. }) => assert_eq!(key, "debug"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_url() {
        let err = ClientSettings::from_value(&json!({ "url": "not a url" })).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation(ValidationError::InvalidValue { ref key, .. }) if key == "url"
        ));
    }

    #[test]
    fn test_fractional_count_rejected() {
        let err = ClientSettings::from_value(&json!({ "maxTries": 2.5 })).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_probe_timeout_is_shorter_than_interval() {
        let mut settings = ClientSettings::default();
        assert_eq!(settings.probe_timeout(), Duration::from_millis(1500));

        settings.probe_interval = 0;
        assert_eq!(settings.probe_interval(), Duration::from_secs(1));
        assert_eq!(settings.probe_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_log_level() {
        let mut settings = ClientSettings::default();
        assert_eq!(settings.log_level(), log::LevelFilter::Warn);
        settings.debug = 2;
        assert_eq!(settings.log_level(), log::LevelFilter::Debug);
        settings.environment = Environment::Development;
        assert_eq!(settings.log_level(), log::LevelFilter::Trace);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
url = "https://api.example.com"
debug = 1
maxTries = 3
environment = "development"
context = "browser"
"#
        )
        .unwrap();

        let settings = ClientSettings::load(file.path()).unwrap();
        assert_eq!(settings.url, "https://api.example.com");
        assert_eq!(settings.max_tries, 3);
        assert!(settings.is_development());
        assert_eq!(settings.context, ExecutionContext::Browser);
    }

    #[test]
    fn test_load_toml_rejects_unknown_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retries = 3").unwrap();

        let err = ClientSettings::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ValidationError::UnknownKey { .. })));
    }
}
