//! Client configuration loading.
//!
//! Read from `config.toml` in the platform config directory
//! (`%APPDATA%\qix\config\config.toml` on Windows). Every key is optional.
//!
//! ```toml
//! [endpoint]
//! instance = "1.5a"
//!
//! [query]
//! timeout_ms = 5000
//! max_results = 50
//! fields = ["full_path", "size", "modified"]
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::ipc::locator::WindowLocator;
use crate::ipc::protocol::{
    ResultFields, SearchRequest, SearchRequestBuilder, DEFAULT_ENDPOINT_CLASS,
    DEFAULT_MAX_RESULTS, DEFAULT_TIMEOUT,
};
use crate::{QixError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Which service to talk to
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Defaults for every query
    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service endpoint settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Window class the service registers
    #[serde(default = "default_class_name")]
    pub class_name: String,

    /// Named service instance, if several run side by side
    #[serde(default)]
    pub instance: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            class_name: default_class_name(),
            instance: None,
        }
    }
}

fn default_class_name() -> String {
    DEFAULT_ENDPOINT_CLASS.to_string()
}

/// Query defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Reply deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Output fields by name (`name`, `path`, `full_path`, `size`, ...)
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_results: default_max_results(),
            fields: default_fields(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}
fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}
fn default_fields() -> Vec<String> {
    vec!["full_path".to_string()]
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Level for qix targets when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Write daily-rolling log files here instead of stderr
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

impl ClientConfig {
    /// Default location of the config file, if the platform has one.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "qix").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from `path`.
    ///
    /// # Errors
    /// `Config` if the file cannot be read or is not valid TOML for this
    /// structure.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QixError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| QixError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| QixError::Config(e.to_string()))?;
        // Surface bad field names at load time, not on the first query
        config.fields()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.query.timeout_ms)
    }

    /// Configured output fields.
    ///
    /// # Errors
    /// `Config` naming the first unknown field.
    pub fn fields(&self) -> Result<ResultFields> {
        ResultFields::from_names(&self.query.fields).map_err(|e| QixError::Config(e.to_string()))
    }

    /// Locator for the configured endpoint.
    pub fn locator(&self) -> WindowLocator {
        WindowLocator::new(&self.endpoint.class_name, self.endpoint.instance.as_deref())
    }

    /// Request builder seeded with the configured query defaults.
    pub fn request_builder(&self, text: impl Into<String>) -> Result<SearchRequestBuilder> {
        Ok(SearchRequest::builder(text)
            .timeout(self.timeout())
            .max_count(self.query.max_results)
            .fields(self.fields()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::locator::EndpointLocator;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint.class_name, DEFAULT_ENDPOINT_CLASS);
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.query.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.fields().unwrap(), ResultFields::FULL_PATH);
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [endpoint]
            instance = "1.5a"

            [query]
            max_results = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.locator().identifier(), "QIX_INDEX_SERVICE_(1.5a)");
        assert_eq!(config.query.max_results, 25);
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_unknown_field_name_rejected() {
        let err = ClientConfig::from_toml("[query]\nfields = [\"name\", \"colour\"]\n").unwrap_err();
        assert!(matches!(err, QixError::Config(ref msg) if msg.contains("colour")));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ClientConfig::from_toml("[query\ntimeout_ms = ").unwrap_err();
        assert!(matches!(err, QixError::Config(_)));
    }

    #[test]
    fn test_request_builder_uses_defaults() {
        let config = ClientConfig::from_toml(
            "[query]\ntimeout_ms = 750\nmax_results = 5\nfields = [\"name\", \"size\"]\n",
        )
        .unwrap();
        let request = config.request_builder("*.rs").unwrap().build().unwrap();

        assert_eq!(request.timeout(), Duration::from_millis(750));
        assert_eq!(request.max_count(), 5);
        assert_eq!(request.fields(), ResultFields::NAME | ResultFields::SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_from_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(ClientConfig::load_from(&path), Err(QixError::Config(_))));
    }
}
