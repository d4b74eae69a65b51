//! Bridge configuration.
//!
//! Loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. A TOML file
//! 3. Environment variables: `SCANBRIDGE_*`
//!
//! ```toml
//! commit_backend = "batch"
//! bin_tracking = true
//! database_url = "postgres://bridge@erp-replica/erp"
//! log_format = "json"
//!
//! [service_layer]
//! base_url = "https://erp.example:50000/b1s/v1"
//! company_db = "PROD"
//! username = "scanner"
//! timeout_secs = 30
//! ```

use core::str::FromStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scanbridge_observability::LogFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which [`scanbridge_commit::CommitStrategy`] writes to the ERP.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitBackend {
    /// Stateful, mutex-guarded business-object session.
    #[default]
    Session,
    /// One atomic Service-Layer `$batch` request per commit.
    Batch,
}

impl FromStr for CommitBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(CommitBackend::Session),
            "batch" => Ok(CommitBackend::Batch),
            other => Err(ConfigError::Invalid(format!(
                "unknown commit backend `{other}` (expected session or batch)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLayerConfig {
    /// Service root, e.g. `https://host:50000/b1s/v1`.
    pub base_url: String,
    pub company_db: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for ServiceLayerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:50000/b1s/v1".to_string(),
            company_db: "SBODEMO".to_string(),
            username: "manager".to_string(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub commit_backend: CommitBackend,
    /// Require every received/issued quantity to be placed in bins.
    pub bin_tracking: bool,
    /// Read-side connection string for the document catalog.
    pub database_url: Option<String>,
    pub service_layer: ServiceLayerConfig,
    pub log_format: LogFormat,
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SCANBRIDGE_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = var("SCANBRIDGE_COMMIT_BACKEND") {
            self.commit_backend = value.parse()?;
        }

        if let Some(value) = var("SCANBRIDGE_BIN_TRACKING") {
            self.bin_tracking = value.trim().parse().map_err(|e| {
                ConfigError::Invalid(format!("Invalid SCANBRIDGE_BIN_TRACKING value: {e}"))
            })?;
        }

        if let Some(value) = var("SCANBRIDGE_DATABASE_URL") {
            self.database_url = Some(value);
        }

        if let Some(value) = var("SCANBRIDGE_LOG_FORMAT") {
            self.log_format = value
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("{e}")))?;
        }

        if let Some(value) = var("SCANBRIDGE_SERVICE_LAYER_URL") {
            self.service_layer.base_url = value;
        }

        if let Some(value) = var("SCANBRIDGE_COMPANY_DB") {
            self.service_layer.company_db = value;
        }

        if let Some(value) = var("SCANBRIDGE_SERVICE_LAYER_USER") {
            self.service_layer.username = value;
        }

        if let Some(value) = var("SCANBRIDGE_SERVICE_LAYER_TIMEOUT_SECS") {
            self.service_layer.timeout_secs = value.trim().parse().map_err(|e| {
                ConfigError::Invalid(format!(
                    "Invalid SCANBRIDGE_SERVICE_LAYER_TIMEOUT_SECS value: {e}"
                ))
            })?;
        }

        match var("SCANBRIDGE_SERVICE_LAYER_PASSWORD") {
            Some(value) => self.service_layer.password = value,
            None if self.service_layer.password.is_empty()
                && self.commit_backend == CommitBackend::Batch =>
            {
                tracing::warn!(
                    "SCANBRIDGE_SERVICE_LAYER_PASSWORD not set; logging in with an empty dev password"
                );
            }
            None => {}
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_layer.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service_layer.timeout_secs must be positive".into(),
            ));
        }
        if self.commit_backend == CommitBackend::Batch
            && self.service_layer.base_url.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "service_layer.base_url is required for the batch backend".into(),
            ));
        }
        if self
            .database_url
            .as_deref()
            .is_some_and(|url| url.trim().is_empty())
        {
            return Err(ConfigError::Invalid("database_url cannot be blank".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.commit_backend, CommitBackend::Session);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.bin_tracking);
    }

    #[test]
    fn file_values_are_read() {
        let config = BridgeConfig::from_toml_str(
            r#"
            commit_backend = "batch"
            bin_tracking = true
            database_url = "postgres://bridge@replica/erp"
            log_format = "pretty"

            [service_layer]
            base_url = "https://erp:50000/b1s/v1"
            company_db = "PROD"
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.commit_backend, CommitBackend::Batch);
        assert!(config.bin_tracking);
        assert_eq!(config.database_url.as_deref(), Some("postgres://bridge@replica/erp"));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.service_layer.company_db, "PROD");
        assert_eq!(config.service_layer.username, "manager");
        assert_eq!(config.service_layer.timeout_secs, 5);
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        let err = BridgeConfig::from_toml_str(r#"commit_backend = "fax""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = BridgeConfig::from_toml_str(r#"commit_backend = "session""#).unwrap();
        config
            .apply_vars(vars(&[
                ("SCANBRIDGE_COMMIT_BACKEND", "Batch"),
                ("SCANBRIDGE_BIN_TRACKING", "true"),
                ("SCANBRIDGE_SERVICE_LAYER_URL", "https://other/b1s/v1"),
                ("SCANBRIDGE_SERVICE_LAYER_PASSWORD", "s3cret"),
            ]))
            .unwrap();

        assert_eq!(config.commit_backend, CommitBackend::Batch);
        assert!(config.bin_tracking);
        assert_eq!(config.service_layer.base_url, "https://other/b1s/v1");
        assert_eq!(config.service_layer.password, "s3cret");
    }

    #[test]
    fn malformed_environment_values_are_rejected() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_vars(vars(&[("SCANBRIDGE_BIN_TRACKING", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("BIN_TRACKING")));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let mut config = BridgeConfig::default();
        config.service_layer.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn password_is_never_serialized() {
        let mut config = BridgeConfig::default();
        config.service_layer.password = "s3cret".into();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
    }
}
