//! Runtime configuration resolved once at process start.
//!
//! Precedence, lowest to highest: built-in defaults, an optional TOML file,
//! then environment variables. The rest of the crate never reads the
//! environment; it receives an `AppCfg` by constructor injection.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::error::{ServeError, ServeResult};
use crate::pipeline::Hyperparameters;

/// Snapshot of configuration values consumed by the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppCfg {
    /// Shared secret expected in the `X-API-Key` header.
    pub api_key: Option<String>,
    pub model_name: String,
    pub tracking_uri: String,
    pub registry_uri: String,
    /// Consumed by the external data-loading layer only.
    pub sql_connection: String,
    pub sql_query: String,
    pub log_level: String,
    pub io_timeout_ms: u64,
    pub hyperparameters: Hyperparameters,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            api_key: None,
            model_name: "property-valuation-model".to_string(),
            tracking_uri: "file:./mlruns".to_string(),
            registry_uri: "file:./mlruns".to_string(),
            sql_connection: "sqlite:///./data.db".to_string(),
            sql_query: "SELECT * FROM my_table".to_string(),
            log_level: "INFO".to_string(),
            io_timeout_ms: 5_000,
            hyperparameters: Hyperparameters::default(),
        }
    }
}

impl AppCfg {
    /// Resolve configuration from an optional TOML file and the process environment.
    pub fn load(file: Option<&Path>) -> ServeResult<Self> {
        let base = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())?.validated()
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> ServeResult<Self> {
        toml::from_str(content).map_err(|e| ServeError::Config(e.to_string()))
    }

    fn from_file(path: &Path) -> ServeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot read config file");
            ServeError::Config(format!("config file unreadable ({})", e.kind()))
        })?;
        Self::from_toml(&content)
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> ServeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("DEFAULT_MODEL_NAME") {
            self.model_name = v;
        }
        if let Some(v) = lookup("DEFAULT_MODEL_TRACKING_URI") {
            self.tracking_uri = v;
        }
        if let Some(v) = lookup("DEFAULT_MODEL_REGISTRY_URI") {
            self.registry_uri = v;
        }
        if let Some(v) = lookup("DEFAULT_SQL_CONNECTION") {
            self.sql_connection = v;
        }
        if let Some(v) = lookup("DEFAULT_SQL_QUERY") {
            self.sql_query = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("IO_TIMEOUT_MS") {
            self.io_timeout_ms = v
                .parse()
                .map_err(|_| ServeError::Config(format!("IO_TIMEOUT_MS is not an integer: {v}")))?;
        }
        Ok(self)
    }

    /// Reject configurations the service must not start with.
    pub fn validated(self) -> ServeResult<Self> {
        match self.api_key.as_deref() {
            None | Some("") => return Err(ServeError::Config("API_KEY must be set".into())),
            Some(_) => {}
        }
        if self.model_name.trim().is_empty() {
            return Err(ServeError::Config("model name must not be empty".into()));
        }
        if self.io_timeout_ms == 0 {
            return Err(ServeError::Config("io timeout must be positive".into()));
        }
        Ok(self)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}
