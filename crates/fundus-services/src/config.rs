//! Configuration for the remote inference service.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration for an [`HttpInferenceService`](crate::HttpInferenceService).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the compute service, without a trailing slash.
    pub base_url: String,

    /// Path of the primary classification endpoint (default: "/predict/").
    #[serde(default = "default_predict_path")]
    pub predict_path: String,

    /// Path of the secondary explanation endpoint (default: "/gradcam/").
    #[serde(default = "default_explain_path")]
    pub explain_path: String,

    /// Bounded wait for the explanation call in seconds (default: 45).
    /// The primary call carries no client-enforced timeout.
    #[serde(default = "default_explain_timeout_secs")]
    pub explain_timeout_secs: u64,
}

fn default_predict_path() -> String {
    "/predict/".to_string()
}

fn default_explain_path() -> String {
    "/gradcam/".to_string()
}

fn default_explain_timeout_secs() -> u64 {
    45
}

/// Errors that can occur while loading or validating service configuration.
#[derive(Debug, Error)]
pub enum ServiceConfigError {
    /// The base URL is empty or not http(s).
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The explanation timeout must be greater than 0.
    #[error("invalid explanation timeout: must be greater than 0")]
    InvalidExplainTimeout,

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ServiceConfig {
    /// Creates a configuration for the given base URL with default paths and
    /// timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            predict_path: default_predict_path(),
            explain_path: default_explain_path(),
            explain_timeout_secs: default_explain_timeout_secs(),
        }
    }

    /// Loads configuration from a TOML document.
    ///
    /// # Errors
    /// Returns `ServiceConfigError` if the document cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_toml_str(document: &str) -> Result<Self, ServiceConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file on disk.
    ///
    /// # Errors
    /// Returns `ServiceConfigError` if the file cannot be read or parsed, or
    /// the resulting configuration is invalid.
    pub fn from_path(path: &Path) -> Result<Self, ServiceConfigError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// Validate the service configuration.
    ///
    /// # Errors
    /// Returns `ServiceConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ServiceConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ServiceConfigError::InvalidBaseUrl(self.base_url.clone()));
        }

        if self.explain_timeout_secs == 0 {
            return Err(ServiceConfigError::InvalidExplainTimeout);
        }

        Ok(())
    }

    /// Get the explanation timeout as a Duration.
    #[must_use]
    pub fn explain_timeout(&self) -> Duration {
        Duration::from_secs(self.explain_timeout_secs)
    }
}
