use crate::config::OrchestratorConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent_flows must be greater than zero")]
    ZeroConcurrency,

    #[error("extraction_timeout_ms must be greater than zero")]
    ZeroExtractionTimeout,

    #[error("deadline for {scope} must be greater than zero")]
    ZeroDeadline { scope: String },

    #[error("invalid logging filter '{0}'")]
    EmptyFilter(String),
}

/// Loads orchestrator configuration from files or strings
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<OrchestratorConfig> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read YAML file: {:?}", path.as_ref()))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig =
            serde_yaml::from_str(content).with_context(|| "Failed to parse YAML content")?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<OrchestratorConfig> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read JSON file: {:?}", path.as_ref()))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig =
            serde_json::from_str(content).with_context(|| "Failed to parse JSON content")?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn save_to_yaml<P: AsRef<Path>>(config: &OrchestratorConfig, path: P) -> Result<()> {
        let yaml_content =
            serde_yaml::to_string(config).with_context(|| "Failed to serialize config to YAML")?;
        fs::write(&path, yaml_content)
            .with_context(|| format!("Failed to write YAML file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Check the basic validity of a configuration
    pub fn validate(config: &OrchestratorConfig) -> Result<(), ConfigError> {
        if config.runtime.max_concurrent_flows == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        if config.runtime.extraction_timeout_ms == 0 {
            return Err(ConfigError::ZeroExtractionTimeout);
        }
        if config.deadlines.default_seconds == 0 {
            return Err(ConfigError::ZeroDeadline {
                scope: "default".to_string(),
            });
        }
        if let Some((kind, _)) = config.deadlines.overrides.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::ZeroDeadline {
                scope: kind.to_string(),
            });
        }
        if config.logging.filter.trim().is_empty() {
            return Err(ConfigError::EmptyFilter(config.logging.filter.clone()));
        }

        tracing::debug!(
            overrides = config.deadlines.overrides.len(),
            default_deadline_s = config.deadlines.default_seconds,
            "configuration validated"
        );
        Ok(())
    }
}
