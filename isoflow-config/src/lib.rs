//! # Isoflow Config
//!
//! YAML/JSON configuration for the orchestrator: pool limits, per-kind
//! deadlines, feature flags and logging.

mod config;
mod loader;

#[cfg(test)]
mod tests;

pub use config::{DeadlineSection, FlagSection, LoggingConfig, OrchestratorConfig, RuntimeSection};
pub use loader::{ConfigError, ConfigLoader};
