//! Configuration management for ingestbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use ingestbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Planning {} endpoints", config.planner.endpoints.len());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `INGESTBOX__<section>__<key>`
//!
//! Examples:
//! - `INGESTBOX__FETCH__MODE=real`
//! - `INGESTBOX__QUEUE__VISIBILITY_TIMEOUT=3m`
//! - `INGESTBOX__STORAGE__PROVIDER=s3`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/ingestbox.toml`.
//! This can be overridden using the `INGESTBOX_CONFIG` environment variable
//! or the `--config` CLI flag.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{
    Config, FetchConfig, FetchMode, PlannerConfig, QueueConfig, ServerConfig, StorageConfig,
    StorageProvider, TelemetryConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Load configuration, preferring an explicit file path over
    /// `INGESTBOX_CONFIG` and the default location
    pub fn load_with(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path (no secrets, no `.env`)
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Run validation on an in-memory configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
