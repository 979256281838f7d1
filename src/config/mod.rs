//! Configuration management for skiff
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use skiff::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `SKIFF__<section>__<key>`
//!
//! Examples:
//! - `SKIFF__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `SKIFF__SERVER__MAX_UPLOAD=20MB`
//! - `SKIFF__APP__MODE=production`
//!
//! The secret key can also be supplied as `SKIFF_SECRET_KEY`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/skiff.toml`.
//! This can be overridden using the `SKIFF_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    AppConfig, Config, DEFAULT_SECRET_KEY, Mode, SecretConfig, ServerConfig, SessionConfig,
};
pub use validation::ValidationError;

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
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`SKIFF__*`, `SKIFF_SECRET_KEY`)
    /// 2. TOML file (default: `config/skiff.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app.mode == Mode::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[session]\ncookie_name = \"sid\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.session.cookie_name, "sid");
        assert!(!config.is_production());
    }

    #[test]
    fn test_validation_rejects_default_secret_in_production() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[app]
mode = "production"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::InsecureSecretKey)
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[app]
mode = "production"

[server]
bind_addr = "127.0.0.1:8081"
max_upload = "20MB"
pool_capacity = 128
stream_capacity = 4
stream_buffer = "16KB"

[secret]
key = "d41d8cd98f00b204e9800998ecf8427e"

[session]
cookie_name = "skiff_session"
lifetime_secs = 86400
gc_interval_secs = 60
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert!(config.is_production());
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:8081");
        assert_eq!(config.server.max_upload.as_u64(), 20 * 1024 * 1024);
        assert_eq!(config.server.pool_capacity, 128);
        assert_eq!(config.server.stream_buffer.as_u64(), 16 * 1024);
        assert_eq!(config.session.lifetime_secs, 86400);
        assert_eq!(config.session.gc_interval_secs, 60);
    }
}
