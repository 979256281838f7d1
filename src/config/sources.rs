use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "SKIFF_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/skiff.toml";
const ENV_PREFIX: &str = "SKIFF";
const ENV_SEPARATOR: &str = "__";
const SECRET_KEY_ENV_VAR: &str = "SKIFF_SECRET_KEY";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// The secret key is preferably kept out of configuration files
fn load_secrets(config: &mut Config) {
    if let Ok(key) = env::var(SECRET_KEY_ENV_VAR) {
        if !key.is_empty() {
            config.secret.key = key;
        }
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // SKIFF__SESSION__COOKIE_NAME -> session.cookie_name
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.session.cookie_name, "session");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[app]
mode = "testing"

[server]
bind_addr = "127.0.0.1:9000"
max_upload = "2MB"
pool_capacity = 8

[session]
cookie_name = "sid"
lifetime_secs = 600
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_upload.as_u64(), 2 * 1024 * 1024);
        assert_eq!(config.server.pool_capacity, 8);
        assert_eq!(config.session.cookie_name, "sid");
        assert_eq!(config.session.lifetime_secs, 600);
        assert_eq!(config.session.gc_interval_secs, 3600);
    }
}
