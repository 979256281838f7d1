use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub secret: SecretConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Running mode of the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    #[default]
    Development,
    Production,
    Testing,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
            Mode::Testing => "testing",
        }
    }
}

/// Unknown names fall back to development.
impl From<String> for Mode {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" => Mode::Production,
            "testing" => Mode::Testing,
            "development" => Mode::Development,
            other => {
                tracing::warn!(mode = other, "Unknown mode, using development");
                Mode::Development
            }
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: Mode,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Largest request body accepted
    #[serde(default = "default_max_upload")]
    pub max_upload: ByteSize,
    /// Idle contexts kept per route
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Body chunks in flight between a handler and the connection
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    /// Bytes buffered before a body chunk is sent
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_upload: default_max_upload(),
            pool_capacity: default_pool_capacity(),
            stream_capacity: default_stream_capacity(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_max_upload() -> ByteSize {
    ByteSize(10_000_000)
}

fn default_pool_capacity() -> usize {
    64
}

fn default_stream_capacity() -> usize {
    16
}

fn default_stream_buffer() -> ByteSize {
    ByteSize(8 * 1024) // 8 KB
}

pub const DEFAULT_SECRET_KEY: &str = "change-this";

/// Application secret (overridable from the environment, see `sources`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecretConfig {
    #[serde(default = "default_secret_key")]
    pub key: String,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            key: default_secret_key(),
        }
    }
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

/// Session cookie and expiry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            lifetime_secs: default_lifetime_secs(),
            gc_interval_secs: default_gc_interval_secs(),
        }
    }
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_lifetime_secs() -> u64 {
    2_629_743 // about a month
}

fn default_gc_interval_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.app.mode, Mode::Development);
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.max_upload.as_u64(), 10_000_000);
        assert_eq!(config.secret.key, "change-this");
        assert_eq!(config.session.cookie_name, "session");
        assert_eq!(config.session.lifetime_secs, 2_629_743);
        assert_eq!(config.session.gc_interval_secs, 3600);
    }

    #[test]
    fn test_mode_parsing() {
        let config: Config = toml::from_str("[app]\nmode = \"production\"").unwrap();
        assert_eq!(config.app.mode, Mode::Production);

        let config: Config = toml::from_str("[app]\nmode = \"staging\"").unwrap();
        assert_eq!(config.app.mode, Mode::Development);

        assert_eq!(String::from(Mode::Testing), "testing");
    }
}
