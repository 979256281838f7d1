use super::models::{Config, DEFAULT_SECRET_KEY, Mode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Session setting must be positive: {field} = {value}")]
    InvalidSessionDuration { field: String, value: u64 },

    #[error("Invalid session cookie name '{0}'")]
    InvalidCookieName(String),

    #[error("The default secret key must be changed in production mode")]
    InsecureSecretKey,

    #[error("Server setting must be positive: {field}")]
    InvalidServerSetting { field: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_session(config)?;
    validate_secret(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    let server = &config.server;
    let zero = [
        ("stream_capacity", server.stream_capacity == 0),
        ("stream_buffer", server.stream_buffer.as_u64() == 0),
        ("max_upload", server.max_upload.as_u64() == 0),
    ];

    match zero.iter().find(|(_, is_zero)| *is_zero) {
        Some((field, _)) => Err(ValidationError::InvalidServerSetting {
            field: field.to_string(),
        }),
        None => Ok(()),
    }
}

fn validate_session(config: &Config) -> Result<(), ValidationError> {
    let session = &config.session;
    for (field, value) in [
        ("lifetime_secs", session.lifetime_secs),
        ("gc_interval_secs", session.gc_interval_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::InvalidSessionDuration {
                field: field.to_string(),
                value,
            });
        }
    }

    if !is_cookie_token(&session.cookie_name) {
        return Err(ValidationError::InvalidCookieName(
            session.cookie_name.clone(),
        ));
    }

    Ok(())
}

/// RFC 6265 cookie-name: a token, i.e. visible ASCII without separators.
fn is_cookie_token(name: &str) -> bool {
    const SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(c))
}

fn validate_secret(config: &Config) -> Result<(), ValidationError> {
    if config.app.mode == Mode::Production
        && (config.secret.key.is_empty() || config.secret.key == DEFAULT_SECRET_KEY)
    {
        return Err(ValidationError::InsecureSecretKey);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_session_lifetime() {
        let mut config = Config::default();
        config.session.lifetime_secs = 0;

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidSessionDuration { .. })
        ));
    }

    #[test]
    fn test_invalid_cookie_name() {
        let mut config = Config::default();
        config.session.cookie_name = "my session".to_string();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::InvalidCookieName(_))));
    }

    #[test]
    fn test_default_secret_rejected_in_production() {
        let mut config = Config::default();
        config.app.mode = Mode::Production;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InsecureSecretKey)
        ));

        config.secret.key = "a-real-secret".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_stream_buffer() {
        let mut config = Config::default();
        config.server.stream_buffer = crate::humanize::ByteSize(0);

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidServerSetting { .. })
        ));
    }
}
