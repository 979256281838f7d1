//! Request cookies and `Set-Cookie` values
//!
//! Values are percent-encoded when set and decoded when read, so any
//! string survives the round trip through the client.

use axum::http::{HeaderValue, header};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::context::Request;
use crate::error::CtxError;

/// Name to value.
pub type Cookies = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes of a cookie set on the response.
///
/// ```rust,ignore
/// let options = CookieOptions::builder()
///     .path("/")
///     .max_age(Duration::from_secs(3600))
///     .http_only(true)
///     .build();
/// ```
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct CookieOptions {
    #[builder(into)]
    pub path: Option<String>,
    #[builder(into)]
    pub domain: Option<String>,
    pub max_age: Option<Duration>,
    #[builder(default)]
    pub secure: bool,
    #[builder(default)]
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    /// Options telling the client to drop the cookie at `path`.
    pub fn removal(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            max_age: Some(Duration::ZERO),
            ..Self::default()
        }
    }
}

fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Every cookie the request carries. The first of duplicated names wins.
pub fn parse(request: &Request) -> Cookies {
    let mut cookies = Cookies::new();
    let pairs = request
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='));

    for (name, value) in pairs {
        let value = value.trim_matches('"');
        let value = urlencoding::decode(value)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| value.to_string());
        cookies.entry(name.to_string()).or_insert(value);
    }
    cookies
}

/// `Set-Cookie` header value for `name=value` with `options`.
pub fn set_cookie_header(
    name: &str,
    value: &str,
    options: &CookieOptions,
) -> Result<HeaderValue, CtxError> {
    if !is_token(name) {
        return Err(CtxError::InvalidArgument(format!(
            "invalid cookie name {name:?}"
        )));
    }

    let mut cookie = format!("{name}={}", urlencoding::encode(value));
    if let Some(path) = &options.path {
        let _ = write!(cookie, "; Path={path}");
    }
    if let Some(domain) = &options.domain {
        let _ = write!(cookie, "; Domain={domain}");
    }
    if let Some(max_age) = options.max_age {
        let _ = write!(cookie, "; Max-Age={}", max_age.as_secs());
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    if let Some(same_site) = options.same_site {
        let _ = write!(cookie, "; SameSite={}", same_site.as_str());
    }

    HeaderValue::from_str(&cookie)
        .map_err(|_| CtxError::InvalidArgument(format!("invalid cookie attributes for {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_parse_request_cookies() {
        let request = Request::new(Method::GET, "/".parse().unwrap())
            .with_header(header::COOKIE, "theme=dark; lang=\"en\"; note=a%20b; theme=light");

        let cookies = parse(&request);
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies["theme"], "dark");
        assert_eq!(cookies["lang"], "en");
        assert_eq!(cookies["note"], "a b");
    }

    #[test]
    fn test_set_cookie_header_attributes() {
        let options = CookieOptions::builder()
            .path("/")
            .domain("example.com")
            .max_age(Duration::from_secs(60))
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .build();

        let value = set_cookie_header("note", "a b;c", &options).unwrap();
        assert_eq!(
            value,
            "note=a%20b%3Bc; Path=/; Domain=example.com; Max-Age=60; HttpOnly; Secure; SameSite=Lax"
        );

        let removal = set_cookie_header("note", "", &CookieOptions::removal("/")).unwrap();
        assert_eq!(removal, "note=; Path=/; Max-Age=0");
    }

    #[test]
    fn test_invalid_cookie_name_rejected() {
        let options = CookieOptions::default();
        assert!(matches!(
            set_cookie_header("bad name", "x", &options),
            Err(CtxError::InvalidArgument(_))
        ));
        assert!(set_cookie_header("", "x", &options).is_err());
        assert!(
            set_cookie_header("note", "x", &CookieOptions::builder().path("/a\nb").build())
                .is_err()
        );
    }
}
