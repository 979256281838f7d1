use axum::http::{HeaderMap, Method, Uri, Version, header, request::Parts};
use bytes::Bytes;
use serde_json::{Value, json};

/// An inbound request as seen by handlers. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            ..Self::default()
        }
    }

    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    /// `Host` header, falling back to the URI authority.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .or_else(|| self.uri.authority().map(|authority| authority.as_str()))
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Summary exposed to templates.
    pub fn to_value(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "path": self.uri.path(),
            "query": self.uri.query(),
            "host": self.host(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_prefers_header() {
        let request = Request::new(Method::GET, "http://internal:8080/a".parse().unwrap())
            .with_header(header::HOST, "example.com");
        assert_eq!(request.host(), Some("example.com"));

        let request = Request::new(Method::GET, "http://internal:8080/a".parse().unwrap());
        assert_eq!(request.host(), Some("internal:8080"));

        let request = Request::new(Method::GET, "/a".parse().unwrap());
        assert_eq!(request.host(), None);
    }
}
