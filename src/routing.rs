//! Named routes, used to build URLs
//!
//! Matching is done by the axum router; this table only knows each route's
//! pattern so that [`Route::url`] can fill it back in.

use axum::http::Uri;
use axum::http::uri::InvalidUri;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route {route} takes {expected} parameter(s), {given} given")]
    ParamMismatch {
        route: String,
        expected: usize,
        given: usize,
    },

    #[error("invalid uri: {0}")]
    InvalidUri(#[from] InvalidUri),

    #[error("failed to build uri: {0}")]
    Build(#[from] axum::http::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    CatchAll(String),
}

fn parse_segment(segment: &str) -> Segment {
    match segment.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => match name.strip_prefix('*') {
            Some(name) => Segment::CatchAll(name.to_string()),
            None => Segment::Param(name.to_string()),
        },
        None => Segment::Static(segment.to_string()),
    }
}

/// A named pattern such as `/users/{id}` or `/static/{*path}`.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    pattern: String,
    segments: Vec<Segment>,
}

impl Route {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let segments = pattern
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(parse_segment)
            .collect();
        Self {
            name: name.into(),
            pattern,
            segments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) | Segment::CatchAll(name) => Some(name.as_str()),
            Segment::Static(_) => None,
        })
    }

    pub fn has_params(&self) -> bool {
        self.param_names().next().is_some()
    }

    /// Fill the pattern with positional parameters.
    ///
    /// Values are percent-encoded; a catch-all value keeps its `/`
    /// separators and has each piece encoded.
    pub fn url(&self, params: &[String]) -> Result<Uri, RouteError> {
        let expected = self.param_names().count();
        if expected != params.len() {
            return Err(RouteError::ParamMismatch {
                route: self.name.clone(),
                expected,
                given: params.len(),
            });
        }

        let mut params = params.iter();
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Static(text) => path.push_str(text),
                Segment::Param(_) => {
                    if let Some(value) = params.next() {
                        path.push_str(&urlencoding::encode(value));
                    }
                }
                Segment::CatchAll(_) => {
                    if let Some(value) = params.next() {
                        let pieces: Vec<_> = value
                            .trim_start_matches('/')
                            .split('/')
                            .map(urlencoding::encode)
                            .collect();
                        path.push_str(&pieces.join("/"));
                    }
                }
            }
        }
        if path.is_empty() || (self.pattern.ends_with('/') && !path.ends_with('/')) {
            path.push('/');
        }

        Ok(path.parse()?)
    }
}

/// Name to route.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing any previous route of the same name.
    pub fn insert(&mut self, route: Route) {
        self.routes.insert(route.name.clone(), route);
    }

    pub fn get(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}
