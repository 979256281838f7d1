use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::functions::RegistryError;
use crate::routing::RouteError;
use crate::session::SessionError;
use crate::template::TemplateError;
use crate::writer::WriterError;

/// Errors surfaced by a [`RequestContext`](crate::context::RequestContext)
/// and the pluggable behaviors it invokes.
#[derive(Debug, Error)]
pub enum CtxError {
    #[error("Key {0} does not exist.")]
    KeyNotFound(String),

    /// `must_get` on an absent or null key. Handlers propagate it with `?`;
    /// the dispatcher turns it into a 500.
    #[error("Key {0} doesn't exist")]
    FatalKeyAbsence(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("unable to get url for route {route} with params {params:?}")]
    UrlBuild {
        route: String,
        params: Vec<String>,
        #[source]
        source: Option<RouteError>,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("no templator configured for this application")]
    NoTemplator,

    #[error("no session attached to this context")]
    NoSession,

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("response writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CtxError {
    /// Programmer errors that should end the request with a 500.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CtxError::FatalKeyAbsence(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CtxError::KeyNotFound(_) | CtxError::UrlBuild { .. } => StatusCode::NOT_FOUND,
            CtxError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CtxError::KeyNotFound(_) => "KEY_NOT_FOUND",
            CtxError::FatalKeyAbsence(_) => "FATAL_KEY_ABSENCE",
            CtxError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CtxError::UrlBuild { .. } => "URL_BUILD",
            CtxError::Registry(_) => "REGISTRY",
            CtxError::Template(_) | CtxError::NoTemplator => "TEMPLATE",
            CtxError::NoSession | CtxError::Session(_) => "SESSION",
            CtxError::Writer(_) | CtxError::Io(_) => "IO",
        }
    }
}

impl IntoResponse for CtxError {
    fn into_response(self) -> axum::response::Response {
        let status = if self.is_fatal() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            self.status_code()
        };
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
