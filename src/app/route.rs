use axum::http::Method;
use axum::routing::MethodFilter;

use super::AppError;
use crate::context::{Handler, HandlerChain};
use crate::routing::Route;

/// A named route and its handler chain.
///
/// ```rust,ignore
/// let route = RouteDef::builder()
///     .name("user")
///     .path("/users/{id}")
///     .methods(vec![Method::GET, Method::POST])
///     .handlers(vec![auth, show_user])
///     .build();
/// ```
#[derive(bon::Builder)]
pub struct RouteDef {
    #[builder(into)]
    name: String,
    #[builder(into)]
    path: String,
    #[builder(default = vec![Method::GET])]
    methods: Vec<Method>,
    #[builder(default)]
    handlers: Vec<Handler>,
}

impl RouteDef {
    /// `GET` route.
    pub fn get(name: impl Into<String>, path: impl Into<String>, handlers: Vec<Handler>) -> Self {
        Self::builder()
            .name(name)
            .path(path)
            .handlers(handlers)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub(crate) fn route(&self) -> Route {
        Route::new(self.name.as_str(), self.path.as_str())
    }

    pub(crate) fn method_filter(&self) -> Result<MethodFilter, AppError> {
        let mut filters = self.methods.iter().map(|method| {
            filter_for(method).ok_or_else(|| AppError::UnsupportedMethod {
                route: self.name.clone(),
                method: method.clone(),
            })
        });

        let first = filters
            .next()
            .unwrap_or_else(|| Err(AppError::NoMethods(self.name.clone())))?;
        filters.try_fold(first, |acc, filter| -> Result<MethodFilter, AppError> {
            Ok(acc.or(filter?))
        })
    }

    pub(crate) fn into_chain(self) -> HandlerChain {
        HandlerChain::from(self.handlers)
    }
}

fn filter_for(method: &Method) -> Option<MethodFilter> {
    let filter = match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        Method::PATCH => MethodFilter::PATCH,
        Method::HEAD => MethodFilter::HEAD,
        Method::OPTIONS => MethodFilter::OPTIONS,
        Method::TRACE => MethodFilter::TRACE,
        _ => return None,
    };
    Some(filter)
}

impl std::fmt::Debug for RouteDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDef")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
