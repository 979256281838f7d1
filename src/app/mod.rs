//! Application assembly and axum integration
//!
//! An [`App`] collects routes, collaborators and the [`Env`]; building it
//! freezes everything shared by requests into [`AppServices`] and produces
//! an axum [`Router`] whose routes run their handler chains on pooled
//! contexts.

mod dispatch;
mod env;
mod route;

pub use env::Env;
pub use route::RouteDef;

use axum::Router;
use axum::http::Method;
use axum::routing::on;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::context::{Handler, HandlerChain, Request, RequestContext, handler};
use crate::files;
use crate::functions::{CtxFunc, FunctionTable, RegistryError};
use crate::observability::Metrics;
use crate::routing::RouteTable;
use crate::session::{MemorySessionManager, SessionManager};
use crate::template::{TemplateFunctions, Templator};
use crate::writer::ResponseStream;
use dispatch::RouteSlot;

/// Route serving files from the environment's static directories.
pub const STATIC_ROUTE: &str = "static";

const STATIC_PATH: &str = "/static/{*path}";

/// Called by [`RequestContext::status`] instead of the `abort` behavior.
pub type StatusHook = Arc<dyn Fn(&mut RequestContext, u16) + Send + Sync>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("route {route}: method {method} cannot be routed")]
    UnsupportedMethod { route: String, method: Method },

    #[error("route {0} accepts no methods")]
    NoMethods(String),

    #[error("duplicate route name {0}")]
    DuplicateRoute(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything requests share once the application is built.
pub struct AppServices {
    config: Config,
    routes: RouteTable,
    functions: Arc<FunctionTable>,
    template_functions: TemplateFunctions,
    session_manager: Option<Arc<dyn SessionManager>>,
    templator: Option<Arc<dyn Templator>>,
    status_hook: Option<StatusHook>,
    metrics: Arc<Metrics>,
}

impl AppServices {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn functions(&self) -> &Arc<FunctionTable> {
        &self.functions
    }

    pub fn template_functions(&self) -> &TemplateFunctions {
        &self.template_functions
    }

    pub fn session_manager(&self) -> Option<&Arc<dyn SessionManager>> {
        self.session_manager.as_ref()
    }

    pub fn templator(&self) -> Option<&Arc<dyn Templator>> {
        self.templator.as_ref()
    }

    pub fn status_hook(&self) -> Option<&StatusHook> {
        self.status_hook.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// A context outside any route, e.g. for error pages or tests.
    ///
    /// It has an empty handler chain but otherwise behaves like a routed
    /// context: session started, every behavior available.
    pub fn ad_hoc_context(
        self: &Arc<Self>,
        request: Request,
        stream: impl ResponseStream + 'static,
    ) -> RequestContext {
        let mut ctx = RequestContext::new(
            HandlerChain::from(Vec::new()),
            Arc::clone(&self.functions),
            Arc::clone(self),
        );
        ctx.begin(Arc::new(request), Box::new(stream));
        ctx.start_session();
        ctx
    }
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("mode", &self.config.app.mode)
            .field("routes", &self.routes.len())
            .field("functions", &self.functions.len())
            .field("sessions", &self.session_manager.is_some())
            .field("templator", &self.templator.is_some())
            .finish()
    }
}

pub struct App {
    env: Env,
    routes: Vec<RouteDef>,
    session_manager: Option<Arc<dyn SessionManager>>,
    templator: Option<Arc<dyn Templator>>,
    status_hook: Option<StatusHook>,
    metrics: Arc<Metrics>,
}

impl App {
    /// Sessions default to [`MemorySessionManager`] configured from `env`.
    pub fn new(env: Env) -> Self {
        let sessions = MemorySessionManager::from_config(env.config());
        Self {
            env,
            routes: Vec::new(),
            session_manager: Some(Arc::new(sessions)),
            templator: None,
            status_hook: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    pub fn route(mut self, route: RouteDef) -> Self {
        self.routes.push(route);
        self
    }

    pub fn add_route(&mut self, route: RouteDef) {
        self.routes.push(route);
    }

    pub fn with_templator(mut self, templator: impl Templator + 'static) -> Self {
        self.templator = Some(Arc::new(templator));
        self
    }

    pub fn with_session_manager(mut self, manager: impl SessionManager + 'static) -> Self {
        self.session_manager = Some(Arc::new(manager));
        self
    }

    pub fn without_sessions(mut self) -> Self {
        self.session_manager = None;
        self
    }

    pub fn on_status<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RequestContext, u16) + Send + Sync + 'static,
    {
        self.status_hook = Some(Arc::new(hook));
        self
    }

    pub fn add_ctx_func(&mut self, name: &str, func: CtxFunc) -> Result<(), AppError> {
        self.env.add_ctx_func(name, func)?;
        Ok(())
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// The `static` route, when the environment has static directories and
    /// no route of that name was added.
    fn static_route(&self) -> Option<RouteDef> {
        let dirs = self.env.static_dirs();
        if dirs.is_empty() || self.routes.iter().any(|def| def.name() == STATIC_ROUTE) {
            return None;
        }
        let dirs: Arc<[PathBuf]> = dirs.into();
        Some(RouteDef::get(STATIC_ROUTE, STATIC_PATH, vec![serve_static(dirs)]))
    }

    /// Freeze the shared state. The function table is snapshotted: changes
    /// made to the environment afterwards do not reach these services.
    pub fn services(&self) -> Result<Arc<AppServices>, AppError> {
        let static_route = self.static_route();
        let mut routes = RouteTable::new();
        for def in self.routes.iter().chain(static_route.as_ref()) {
            if routes.get(def.name()).is_some() {
                return Err(AppError::DuplicateRoute(def.name().to_string()));
            }
            routes.insert(def.route());
        }

        Ok(Arc::new(AppServices {
            config: self.env.config().clone(),
            routes,
            functions: Arc::new(self.env.functions().clone()),
            template_functions: self.env.template_functions().clone(),
            session_manager: self.session_manager.clone(),
            templator: self.templator.clone(),
            status_hook: self.status_hook.clone(),
            metrics: Arc::clone(&self.metrics),
        }))
    }

    /// Build the router along with the services its routes share.
    pub fn build(self) -> Result<(Router, Arc<AppServices>), AppError> {
        self.env.config().validate()?;
        let services = self.services()?;
        let static_route = self.static_route();

        let mut router = Router::new();
        for def in self.routes.into_iter().chain(static_route) {
            let filter = def.method_filter()?;
            let has_params = def.route().has_params();
            let (name, path) = (def.name().to_string(), def.path().to_string());
            let slot = Arc::new(RouteSlot::new(
                name.clone(),
                def.into_chain(),
                Arc::clone(&services),
            ));

            let method_router = if has_params {
                on(
                    filter,
                    move |axum::extract::Path(params): axum::extract::Path<Vec<(String, String)>>,
                          request: axum::extract::Request| {
                        dispatch::dispatch(Arc::clone(&slot), params, request)
                    },
                )
            } else {
                on(filter, move |request: axum::extract::Request| {
                    dispatch::dispatch(Arc::clone(&slot), Vec::new(), request)
                })
            };

            router = router.route(&path, method_router);
            debug!(route = %name, %path, "Route registered");
        }

        info!(
            mode = %services.config().app.mode,
            routes = services.routes().len(),
            "Application built"
        );

        let router = router.layer(RequestDecompressionLayer::new());
        Ok((router, services))
    }

    pub fn into_router(self) -> Result<Router, AppError> {
        self.build().map(|(router, _)| router)
    }
}

fn serve_static(dirs: Arc<[PathBuf]>) -> Handler {
    handler(move |ctx| {
        let requested = ctx.must_get("path")?.as_str().unwrap_or_default().to_string();
        match files::find_static(&dirs, &requested) {
            Some(file) => ctx.serve_file(file),
            None => {
                debug!(path = %requested, "Static file not found");
                ctx.abort(Some(404));
                Ok(())
            }
        }
    })
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("env", &self.env)
            .field("routes", &self.routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::MemoryStream;

    fn noop() -> crate::context::Handler {
        handler(|_ctx| Ok(()))
    }

    #[test]
    fn test_duplicate_route_names_rejected() {
        let app = App::new(Env::default())
            .route(RouteDef::get("index", "/", vec![noop()]))
            .route(RouteDef::get("index", "/home", vec![noop()]));
        assert!(matches!(app.services(), Err(AppError::DuplicateRoute(_))));
    }

    #[test]
    fn test_services_snapshot_functions() {
        let mut app = App::new(Env::default());
        let services = app.services().unwrap();

        app.add_ctx_func(
            "late",
            CtxFunc::value(|_ctx: &mut RequestContext, _: ()| 1_u8),
        )
        .unwrap();

        assert!(!services.functions().contains("late"));
        assert!(app.services().unwrap().functions().contains("late"));
    }

    #[test]
    fn test_ad_hoc_context_builds_urls() {
        let app = App::new(Env::default())
            .route(RouteDef::get("user", "/users/{id}", vec![noop()]));
        let services = app.services().unwrap();
        let request = Request::new(Method::GET, "/".parse().unwrap())
            .with_header(axum::http::header::HOST, "example.com");

        let mut ctx = services.ad_hoc_context(request, MemoryStream::new());
        assert!(ctx.session().is_some());
        assert_eq!(ctx.url_relative("user", &["7"]), "/users/7");
        assert_eq!(ctx.url_external("user", &["7"]), "http://example.com/users/7");
        assert!(ctx.url_relative("user", &[]).starts_with("unable to get url"));
    }

    #[test]
    fn test_status_hook_replaces_abort_behavior() {
        let app = App::new(Env::default()).on_status(|ctx, code| {
            ctx.set("status_seen", code);
        });
        let services = app.services().unwrap();
        let request = Request::new(Method::GET, "/".parse().unwrap());

        let mut ctx = services.ad_hoc_context(request, MemoryStream::new());
        ctx.status(418);
        assert_eq!(ctx.get("status_seen").unwrap(), 418);
        assert_eq!(ctx.writer().status(), axum::http::StatusCode::OK);
    }

    #[test]
    fn test_static_route_added_for_static_dirs() {
        let app = App::new(Env::default());
        assert!(app.services().unwrap().routes().get(STATIC_ROUTE).is_none());

        let mut app = App::new(Env::default());
        app.env_mut().add_static_dir(["public"]);
        let services = app.services().unwrap();
        let request = Request::new(Method::GET, "/".parse().unwrap());
        let mut ctx = services.ad_hoc_context(request, MemoryStream::new());
        assert_eq!(
            ctx.url_relative(STATIC_ROUTE, &["css/my app.css"]),
            "/static/css/my%20app.css"
        );

        // An application route of the same name wins
        let app = app.route(RouteDef::get(STATIC_ROUTE, "/assets/{*path}", vec![noop()]));
        let services = app.services().unwrap();
        assert_eq!(services.routes().len(), 1);
        let (_router, services) = app.build().unwrap();
        assert_eq!(services.routes().len(), 1);
    }

    #[test]
    fn test_build_router() {
        let app = App::new(Env::default())
            .route(RouteDef::get("index", "/", vec![noop()]))
            .route(RouteDef::get("user", "/users/{id}", vec![noop()]));
        let (_router, services) = app.build().unwrap();
        assert_eq!(services.routes().len(), 2);
    }
}
