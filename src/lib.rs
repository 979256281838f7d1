pub mod app;
pub mod config;
pub mod context;
pub mod cookies;
pub mod error;
pub mod files;
pub mod functions;
pub mod humanize;
pub mod observability;
pub mod routing;
pub mod session;
pub mod template;
pub mod writer;

pub use app::{App, AppServices, Env, RouteDef};
pub use context::{Handler, HandlerChain, Request, RequestContext, handler};
pub use error::CtxError;
