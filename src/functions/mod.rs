//! Named, pluggable behaviors for request contexts
//!
//! Context methods such as `redirect` or `url_relative` never call their
//! implementation directly: they resolve a name in the context's
//! [`FunctionTable`] and invoke whatever is registered there. Applications
//! swap a behavior by registering a replacement under the same name.
//!
//! Contracts are checked only for declared names (the built-ins, or
//! anything passed to [`FunctionTable::declare`]). Under an undeclared name
//! any single output type registers, so a `(value, 7)` pair is stored as a
//! plain value of tuple type rather than rejected.
//!
//! ## Key Components
//!
//! - [`CtxFunc`] - a behavior in one of the two accepted shapes
//! - [`FunctionTable`] - name to behavior mapping with declared contracts
//! - [`FuncHandle`] - typed handle returned by [`FunctionTable::resolve`]
//! - [`builtin`] - the default table every environment starts from
//!
//! ## Example
//!
//! ```rust,ignore
//! use skiff::functions::{CtxFunc, FunctionTable, names};
//!
//! let mut table = skiff::functions::builtin();
//! table.register(names::REDIRECT, CtxFunc::fallible(|ctx, (code, to): (u16, String)| {
//!     ctx.serve_plain(200, format!("would redirect to {to} ({code})"))
//! }))?;
//! ```

mod builtin;
mod registry;

pub use builtin::builtin;
pub use registry::{CtxFunc, FuncHandle, FunctionTable, RegistryError, Shape, Signature};

/// Names of the built-in behaviors.
pub mod names {
    pub const ABORT: &str = "abort";
    pub const ALL_FLASH_MESSAGES: &str = "allflashmessages";
    pub const COOKIE: &str = "cookie";
    pub const COOKIES: &str = "cookies";
    pub const FLASH: &str = "flash";
    pub const FLASH_MESSAGES: &str = "flashmessages";
    pub const REDIRECT: &str = "redirect";
    pub const RENDER_TEMPLATE: &str = "rendertemplate";
    pub const SERVE_DATA: &str = "servedata";
    pub const SERVE_FILE: &str = "servefile";
    pub const URL_FOR: &str = "urlfor";
}
