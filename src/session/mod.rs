//! Session contract consumed by request contexts
//!
//! The context only needs a key/value view of the session and a way to
//! persist it. [`MemorySessionManager`] is the provider shipped with the
//! crate; [`SessionGc`] expires its entries in the background.

mod gc;
mod memory;

pub use gc::SessionGc;
pub use memory::MemorySessionManager;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::context::Request;
use crate::writer::ResponseWriter;

/// Session key holding pending flash messages.
pub const FLASH_KEY: &str = "_flashes";

/// Category to message.
pub type FlashMessages = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session cookie: {0}")]
    InvalidCookie(String),

    #[error("session {0} is no longer available")]
    Expired(String),

    #[error("session signing key rejected: {0}")]
    SigningKey(#[from] hmac::digest::InvalidLength),
}

/// One client's session, as attached to a request context.
pub trait SessionStore: Send {
    fn id(&self) -> &str;

    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value);

    fn delete(&mut self, key: &str);

    fn snapshot(&self) -> Map<String, Value>;

    /// Persist the session and attach whatever the client needs to find it
    /// again (typically a cookie) to the response.
    fn release(&mut self, writer: &mut ResponseWriter) -> Result<(), SessionError>;
}

pub trait SessionManager: Send + Sync {
    fn start(
        &self,
        request: &Request,
        writer: &mut ResponseWriter,
    ) -> Result<Box<dyn SessionStore>, SessionError>;

    /// Drop expired sessions, returning how many were removed.
    fn gc(&self) -> usize;
}
