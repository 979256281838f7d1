//! Reusable contexts for one route
//!
//! A context is owned by exactly one request between [`ContextPool::get`] and
//! [`ContextPool::put`]. Idle contexts keep their store allocation.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use super::{HandlerChain, Request, RequestContext};
use crate::app::AppServices;
use crate::functions::FunctionTable;
use crate::writer::ResponseStream;

pub struct ContextPool {
    idle: Mutex<Vec<RequestContext>>,
    handlers: HandlerChain,
    functions: Arc<FunctionTable>,
    app: Arc<AppServices>,
    capacity: usize,
}

impl ContextPool {
    /// The function table is snapshotted here; later changes to the
    /// application environment do not reach contexts of this pool.
    pub fn new(handlers: HandlerChain, app: Arc<AppServices>, capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            handlers,
            functions: Arc::clone(app.functions()),
            app,
            capacity,
        }
    }

    /// Borrow a context prepared for `request`.
    ///
    /// Path parameters are copied into the context store and the session is
    /// started before the context is handed out.
    pub fn get(
        &self,
        request: Arc<Request>,
        stream: Box<dyn ResponseStream>,
        params: Vec<(String, String)>,
    ) -> RequestContext {
        let reused = self.idle.lock().pop();
        let mut ctx = match reused {
            Some(ctx) => {
                self.app.metrics().pool_hit();
                ctx
            }
            None => {
                self.app.metrics().pool_miss();
                RequestContext::new(
                    Arc::clone(&self.handlers),
                    Arc::clone(&self.functions),
                    Arc::clone(&self.app),
                )
            }
        };

        ctx.begin(request, stream);
        for (name, value) in params {
            ctx.set(name, Value::String(value));
        }
        ctx.start_session();
        ctx
    }

    /// Return a context. It is reset first; beyond capacity it is dropped.
    pub fn put(&self, mut ctx: RequestContext) {
        ctx.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(ctx);
        } else {
            trace!(capacity = self.capacity, "Context pool full, dropping context");
        }
    }

    /// Contexts currently parked.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("handlers", &self.handlers.len())
            .field("idle", &self.idle())
            .field("capacity", &self.capacity)
            .finish()
    }
}
