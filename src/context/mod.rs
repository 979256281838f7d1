//! Per-request context and chain executor
//!
//! A [`RequestContext`] carries one request through the handler chain of its
//! route. Handlers advance the chain explicitly with [`RequestContext::next`],
//! so code placed after the call runs once everything downstream finished.
//! Returning without calling `next` ends the chain.
//!
//! Contexts are borrowed from a [`ContextPool`] and given back after release;
//! see [`pool`].

pub mod pool;
mod request;

pub use pool::ContextPool;
pub use request::Request;

use axum::http::{HeaderValue, StatusCode, header};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::app::AppServices;
use crate::cookies::{CookieOptions, Cookies};
use crate::error::CtxError;
use crate::files::ServedFile;
use crate::functions::{FunctionTable, names};
use crate::session::{FlashMessages, SessionStore};
use crate::template::TemplateData;
use crate::writer::{DetachedStream, ResponseStream, ResponseWriter};

/// A step of a route's handler chain.
pub type Handler = Arc<dyn Fn(&mut RequestContext) -> Result<(), CtxError> + Send + Sync>;

/// Ordered handlers of a route, shared by every context of that route.
pub type HandlerChain = Arc<[Handler]>;

/// Per-request key/value store.
pub type Store = HashMap<String, Value>;

/// Deferred step queued with [`RequestContext::push`].
pub type Finalizer = Box<dyn FnOnce(&mut RequestContext) -> Result<(), CtxError> + Send>;

/// Chain index of an aborted (or detached) context.
pub const ABORT_INDEX: isize = isize::MAX / 2;

const START_INDEX: isize = -1;

static EMPTY_REQUEST: LazyLock<Arc<Request>> = LazyLock::new(|| Arc::new(Request::default()));

pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut RequestContext) -> Result<(), CtxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub struct RequestContext {
    index: isize,
    handlers: HandlerChain,
    writer: ResponseWriter,
    request: Arc<Request>,
    session: Option<Box<dyn SessionStore>>,
    session_released: bool,
    store: Store,
    functions: Arc<FunctionTable>,
    app: Arc<AppServices>,
    deferred: Vec<Finalizer>,
}

impl RequestContext {
    pub(crate) fn new(
        handlers: HandlerChain,
        functions: Arc<FunctionTable>,
        app: Arc<AppServices>,
    ) -> Self {
        Self {
            index: START_INDEX,
            handlers,
            writer: ResponseWriter::detached(),
            request: Arc::clone(&EMPTY_REQUEST),
            session: None,
            session_released: false,
            store: Store::new(),
            functions,
            app,
            deferred: Vec::new(),
        }
    }

    /// Install the request and its response stream on a fresh context.
    pub(crate) fn begin(&mut self, request: Arc<Request>, stream: Box<dyn ResponseStream>) {
        self.index = START_INDEX;
        self.request = request;
        self.writer.reset(stream);
        self.session_released = false;
    }

    pub(crate) fn start_session(&mut self) {
        let Some(manager) = self.app.session_manager().cloned() else {
            return;
        };
        match manager.start(&self.request, &mut self.writer) {
            Ok(session) => self.session = Some(session),
            Err(err) => warn!(error = %err, path = %self.request.path(), "Failed to start session"),
        }
    }

    /// Drop every per-request value. The store keeps its allocation.
    pub(crate) fn reset(&mut self) {
        self.index = START_INDEX;
        self.session = None;
        self.session_released = false;
        self.store.clear();
        self.deferred.clear();
        self.request = Arc::clone(&EMPTY_REQUEST);
        self.writer.reset(Box::new(DetachedStream::default()));
    }

    /// Run the next handler of the chain.
    ///
    /// Only the handler at the advanced index runs; later handlers run when
    /// that handler calls `next` itself. Past the end of the chain, or once
    /// aborted, this does nothing.
    pub fn next(&mut self) -> Result<(), CtxError> {
        if self.is_aborted() {
            return Ok(());
        }
        self.index += 1;

        let Ok(position) = usize::try_from(self.index) else {
            return Ok(());
        };
        let Some(handler) = self.handlers.get(position).cloned() else {
            return Ok(());
        };
        handler(self)
    }

    /// Halt the chain and invoke the `abort` behavior. `None` writes no status.
    pub fn abort(&mut self, code: Option<u16>) {
        self.index = ABORT_INDEX;
        self.call_logged::<Option<u16>, ()>(names::ABORT, code);
    }

    /// Report a status through the application hook, or the `abort` behavior
    /// when no hook is configured. The chain keeps going either way.
    pub fn status(&mut self, code: u16) {
        match self.app.status_hook().cloned() {
            Some(hook) => hook(self, code),
            None => {
                self.call_logged::<Option<u16>, ()>(names::ABORT, Some(code));
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    pub fn index(&self) -> isize {
        self.index
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.store.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Result<&Value, CtxError> {
        self.store
            .get(key)
            .ok_or_else(|| CtxError::KeyNotFound(key.to_string()))
    }

    /// Like [`get`](Self::get), but an absent or null value is fatal for the
    /// request.
    pub fn must_get(&self, key: &str) -> Result<&Value, CtxError> {
        match self.store.get(key) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(CtxError::FatalKeyAbsence(key.to_string())),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Detached snapshot, safe to keep after the request completes.
    ///
    /// The copy cannot run handlers, holds no session and writes nowhere.
    pub fn copy(&self) -> RequestContext {
        RequestContext {
            index: ABORT_INDEX,
            handlers: HandlerChain::from(Vec::new()),
            writer: ResponseWriter::detached_from(&self.writer),
            request: Arc::clone(&self.request),
            session: None,
            session_released: true,
            store: self.store.clone(),
            functions: Arc::clone(&self.functions),
            app: Arc::clone(&self.app),
            deferred: Vec::new(),
        }
    }

    /// Resolve `name` for the given argument and output types and invoke it.
    pub fn call<A, R>(&mut self, name: &str, args: A) -> Result<R, CtxError>
    where
        A: Send + 'static,
        R: 'static,
    {
        let func = self.functions.resolve::<A, R>(name)?;
        func.invoke(self, args)
    }

    fn call_logged<A, R>(&mut self, name: &str, args: A) -> Option<R>
    where
        A: Send + 'static,
        R: 'static,
    {
        self.call(name, args)
            .inspect_err(|err| warn!(function = name, error = %err, "Ctx function failed"))
            .ok()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_arc(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    pub fn session(&self) -> Option<&dyn SessionStore> {
        self.session.as_deref()
    }

    pub fn session_mut(&mut self) -> Option<&mut (dyn SessionStore + 'static)> {
        self.session.as_deref_mut()
    }

    pub fn app(&self) -> &Arc<AppServices> {
        &self.app
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Set `Content-Type` when non-empty and the status when present.
    pub fn write_to_header(&mut self, code: Option<u16>, content_type: &str) -> Result<(), CtxError> {
        if !content_type.is_empty() {
            let value = HeaderValue::from_str(content_type).map_err(|_| {
                CtxError::InvalidArgument(format!("invalid content type {content_type:?}"))
            })?;
            self.writer.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        if let Some(code) = code {
            let status = StatusCode::from_u16(code)
                .map_err(|_| CtxError::InvalidArgument(format!("invalid status code {code}")))?;
            self.writer.write_header(status);
        }
        Ok(())
    }

    /// Queue a step to run, in order, when the context is released.
    pub fn push<F>(&mut self, step: F)
    where
        F: FnOnce(&mut RequestContext) -> Result<(), CtxError> + Send + 'static,
    {
        self.deferred.push(Box::new(step));
    }

    /// Finish the response: deferred steps, session, headers, then output.
    pub fn release(&mut self) -> Result<(), CtxError> {
        loop {
            let steps = std::mem::take(&mut self.deferred);
            if steps.is_empty() {
                break;
            }
            for step in steps {
                if let Err(err) = step(self) {
                    warn!(error = %err, path = %self.request.path(), "Deferred step failed");
                }
            }
        }

        self.release_session()?;
        self.writer.write_header_now()?;
        std::io::Write::flush(&mut self.writer)?;
        Ok(())
    }

    /// Persist the session once. Later calls do nothing.
    pub fn release_session(&mut self) -> Result<(), CtxError> {
        if self.session_released {
            return Ok(());
        }
        self.session_released = true;
        if let Some(session) = self.session.as_mut() {
            session.release(&mut self.writer)?;
            debug!(session = %session.id(), "Session released");
        }
        Ok(())
    }

    /// Split the context into the writer and a template envelope over the
    /// rest of its state.
    pub(crate) fn template_parts<'a>(
        &'a mut self,
        data: &'a Value,
        flash: FlashMessages,
    ) -> (&'a mut ResponseWriter, TemplateData<'a>) {
        let Self {
            writer,
            request,
            session,
            store,
            app,
            ..
        } = self;
        let envelope = TemplateData::new(data, request, session.as_deref(), store, flash)
            .with_functions(app.template_functions());
        (writer, envelope)
    }

    pub fn redirect(&mut self, code: u16, location: impl Into<String>) -> Result<(), CtxError> {
        self.call::<(u16, String), ()>(names::REDIRECT, (code, location.into()))
            .inspect_err(|err| warn!(error = %err, "Redirect failed"))
    }

    pub fn render_template(&mut self, name: &str, data: impl Into<Value>) -> Result<(), CtxError> {
        self.call::<(String, Value), ()>(names::RENDER_TEMPLATE, (name.to_string(), data.into()))
            .inspect_err(|err| warn!(template = name, error = %err, "Template rendering failed"))
    }

    pub fn serve_data(&mut self, code: u16, data: impl Into<Bytes>) -> Result<(), CtxError> {
        self.call::<(u16, Bytes), ()>(names::SERVE_DATA, (code, data.into()))
            .inspect_err(|err| warn!(error = %err, "Serving data failed"))
    }

    pub fn serve_plain(&mut self, code: u16, data: impl Into<Bytes>) -> Result<(), CtxError> {
        self.serve_data(code, data)
    }

    pub fn serve_file(&mut self, file: impl ServedFile + 'static) -> Result<(), CtxError> {
        let file: Box<dyn ServedFile> = Box::new(file);
        self.call::<Box<dyn ServedFile>, ()>(names::SERVE_FILE, file)
            .inspect_err(|err| warn!(error = %err, "Serving file failed"))
    }

    pub fn flash(&mut self, category: &str, message: &str) {
        self.call_logged::<(String, String), ()>(
            names::FLASH,
            (category.to_string(), message.to_string()),
        );
    }

    /// Pop the messages of the given categories.
    pub fn flash_messages<I, S>(&mut self, categories: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let categories = categories
            .into_iter()
            .map(|category| category.as_ref().to_string())
            .collect::<Vec<_>>();
        self.call_logged::<Vec<String>, Vec<String>>(names::FLASH_MESSAGES, categories)
            .unwrap_or_default()
    }

    /// Pop every pending flash message.
    pub fn all_flash_messages(&mut self) -> FlashMessages {
        self.call_logged::<(), FlashMessages>(names::ALL_FLASH_MESSAGES, ())
            .unwrap_or_default()
    }

    /// Add a `Set-Cookie` header; fails once the headers are sent.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        options: CookieOptions,
    ) -> Result<(), CtxError> {
        self.call::<(String, String, CookieOptions), ()>(
            names::COOKIE,
            (name.to_string(), value.to_string(), options),
        )
        .inspect_err(|err| warn!(cookie = name, error = %err, "Setting cookie failed"))
    }

    /// Cookies sent with the request.
    pub fn cookies(&mut self) -> Cookies {
        self.call_logged::<(), Cookies>(names::COOKIES, ())
            .unwrap_or_default()
    }

    pub fn cookie(&mut self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }

    /// URL of a named route. On failure the error text is returned instead.
    pub fn url_relative(&mut self, route: &str, params: &[&str]) -> String {
        self.url_for(route, false, params)
    }

    /// Absolute URL of a named route, on the scheme and host of the current
    /// request. On failure the error text is returned instead.
    pub fn url_external(&mut self, route: &str, params: &[&str]) -> String {
        self.url_for(route, true, params)
    }

    fn url_for(&mut self, route: &str, external: bool, params: &[&str]) -> String {
        let params = params.iter().map(|param| param.to_string()).collect();
        self.call::<(String, bool, Vec<String>), String>(
            names::URL_FOR,
            (route.to_string(), external, params),
        )
        .unwrap_or_else(|err| err.to_string())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("index", &self.index)
            .field("handlers", &self.handlers.len())
            .field("path", &self.request.path())
            .field("writer", &self.writer)
            .field("session", &self.session.as_ref().map(|s| s.id().to_string()))
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, Env};
    use crate::config::Config;
    use crate::writer::MemoryStream;
    use axum::http::Method;
    use parking_lot::Mutex;

    fn context(handlers: Vec<Handler>, stream: &MemoryStream) -> RequestContext {
        let services = App::new(Env::new(Config::default()))
            .without_sessions()
            .services()
            .unwrap();
        let pool = ContextPool::new(HandlerChain::from(handlers), services, 4);
        let request = Arc::new(Request::new(Method::GET, "/".parse().unwrap()));
        pool.get(request, Box::new(stream.clone()), Vec::new())
    }

    fn recorder(trace: &Arc<Mutex<Vec<&'static str>>>, label: &'static str, call_next: bool) -> Handler {
        let trace = Arc::clone(trace);
        handler(move |ctx| {
            trace.lock().push(label);
            if call_next {
                ctx.next()?;
            }
            Ok(())
        })
    }

    #[test]
    fn test_chain_runs_each_handler_once_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let stream = MemoryStream::new();
        let mut ctx = context(
            vec![
                recorder(&trace, "one", true),
                recorder(&trace, "two", true),
                recorder(&trace, "three", true),
            ],
            &stream,
        );

        ctx.next().unwrap();
        assert_eq!(*trace.lock(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_handler_without_next_ends_chain() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let stream = MemoryStream::new();
        let mut ctx = context(
            vec![
                recorder(&trace, "one", true),
                recorder(&trace, "two", false),
                recorder(&trace, "three", true),
            ],
            &stream,
        );

        ctx.next().unwrap();
        assert_eq!(*trace.lock(), vec!["one", "two"]);
    }

    #[test]
    fn test_abort_halts_even_when_next_is_called() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let aborting = {
            let trace = Arc::clone(&trace);
            handler(move |ctx| {
                trace.lock().push("two");
                ctx.abort(Some(403));
                ctx.next()
            })
        };
        let stream = MemoryStream::new();
        let mut ctx = context(
            vec![recorder(&trace, "one", true), aborting, recorder(&trace, "three", true)],
            &stream,
        );

        ctx.next().unwrap();
        ctx.release().unwrap();

        assert_eq!(*trace.lock(), vec!["one", "two"]);
        assert!(ctx.is_aborted());
        assert_eq!(stream.recording().status, Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_onion_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let outer = {
            let trace = Arc::clone(&trace);
            handler(move |ctx| {
                trace.lock().push("before");
                ctx.next()?;
                trace.lock().push("after");
                Ok(())
            })
        };
        let stream = MemoryStream::new();
        let mut ctx = context(vec![outer, recorder(&trace, "inner", true)], &stream);

        ctx.next().unwrap();
        assert_eq!(*trace.lock(), vec!["before", "inner", "after"]);
    }

    #[test]
    fn test_status_without_hook_keeps_chain_running() {
        let stream = MemoryStream::new();
        let mut ctx = context(Vec::new(), &stream);

        ctx.status(404);
        assert!(!ctx.is_aborted());
        assert_eq!(ctx.writer().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_access() {
        let stream = MemoryStream::new();
        let mut ctx = context(Vec::new(), &stream);

        ctx.set("user", "ada");
        ctx.set("missing", Value::Null);

        assert_eq!(ctx.get("user").unwrap(), "ada");
        assert!(matches!(ctx.get("nope"), Err(CtxError::KeyNotFound(_))));
        assert!(ctx.get("missing").is_ok());
        assert!(matches!(ctx.must_get("missing"), Err(CtxError::FatalKeyAbsence(_))));
        assert!(matches!(ctx.must_get("nope"), Err(CtxError::FatalKeyAbsence(_))));
    }

    #[test]
    fn test_copy_is_detached() {
        let stream = MemoryStream::new();
        let mut ctx = context(Vec::new(), &stream);
        ctx.set("k", 1);

        let mut copy = ctx.copy();
        assert!(copy.is_aborted());
        assert!(copy.session().is_none());
        assert_eq!(copy.get("k").unwrap(), 1);

        copy.set("k", 2);
        copy.serve_plain(200, "ignored").unwrap();
        assert_eq!(ctx.get("k").unwrap(), 1);
        assert_eq!(stream.recording().head_count, 0);
    }

    #[test]
    fn test_redirect_codes() {
        for code in 300..=308 {
            let stream = MemoryStream::new();
            let mut ctx = context(Vec::new(), &stream);
            ctx.redirect(code, "/elsewhere").unwrap();

            let recording = stream.recording();
            assert_eq!(recording.head_count, 1);
            assert_eq!(recording.status.map(|s| s.as_u16()), Some(code));
            assert_eq!(recording.headers.get(header::LOCATION).unwrap(), "/elsewhere");
            assert!(recording.body.is_empty());
        }

        for code in [200, 299, 309, 404] {
            let stream = MemoryStream::new();
            let mut ctx = context(Vec::new(), &stream);
            let result = ctx.redirect(code, "/elsewhere");

            assert!(matches!(result, Err(CtxError::InvalidArgument(_))));
            let recording = stream.recording();
            assert_eq!(recording.head_count, 0);
            assert!(recording.body.is_empty());
        }
    }

    #[test]
    fn test_url_relative_missing_route_returns_error_text() {
        let stream = MemoryStream::new();
        let mut ctx = context(Vec::new(), &stream);

        let url = ctx.url_relative("missing-route", &[]);
        assert!(url.starts_with("unable to get url for route missing-route"));
    }

    #[test]
    fn test_push_runs_on_release_in_order() {
        let stream = MemoryStream::new();
        let mut ctx = context(Vec::new(), &stream);

        ctx.push(|ctx| {
            ctx.set("first", true);
            Ok(())
        });
        ctx.push(|ctx| {
            let first = ctx.must_get("first")?.clone();
            ctx.set("second", first);
            Ok(())
        });
        ctx.release().unwrap();

        assert_eq!(ctx.get("second").unwrap(), true);
        assert_eq!(stream.recording().head_count, 1);
    }

    #[test]
    fn test_write_to_header() {
        let stream = MemoryStream::new();
        let mut ctx = context(Vec::new(), &stream);

        ctx.write_to_header(Some(201), "application/json").unwrap();
        ctx.write_to_header(None, "").unwrap();
        ctx.release().unwrap();

        let recording = stream.recording();
        assert_eq!(recording.status, Some(StatusCode::CREATED));
        assert_eq!(
            recording.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
