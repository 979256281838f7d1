//! Template rendering contract
//!
//! Parsing and loading templates is left to the application. The context
//! hands a [`Templator`] the response writer and a [`TemplateData`] envelope
//! exposing the request, session, per-request store, popped flashes and the
//! template functions registered on the environment.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::context::{Request, Store};
use crate::session::{FlashMessages, SessionStore};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("failed to render {name}: {reason}")]
    Render { name: String, reason: String },

    #[error("unknown template function: {0}")]
    UnknownFunction(String),

    #[error("template function {name} failed: {reason}")]
    Function { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A helper callable from templates.
pub type TplFunc = Arc<dyn Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync>;

static NO_FUNCTIONS: LazyLock<TemplateFunctions> = LazyLock::new(TemplateFunctions::default);

/// Name to template function.
#[derive(Clone, Default)]
pub struct TemplateFunctions {
    functions: BTreeMap<String, TplFunc>,
}

impl TemplateFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `func` under `name`, replacing any previous function.
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(func));
    }

    pub fn get(&self, name: &str) -> Option<&TplFunc> {
        self.functions.get(name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let func = self
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))?;
        func(args)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Functions of `self` overridden by those of `other`.
    pub fn merged(&self, other: &TemplateFunctions) -> TemplateFunctions {
        let mut functions = self.functions.clone();
        functions.extend(
            other
                .functions
                .iter()
                .map(|(name, func)| (name.clone(), Arc::clone(func))),
        );
        TemplateFunctions { functions }
    }
}

impl std::fmt::Debug for TemplateFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

pub trait Templator: Send + Sync {
    fn render(
        &self,
        out: &mut dyn io::Write,
        name: &str,
        data: &TemplateData<'_>,
    ) -> Result<(), TemplateError>;
}

/// Everything a template can see while rendering one response.
pub struct TemplateData<'a> {
    pub data: &'a Value,
    pub request: &'a Request,
    pub session: Option<&'a dyn SessionStore>,
    pub store: &'a Store,
    pub flash: FlashMessages,
    pub functions: &'a TemplateFunctions,
}

impl<'a> TemplateData<'a> {
    pub fn new(
        data: &'a Value,
        request: &'a Request,
        session: Option<&'a dyn SessionStore>,
        store: &'a Store,
        flash: FlashMessages,
    ) -> Self {
        Self {
            data,
            request,
            session,
            store,
            flash,
            functions: &NO_FUNCTIONS,
        }
    }

    pub fn with_functions(mut self, functions: &'a TemplateFunctions) -> Self {
        self.functions = functions;
        self
    }

    /// Call the template function `name`.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        self.functions.call(name, args)
    }

    /// Value of `key` in the per-request store.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    /// Flash message of `category`, if one was pending.
    pub fn flash(&self, category: &str) -> Option<&str> {
        self.flash.get(category).map(String::as_str)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "data": self.data,
            "request": self.request.to_value(),
            "session": self.session.map(|session| Value::Object(session.snapshot())),
            "store": self.store,
            "flash": self.flash,
        })
    }
}

impl std::fmt::Debug for TemplateData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateData")
            .field("data", self.data)
            .field("path", &self.request.path())
            .field("session", &self.session.map(|session| session.id()))
            .field("flash", &self.flash)
            .field("functions", self.functions)
            .finish()
    }
}

/// Renders the whole envelope as JSON under the template name.
///
/// Handy for APIs and tests; real applications plug in their own engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTemplator;

impl Templator for JsonTemplator {
    fn render(
        &self,
        out: &mut dyn io::Write,
        name: &str,
        data: &TemplateData<'_>,
    ) -> Result<(), TemplateError> {
        let document = json!({
            "template": name,
            "context": data.to_value(),
        });
        serde_json::to_writer(&mut *out, &document).map_err(|err| TemplateError::Render {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_json_templator_envelope() {
        let request = Request::new(Method::GET, "/profile".parse().unwrap());
        let mut store = Store::new();
        store.insert("user".to_string(), Value::from("ada"));
        let data = json!({"title": "Profile"});
        let mut flash = FlashMessages::new();
        flash.insert("info".to_string(), "saved".to_string());

        let envelope = TemplateData::new(&data, &request, None, &store, flash);
        assert_eq!(envelope.flash("info"), Some("saved"));
        assert_eq!(envelope.get("user"), Some(&Value::from("ada")));

        let mut out = Vec::new();
        JsonTemplator.render(&mut out, "profile.html", &envelope).unwrap();

        let rendered: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(rendered["template"], "profile.html");
        assert_eq!(rendered["context"]["data"]["title"], "Profile");
        assert_eq!(rendered["context"]["store"]["user"], "ada");
        assert_eq!(rendered["context"]["flash"]["info"], "saved");
        assert_eq!(rendered["context"]["request"]["path"], "/profile");
        assert!(rendered["context"]["session"].is_null());
    }

    #[test]
    fn test_template_functions() {
        let mut functions = TemplateFunctions::new();
        functions.insert("upper", |args: &[Value]| match args {
            [Value::String(text)] => Ok(Value::from(text.to_uppercase())),
            _ => Err(TemplateError::Function {
                name: "upper".to_string(),
                reason: "expected one string".to_string(),
            }),
        });
        let mut overrides = TemplateFunctions::new();
        overrides.insert("year", |_: &[Value]| Ok(Value::from(2024)));

        let merged = functions.merged(&overrides);
        assert_eq!(merged.names().collect::<Vec<_>>(), vec!["upper", "year"]);

        let request = Request::new(Method::GET, "/".parse().unwrap());
        let (data, store) = (Value::Null, Store::new());
        let envelope = TemplateData::new(&data, &request, None, &store, FlashMessages::new())
            .with_functions(&merged);

        assert_eq!(envelope.call("upper", &[json!("skiff")]).unwrap(), "SKIFF");
        assert_eq!(envelope.call("year", &[]).unwrap(), 2024);
        assert!(matches!(
            envelope.call("upper", &[]),
            Err(TemplateError::Function { .. })
        ));
        assert!(matches!(
            envelope.call("missing", &[]),
            Err(TemplateError::UnknownFunction(_))
        ));
    }
}
