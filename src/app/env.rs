use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigError, Mode};
use crate::functions::{self, CtxFunc, FunctionTable, RegistryError};
use crate::template::{TemplateError, TemplateFunctions};

/// Configuration paired with the function tables contexts and templates
/// start from, and the directories behind the `static` route.
#[derive(Debug, Clone)]
pub struct Env {
    config: Config,
    functions: FunctionTable,
    template_functions: TemplateFunctions,
    static_dirs: Vec<PathBuf>,
}

impl Env {
    /// Environment with the built-in behaviors registered.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            functions: functions::builtin(),
            template_functions: TemplateFunctions::new(),
            static_dirs: Vec::new(),
        }
    }

    /// Default configuration and no functions at all.
    pub fn empty() -> Self {
        Self {
            config: Config::default(),
            functions: FunctionTable::new(),
            template_functions: TemplateFunctions::new(),
            static_dirs: Vec::new(),
        }
    }

    /// Environment from the layered configuration sources.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::new(Config::load()?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.app.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.config.app.mode = mode;
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn add_ctx_func(&mut self, name: &str, func: CtxFunc) -> Result<(), RegistryError> {
        self.functions.register(name, func)
    }

    pub fn add_ctx_funcs<I, N>(&mut self, funcs: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (N, CtxFunc)>,
        N: Into<String>,
    {
        self.functions.register_all(funcs)
    }

    pub fn template_functions(&self) -> &TemplateFunctions {
        &self.template_functions
    }

    pub fn add_tpl_func<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        self.template_functions.insert(name, func);
    }

    pub fn add_tpl_funcs(&mut self, funcs: &TemplateFunctions) {
        self.template_functions = self.template_functions.merged(funcs);
    }

    /// Directories searched, in order, by the `static` route.
    pub fn static_dirs(&self) -> &[PathBuf] {
        &self.static_dirs
    }

    /// Add directories to search; ones already present are skipped.
    pub fn add_static_dir<I, P>(&mut self, dirs: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for dir in dirs {
            let dir = dir.as_ref();
            if !self.static_dirs.iter().any(|known| known == dir) {
                self.static_dirs.push(dir.to_path_buf());
            }
        }
    }

    /// New environment: configuration of `self`, functions of `self`
    /// overridden by those of `other`, static directories of both. Neither
    /// side is modified.
    pub fn merge(&self, other: &Env) -> Result<Env, RegistryError> {
        let mut merged = Env {
            config: self.config.clone(),
            functions: self.functions.merged(&other.functions)?,
            template_functions: self.template_functions.merged(&other.template_functions),
            static_dirs: self.static_dirs.clone(),
        };
        merged.add_static_dir(&other.static_dirs);
        Ok(merged)
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
