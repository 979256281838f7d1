use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::CtxError;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("ctx function not found: {0}")]
    NotFound(String),

    #[error("function {name:?} is not a valid ctx function: expected {expected}, found {found}")]
    Signature {
        name: String,
        expected: String,
        found: String,
    },
}

/// How a function reports its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Returns exactly one value.
    Value,
    /// Returns a value or an error.
    Fallible,
}

/// Argument tuple and output type of a ctx function.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    args: TypeId,
    args_name: &'static str,
    output: TypeId,
    output_name: &'static str,
    shape: Shape,
}

impl Signature {
    pub fn of<A: 'static, R: 'static>(shape: Shape) -> Self {
        Self {
            args: TypeId::of::<A>(),
            args_name: type_name::<A>(),
            output: TypeId::of::<R>(),
            output_name: type_name::<R>(),
            shape,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Shape is ignored: call sites see both shapes as `Result<R, CtxError>`.
    pub fn accepts(&self, other: &Signature) -> bool {
        self.args == other.args && self.output == other.output
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Value => write!(
                f,
                "fn(&mut RequestContext, {}) -> {}",
                self.args_name, self.output_name
            ),
            Shape::Fallible => write!(
                f,
                "fn(&mut RequestContext, {}) -> Result<{}, _>",
                self.args_name, self.output_name
            ),
        }
    }
}

type Erased = Arc<
    dyn Fn(&mut RequestContext, Box<dyn Any + Send>) -> Result<Box<dyn Any + Send>, CtxError>
        + Send
        + Sync,
>;

/// A behavior callable by name from a [`RequestContext`].
///
/// Built through [`CtxFunc::value`] or [`CtxFunc::fallible`], the only two
/// accepted shapes. Both are stored behind one uniform invocable.
#[derive(Clone)]
pub struct CtxFunc {
    signature: Signature,
    call: Erased,
}

impl CtxFunc {
    /// Wrap a function returning a single value.
    pub fn value<A, R, F>(f: F) -> Self
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(&mut RequestContext, A) -> R + Send + Sync + 'static,
    {
        let signature = Signature::of::<A, R>(Shape::Value);
        let call: Erased = Arc::new(move |ctx: &mut RequestContext, args: Box<dyn Any + Send>| {
            let args = downcast_args::<A>(args, &signature)?;
            Ok(Box::new(f(ctx, args)) as Box<dyn Any + Send>)
        });
        Self { signature, call }
    }

    /// Wrap a function returning a value or an error.
    pub fn fallible<A, R, E, F>(f: F) -> Self
    where
        A: Send + 'static,
        R: Send + 'static,
        E: Into<CtxError>,
        F: Fn(&mut RequestContext, A) -> Result<R, E> + Send + Sync + 'static,
    {
        let signature = Signature::of::<A, R>(Shape::Fallible);
        let call: Erased = Arc::new(move |ctx: &mut RequestContext, args: Box<dyn Any + Send>| {
            let args = downcast_args::<A>(args, &signature)?;
            f(ctx, args)
                .map(|output| Box::new(output) as Box<dyn Any + Send>)
                .map_err(Into::into)
        });
        Self { signature, call }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Debug for CtxFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtxFunc")
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

fn downcast_args<A: 'static>(
    args: Box<dyn Any + Send>,
    signature: &Signature,
) -> Result<A, CtxError> {
    args.downcast::<A>().map(|args| *args).map_err(|_| {
        RegistryError::Signature {
            name: String::from("<argument>"),
            expected: signature.to_string(),
            found: String::from("mismatched argument tuple"),
        }
        .into()
    })
}

/// Typed handle to a resolved ctx function.
pub struct FuncHandle<A, R> {
    name: String,
    call: Erased,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> FuncHandle<A, R>
where
    A: Send + 'static,
    R: 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the function. Value-shaped functions never produce an error.
    pub fn invoke(&self, ctx: &mut RequestContext, args: A) -> Result<R, CtxError> {
        let output = (self.call)(ctx, Box::new(args))?;
        output.downcast::<R>().map(|output| *output).map_err(|_| {
            RegistryError::Signature {
                name: self.name.clone(),
                expected: type_name::<R>().to_string(),
                found: String::from("mismatched output"),
            }
            .into()
        })
    }
}

impl<A, R> Clone for FuncHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            call: Arc::clone(&self.call),
            _types: PhantomData,
        }
    }
}

/// Name to behavior table.
///
/// Names may carry a declared contract. Registering a function whose
/// signature does not satisfy the contract fails immediately, so a bad
/// override is caught at setup rather than on the first request.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, CtxFunc>,
    contracts: HashMap<String, Signature>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the signature every function registered under `name` must have.
    pub fn declare<A: 'static, R: 'static>(&mut self, name: impl Into<String>) -> &mut Self {
        self.contracts
            .insert(name.into(), Signature::of::<A, R>(Shape::Fallible));
        self
    }

    pub fn contract(&self, name: &str) -> Option<&Signature> {
        self.contracts.get(name)
    }

    /// Register or replace the function stored under `name`.
    pub fn register(&mut self, name: impl Into<String>, func: CtxFunc) -> Result<(), RegistryError> {
        let name = name.into();
        if let Some(contract) = self.contracts.get(&name) {
            if !contract.accepts(func.signature()) {
                return Err(RegistryError::Signature {
                    name,
                    expected: contract.to_string(),
                    found: func.signature().to_string(),
                });
            }
        }

        debug!(function = %name, signature = %func.signature(), "Registered ctx function");
        self.functions.insert(name, func);
        Ok(())
    }

    pub fn register_all<I, N>(&mut self, functions: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (N, CtxFunc)>,
        N: Into<String>,
    {
        for (name, func) in functions {
            self.register(name, func)?;
        }
        Ok(())
    }

    /// Resolve `name` to a handle typed for the caller's argument and output.
    pub fn resolve<A, R>(&self, name: &str) -> Result<FuncHandle<A, R>, RegistryError>
    where
        A: Send + 'static,
        R: 'static,
    {
        let func = self
            .functions
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let wanted = Signature::of::<A, R>(func.signature.shape());
        if !wanted.accepts(&func.signature) {
            return Err(RegistryError::Signature {
                name: name.to_string(),
                expected: wanted.to_string(),
                found: func.signature.to_string(),
            });
        }

        Ok(FuncHandle {
            name: name.to_string(),
            call: Arc::clone(&func.call),
            _types: PhantomData,
        })
    }

    pub fn get(&self, name: &str) -> Option<&CtxFunc> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
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

    /// New table holding `self` extended by `other`.
    ///
    /// Contracts from both sides apply; functions from `other` replace those
    /// of `self` and are validated against the merged contracts.
    pub fn merged(&self, other: &FunctionTable) -> Result<FunctionTable, RegistryError> {
        let mut merged = self.clone();
        for (name, contract) in &other.contracts {
            merged.contracts.entry(name.clone()).or_insert(*contract);
        }
        for (name, func) in &other.functions {
            merged.register(name.clone(), func.clone())?;
        }
        Ok(merged)
    }

    pub(crate) fn insert_declared<A: 'static, R: 'static>(&mut self, name: &str, func: CtxFunc) {
        self.declare::<A, R>(name);
        self.functions.insert(name.to_string(), func);
    }
}
