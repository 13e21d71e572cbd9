//! Handler trait, typed-parameter adapter, and the method map.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::protocol::Request;

use super::RequestContext;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler invocations: a JSON result value, or a
/// structured error the dispatcher carries to the wire unchanged.
pub type HandlerResult = Result<Value, Error>;

/// An invocable method handler.
///
/// The dispatcher calls `call` outside its locks; implementations must be
/// safe for concurrent use.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request under the given context.
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture<'static, HandlerResult>;
}

/// Resolves method names to handlers.
///
/// The dispatcher calls `assign` on every request after validation, with no
/// lock held; implementations must be safe for concurrent reads once the
/// server has started.
pub trait Assigner: Send + Sync + 'static {
    /// Resolve a method name, or `None` if the method is unknown.
    fn assign(&self, name: &str) -> Option<Arc<dyn Handler>>;

    /// The names this assigner can resolve, sorted. Used by the built-in
    /// `rpc.serverInfo` method.
    fn names(&self) -> Vec<String>;
}

/// Wrapper that deserializes params and serializes the result around a
/// plain async function.
///
/// Parameter decode failures map to invalid-params; result encode failures
/// map to internal errors.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(req.params_or_null()) {
            Ok(v) => v,
            Err(err) => {
                let err = Error::invalid_params(err.to_string());
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.handler)(ctx, parsed);
        Box::pin(async move {
            let value = fut.await?;
            serde_json::to_value(value).map_err(|err| Error::internal(err.to_string()))
        })
    }
}

/// A name-to-handler table.
///
/// This is the typical [`Assigner`]: populate it before starting the
/// server, then hand it over. The dispatcher layers the `rpc.serverInfo`
/// introspection method on top, so that name does not need registering.
#[derive(Default)]
pub struct MethodMap {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl MethodMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a typed handler function for a method name.
    ///
    /// The function receives the deserialized params and returns any
    /// serializable value; a previous handler under the same name is
    /// replaced.
    pub fn register<F, T, R, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
    {
        self.insert(name, Arc::new(TypedHandler::new(handler)))
    }

    /// Register a pre-built handler object.
    pub fn insert(&mut self, name: &str, handler: Arc<dyn Handler>) -> &mut Self {
        self.methods.insert(name.to_string(), handler);
        self
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the map has no methods.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Assigner for MethodMap {
    fn assign(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}
