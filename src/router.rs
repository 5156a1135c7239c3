//! Radix-tree router, used as one middleware of the chain.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. The
//! router is itself a [`Handler`]: when the chain reaches it, it matches the
//! request, stores the path parameters on the context and runs the matched
//! handler in place. No match is an [`HttpError`]: 405 when the path exists
//! under another method, 404 otherwise.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use http::Method;
use matchit::Router as MatchitRouter;

use crate::context::Context;
use crate::error::HttpError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerResult, private};
use crate::storage::Slot;

type Params = Arc<HashMap<String, String>>;

static PARAMS: LazyLock<Slot<Params>> = LazyLock::new(Slot::new);

/// The application router.
///
/// ```rust,no_run
/// # use strata::{Context, Router};
/// # use http::Method;
/// # async fn get_user(_: Context) {}
/// # async fn create_user(_: Context) {}
/// Router::new()
///     .on(Method::GET,  "/users/{id}", get_user)
///     .on(Method::POST, "/users",      create_user);
/// ```
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers `handler` for a method + path pair. Returns `self` for
    /// chaining. Path parameters use `{name}` syntax.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with an existing one.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    fn lookup(&self, method: &Method, path: &str) -> Result<(BoxedHandler, Params), HttpError> {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Ok((Arc::clone(matched.value), Arc::new(params)));
        }

        let elsewhere = self.routes.iter()
            .any(|(m, tree)| m != method && tree.at(path).is_ok());
        Err(if elsewhere {
            HttpError::from_status(http::StatusCode::METHOD_NOT_ALLOWED)
        } else {
            HttpError::not_found()
        })
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl ErasedHandler for Router {
    fn call(&self, ctx: Context) -> BoxFuture {
        let req = ctx.request();
        match self.lookup(req.method(), req.path()) {
            Ok((handler, params)) => {
                ctx.set(&PARAMS, params);
                handler.call(ctx)
            }
            Err(e) => Box::pin(async move { HandlerResult::Err(e.into()) }),
        }
    }
}

impl private::Sealed for Router {}

impl Handler for Router {
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

pub(crate) fn param(ctx: &Context, name: &str) -> Option<String> {
    ctx.get(&PARAMS).and_then(|p| p.get(name).cloned())
}
