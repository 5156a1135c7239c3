//! Handler trait and type erasure.
//!
//! # How middleware is stored
//!
//! A [`Chain`](crate::Chain) holds middleware of *different* concrete types
//! in one `Vec`, so each is erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn auth(ctx: Context) -> Result<(), BoxError> { … }  ← user writes this
//!        ↓ chain.with(auth)
//! auth.into_boxed_handler()                                   ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(auth))                                   ← stored as BoxedHandler
//!        ↓
//! handler.call(ctx) at request time                           ← one vtable dispatch
//!        ↓
//! Box::pin(async { auth(ctx).await.into_handler_result() })   ← BoxFuture
//! ```
//!
//! Middleware receives the [`Context`] by value. It is a cheap `Arc` handle,
//! so the returned future owns everything it touches and can be `'static`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;

/// What every middleware resolves to: `Ok(())` to continue the chain,
/// `Err` to stop it.
pub type HandlerResult = Result<(), BoxError>;

/// A heap-allocated, type-erased middleware future.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── IntoHandlerResult ─────────────────────────────────────────────────────────

/// Conversion of a middleware's output into a [`HandlerResult`].
///
/// Lets middleware that cannot fail return `()`, and middleware with its own
/// error type return `Result<(), E>` without mapping.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult { Ok(()) }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_handler_result(self) -> HandlerResult { self.map_err(Into::into) }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid middleware.
///
/// Satisfied by any `async fn` (or closure returning a future) of shape:
///
/// ```text
/// async fn name(ctx: Context) -> ()
/// async fn name(ctx: Context) -> Result<(), E>   where E: Into<BoxError>
/// ```
///
/// and by [`Router`](crate::Router). Sealed: only the impls in this crate
/// can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

pub(crate) mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}
