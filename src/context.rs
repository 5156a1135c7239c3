//! The per-request context.
//!
//! A [`Context`] is created for every inbound request and passed explicitly,
//! by value, to every middleware. It is a cheap handle (`Arc`) over:
//!
//! - the immutable [`Request`],
//! - the commit-once [`ResponseState`],
//! - the *active* [`CancelScope`] (the request root until middleware
//!   installs a derived child),
//! - slot-keyed [`Storage`],
//! - end-of-request [`Hooks`] and timeout hooks,
//! - the [`Logger`] injected by the server.
//!
//! Only the request task mutates storage. Clones handed to other tasks
//! (a log flush, a supervisor) read what they captured and do not write back.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::cancel::{CancelHandle, CancelScope, DoneReason};
use crate::hooks::Hooks;
use crate::logger::{LogRecord, Logger};
use crate::request::Request;
use crate::response::ResponseState;
use crate::storage::{Slot, Storage};

type TimeoutHook = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    request: Request,
    response: ResponseState,
    root: CancelScope,
    active: Mutex<CancelScope>,
    scope_changed: Notify,
    storage: Mutex<Storage>,
    hooks: Hooks,
    timeout_hooks: Mutex<Vec<TimeoutHook>>,
    logger: Logger,
    started: Instant,
    started_at: DateTime<Local>,
}

/// Per-request carrier of cancellation, storage and end-of-request hooks.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new(request: Request, logger: Logger) -> Self {
        let root = CancelScope::root();
        Self {
            inner: Arc::new(Inner {
                request,
                response: ResponseState::new(),
                active: Mutex::new(root.clone()),
                root,
                scope_changed: Notify::new(),
                storage: Mutex::new(Storage::new()),
                hooks: Hooks::new(),
                timeout_hooks: Mutex::new(Vec::new()),
                logger,
                started: Instant::now(),
                started_at: Local::now(),
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn response(&self) -> &ResponseState {
        &self.inner.response
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// This request's log record, created on first access.
    pub fn log_record(&self) -> LogRecord {
        self.inner.logger.from_request(self)
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.inner.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    /// The request's root scope. Cancelled when the request is torn down.
    pub fn root_scope(&self) -> &CancelScope {
        &self.inner.root
    }

    /// The scope later middleware runs under.
    pub fn cancellation(&self) -> CancelScope {
        lock(&self.inner.active).clone()
    }

    /// Derives a child of the active scope and makes it the active scope.
    ///
    /// Middleware registered after the caller runs under the child; its
    /// done signal also aborts the handler currently running.
    pub fn derive_scope(&self, timeout: Option<Duration>) -> (CancelScope, CancelHandle) {
        let derived = {
            let mut active = lock(&self.inner.active);
            let (child, cancel) = active.derive(timeout);
            *active = child.clone();
            (child, cancel)
        };
        self.inner.scope_changed.notify_waiters();
        derived
    }

    /// Resolves the next time [`derive_scope`](Self::derive_scope) installs a
    /// new active scope. Registered as soon as it is created.
    pub(crate) fn scope_changed(&self) -> Notified<'_> {
        self.inner.scope_changed.notified()
    }

    /// Resolves when the active scope (as of the call) is done.
    pub async fn done(&self) -> DoneReason {
        let scope = self.cancellation();
        scope.done().await;
        scope.reason().unwrap_or(DoneReason::Cancelled)
    }

    pub fn is_done(&self) -> bool {
        self.cancellation().is_done()
    }

    // ── Storage ───────────────────────────────────────────────────────────────

    pub fn set<T: Send + 'static>(&self, slot: &Slot<T>, value: T) -> Option<T> {
        lock(&self.inner.storage).set(slot, value)
    }

    /// A clone of the value under `slot`. Store `Arc`s or other handles for
    /// anything expensive to clone.
    pub fn get<T: Clone + Send + 'static>(&self, slot: &Slot<T>) -> Option<T> {
        lock(&self.inner.storage).get(slot).cloned()
    }

    pub fn remove<T: Send + 'static>(&self, slot: &Slot<T>) -> Option<T> {
        lock(&self.inner.storage).remove(slot)
    }

    /// Runs `f` with exclusive access to the storage map. `f` must not call
    /// back into this context's storage.
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut Storage) -> R) -> R {
        f(&mut lock(&self.inner.storage))
    }

    /// Path parameter captured by the [`Router`](crate::Router).
    pub fn param(&self, name: &str) -> Option<String> {
        crate::router::param(self, name)
    }

    // ── Hooks ─────────────────────────────────────────────────────────────────

    /// Queues `hook` to run once when the request finishes.
    pub fn on_end<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.hooks.on_end(hook);
    }

    /// Queues `hook` to run if the request ends by deadline while the
    /// response is still uncommitted.
    pub fn on_timeout<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.inner.timeout_hooks).push(Box::new(hook));
    }

    pub(crate) fn fire_timeout_hooks(&self) {
        let hooks = std::mem::take(&mut *lock(&self.inner.timeout_hooks));
        for hook in hooks {
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)) {
                tracing::error!(
                    panic = %crate::panic::panic_message(payload.as_ref()),
                    "timeout hook panicked"
                );
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.hooks.is_fired()
    }

    /// Ends the request: fires end hooks once, cancels the root scope and
    /// releases storage and pending timeout hooks. Idempotent.
    pub fn finish(&self) {
        self.inner.hooks.fire();
        self.inner.root.cancel();
        lock(&self.inner.timeout_hooks).clear();
        lock(&self.inner.storage).clear();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.inner.request.method())
            .field("uri", self.inner.request.uri())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> Context {
        let req = http::Request::builder().uri("/").body(Bytes::new()).unwrap();
        Context::new(Request::from_http(req, None), Logger::discard())
    }

    #[tokio::test]
    async fn derived_scope_becomes_active() {
        let ctx = context();
        let root = ctx.cancellation();
        let (child, cancel) = ctx.derive_scope(None);

        assert!(ctx.cancellation().same_scope(&child));
        cancel.cancel();

        assert!(ctx.is_done());
        assert!(!root.is_done());
        assert_eq!(ctx.done().await, DoneReason::Cancelled);
    }

    #[tokio::test]
    async fn finish_is_idempotent_and_releases_state() {
        let ctx = context();
        let slot: Slot<u32> = Slot::new();
        let fired = Arc::new(AtomicUsize::new(0));
        ctx.set(&slot, 7);
        let f = Arc::clone(&fired);
        ctx.on_end(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        ctx.finish();
        ctx.finish();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.get(&slot), None);
        assert!(ctx.root_scope().is_done());
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let ctx = context();
        let slot: Slot<String> = Slot::new();
        ctx.clone().set(&slot, "shared".to_owned());
        assert_eq!(ctx.get(&slot).as_deref(), Some("shared"));
    }
}
