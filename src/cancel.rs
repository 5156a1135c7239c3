//! Hierarchical cancellation scopes.
//!
//! Every request starts with one root [`CancelScope`]. Middleware derives
//! children from it, optionally with a deadline:
//!
//! ```text
//! root ──► derive(Some(100ms)) ──► child ──► derive(None) ──► grandchild
//! ```
//!
//! A scope is "done" once its own cancel handle is called, its own deadline
//! elapses, or any ancestor becomes done. Done-ness flows parent → child
//! only. The transition happens once and never reverses; any number of
//! tasks can await it at the same time.
//!
//! Propagation rides on [`tokio_util::sync::CancellationToken`] child
//! tokens. Deadlines are enforced by one small timer task per scope, which
//! exits as soon as the scope is done for any other reason.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a scope became done.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DoneReason {
    /// A cancel handle was called (on this scope or an ancestor).
    Cancelled,
    /// A deadline elapsed (on this scope or an ancestor).
    DeadlineExceeded,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cancelled => "context cancelled",
            Self::DeadlineExceeded => "context deadline exceeded",
        })
    }
}

struct Inner {
    token: CancellationToken,
    reason: OnceLock<DoneReason>,
    deadline: Option<Instant>,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn finish(&self, reason: DoneReason) {
        // A scope already done through its parent keeps the parent's reason.
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    fn reason(&self) -> Option<DoneReason> {
        if let Some(r) = self.reason.get() {
            return Some(*r);
        }
        if !self.token.is_cancelled() {
            return None;
        }
        match &self.parent {
            Some(parent) => parent.reason(),
            // A root is only ever finished through `finish`.
            None => Some(DoneReason::Cancelled),
        }
    }
}

/// A node in the cancellation tree. Cheap to clone; clones observe the same
/// done signal.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<Inner>,
}

impl CancelScope {
    /// A new root scope with no deadline.
    pub fn root() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Derives a child scope.
    ///
    /// With `Some(timeout)` the child becomes done with
    /// [`DoneReason::DeadlineExceeded`] once `timeout` elapses, unless it is
    /// cancelled first. The child's effective deadline is never later than
    /// its parent's.
    ///
    /// # Panics
    ///
    /// With `Some(timeout)`, panics if called outside a tokio runtime (the
    /// deadline timer is a spawned task).
    pub fn derive(&self, timeout: Option<Duration>) -> (CancelScope, CancelHandle) {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (own, self.inner.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let inner = Arc::new(Inner {
            token: self.inner.token.child_token(),
            reason: OnceLock::new(),
            deadline,
            parent: Some(Arc::clone(&self.inner)),
        });

        // Only arm a timer when this scope's own deadline is the binding one;
        // an earlier parent deadline reaches us through the token tree.
        if let Some(at) = own.filter(|at| self.inner.deadline.is_none_or(|p| *at < p)) {
            let timer = Arc::clone(&inner);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep_until(at) => timer.finish(DoneReason::DeadlineExceeded),
                    () = timer.token.cancelled() => {}
                }
            });
        }

        let handle = CancelHandle { inner: Arc::clone(&inner) };
        (CancelScope { inner }, handle)
    }

    /// Resolves once the scope is done. Never resolves for a live scope that
    /// nobody cancels.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Owned variant of [`done`](Self::done) for use in spawned tasks.
    pub async fn done_owned(self) {
        self.inner.token.cancelled().await;
    }

    pub fn is_done(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// `None` while the scope is live.
    pub fn reason(&self) -> Option<DoneReason> {
        self.inner.reason()
    }

    /// The effective deadline, inherited from ancestors when earlier.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancels this scope and everything derived from it.
    pub fn cancel(&self) {
        self.inner.finish(DoneReason::Cancelled);
    }

    /// True when both values are clones of the same scope.
    pub fn same_scope(&self, other: &CancelScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelScope")
            .field("done", &self.is_done())
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Cancels the scope it was derived with. Idempotent.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.finish(DoneReason::Cancelled);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").field("done", &self.inner.token.is_cancelled()).finish()
    }
}
