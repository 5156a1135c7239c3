//! End-of-request hooks.
//!
//! Hooks are zero-argument callbacks queued while a request is processed.
//! [`Hooks::fire`] runs them once, in registration order, when the request
//! terminates (success, error, panic, timeout or connection teardown).
//! A hook that panics is logged and skipped; the remaining hooks still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;

use tracing::{error, warn};

use crate::panic::panic_message;

type Hook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    queue: Vec<Hook>,
    fired: bool,
}

/// Ordered, fire-once hook list.
#[derive(Default)]
pub struct Hooks {
    state: Mutex<State>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook`. Hooks registered after [`fire`](Self::fire) are
    /// dropped without running.
    pub fn on_end<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.fired {
            warn!("end hook registered after the request finished; dropping it");
            return;
        }
        state.queue.push(Box::new(hook));
    }

    /// Runs every queued hook exactly once, FIFO. Later calls are no-ops.
    ///
    /// Returns the number of hooks run by this call.
    pub fn fire(&self) -> usize {
        // Take the queue before running anything, so a hook that registers
        // another hook cannot deadlock on the lock.
        let queue = {
            let mut state = lock(&self.state);
            if state.fired {
                return 0;
            }
            state.fired = true;
            std::mem::take(&mut state.queue)
        };

        let count = queue.len();
        for (index, hook) in queue.into_iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
                error!(hook = index, panic = %panic_message(payload.as_ref()), "end hook panicked");
            }
        }
        count
    }

    pub fn is_fired(&self) -> bool {
        lock(&self.state).fired
    }

    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Hooks run outside the lock, so a poisoned mutex only means a panic in our
// own bookkeeping; the state is still consistent.
fn lock(m: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
