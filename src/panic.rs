//! Panic-site backtrace capture.
//!
//! `catch_unwind` hands back only the panic payload; by the time it returns
//! the stack that panicked is gone. A process-wide panic hook records a
//! backtrace on the panicking thread, and the chain boundary picks it up
//! right after the unwind, on the same thread.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Installs the capturing hook on top of whatever hook was already set.
/// Idempotent.
pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded by the most recent panic on this thread.
pub(crate) fn take_backtrace() -> Option<String> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode() {
        panic!("boom at the site");
    }

    #[test]
    fn captures_trace_from_the_panicking_frame() {
        install_hook();
        let _ = take_backtrace();

        let payload = std::panic::catch_unwind(explode).unwrap_err();

        assert_eq!(panic_message(payload.as_ref()), "boom at the site");
        let trace = take_backtrace().expect("hook did not record a backtrace");
        assert!(!trace.is_empty());
        assert!(take_backtrace().is_none());
    }

    #[test]
    fn formatted_payloads_are_read() {
        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
