//! Built-in middleware.
//!
//! - [`timeout`] / [`timeout_with`]: per-request deadline; the chain
//!   answers `504 Gateway Timeout` if it is reached before a response is
//!   committed.
//! - [`request_log`]: gives every request a log record, so requests that
//!   never touch the logger themselves are still written.
//!
//! Middleware is an ordinary [`Handler`](crate::Handler): anything that
//! takes a [`Context`](crate::Context) and returns a future.

mod request_log;
mod timeout;

pub use request_log::request_log;
pub use timeout::{timeout, timeout_with};
