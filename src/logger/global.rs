//! Optional process-wide logger.
//!
//! The server and chain always use the [`Logger`] they were given. These
//! wrappers exist for code with no context at hand (startup, background
//! jobs). They do nothing until [`install`] is called.

use std::sync::OnceLock;

use serde_json::Value;

use super::{Level, Logger};

static DEFAULT: OnceLock<Logger> = OnceLock::new();

/// Installs `logger` as the process default. Only the first call succeeds;
/// later calls hand the rejected logger back.
pub fn install(logger: Logger) -> Result<(), Logger> {
    DEFAULT.set(logger)
}

pub fn get() -> Option<&'static Logger> {
    DEFAULT.get()
}

pub fn log<V: Into<Value>>(level: Level, value: V) {
    if let Some(logger) = DEFAULT.get() {
        logger.log(level, value);
    }
}

pub fn emergency<V: Into<Value>>(value: V) { log(Level::Emergency, value) }
pub fn alert<V: Into<Value>>(value: V) { log(Level::Alert, value) }
pub fn critical<V: Into<Value>>(value: V) { log(Level::Critical, value) }
pub fn error<V: Into<Value>>(value: V) { log(Level::Error, value) }
pub fn warning<V: Into<Value>>(value: V) { log(Level::Warning, value) }
pub fn notice<V: Into<Value>>(value: V) { log(Level::Notice, value) }
pub fn info<V: Into<Value>>(value: V) { log(Level::Info, value) }
pub fn debug<V: Into<Value>>(value: V) { log(Level::Debug, value) }
