use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

/// The request-scoped key/value accumulator.
///
/// A cheap handle: clones refer to the same fields, which is what makes
/// repeated [`Logger::from_request`](super::Logger::from_request) calls
/// observe one record. Compare handles with [`ptr_eq`](Self::ptr_eq).
///
/// A record left empty at the end of the request is not written.
#[derive(Clone, Default)]
pub struct LogRecord {
    fields: Arc<Mutex<Map<String, Value>>>,
}

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.fields.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets `key`, keeping its original position if it already existed.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.lock().insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().shift_remove(key)
    }

    /// Drops every field, suppressing the record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ptr_eq(&self, other: &LogRecord) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }

    /// `{"key":value,…}` in insertion order.
    pub fn to_json(&self) -> String {
        Value::Object(self.snapshot()).to_string()
    }

    /// `key=value key=value` in insertion order.
    pub fn to_text(&self) -> String {
        render_text(&self.lock())
    }
}

impl std::fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.lock().iter()).finish()
    }
}

/// Human-readable rendering of a field map.
pub(crate) fn render_text(fields: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = match value {
            Value::String(s) if needs_quotes(s) => write!(out, "{key}={s:?}"),
            Value::String(s) => write!(out, "{key}={s}"),
            other => write!(out, "{key}={other}"),
        };
    }
    out
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '"' || c == '=')
}
