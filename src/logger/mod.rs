//! Structured request logging.
//!
//! One [`Logger`] owns one output sink behind one mutex. It offers:
//!
//! - level-filtered emission ([`Logger::log`] and the per-level shorthands),
//!   one physical line per call: `timestamp level message`;
//! - a per-request [`LogRecord`], created on first
//!   [`from_request`](Logger::from_request) and written once when the request
//!   ends.
//!
//! ```text
//! from_request(ctx) ── first call ──► init hook seeds ip/method/url/start
//!                                     ctx.on_end(consume + flush)
//! middleware ───────── record.insert("user", …)
//! request ends ─────── consume hook adds status/length/duration
//!                      (+ bodies when status == 500)
//!                      flush task: render + write under the sink mutex
//! ```
//!
//! The flush runs on a blocking task tracked by the logger, so a slow sink
//! never delays the response; [`Logger::flush`] waits for pending writes.

mod level;
mod record;

pub mod global;

use std::fmt::Write as _;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

use crate::config::LogSettings;
use crate::context::Context;
use crate::error::Error;
use crate::panic::{panic_message, take_backtrace};
use crate::storage::Slot;

pub use level::Level;
pub use record::LogRecord;

/// Seeds a fresh record (`init`) or completes it at request end (`consume`).
pub type RecordHook = Arc<dyn Fn(&LogRecord, &Context) + Send + Sync + 'static>;

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";
pub const DEFAULT_LINE_FORMAT: &str = "{} {} {}";

// ── Configuration ─────────────────────────────────────────────────────────────

/// Everything needed to build a [`Logger`].
///
/// ```rust
/// use strata::logger::{Level, LoggerConfig};
///
/// let logger = LoggerConfig::new(std::io::sink())
///     .level(Level::Debug)
///     .json(true)
///     .build()
///     .unwrap();
/// assert!(logger.enabled(Level::Debug));
/// ```
pub struct LoggerConfig {
    settings: LogSettings,
    init: RecordHook,
    consume: RecordHook,
    sink: Box<dyn Write + Send>,
}

impl LoggerConfig {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self::from_settings(LogSettings::default(), sink)
    }

    /// A config writing to standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    pub fn from_settings(settings: LogSettings, sink: impl Write + Send + 'static) -> Self {
        Self {
            settings,
            init: Arc::new(default_init),
            consume: Arc::new(default_consume),
            sink: Box::new(sink),
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.settings.level = level;
        self
    }

    /// A `chrono` strftime pattern.
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.settings.time_format = format.into();
        self
    }

    /// Must contain exactly three `{}` placeholders: timestamp, level, message.
    pub fn line_format(mut self, format: impl Into<String>) -> Self {
        self.settings.line_format = format.into();
        self
    }

    pub fn json(mut self, enabled: bool) -> Self {
        self.settings.json = enabled;
        self
    }

    pub fn init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LogRecord, &Context) + Send + Sync + 'static,
    {
        self.init = Arc::new(hook);
        self
    }

    pub fn consume<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LogRecord, &Context) + Send + Sync + 'static,
    {
        self.consume = Arc::new(hook);
        self
    }

    /// Validates the formats and builds the logger.
    pub fn build(self) -> Result<Logger, Error> {
        let line = LineFormat::parse(&self.settings.line_format)?;
        if StrftimeItems::new(&self.settings.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::InvalidTimeFormat(self.settings.time_format));
        }

        // Kept closed: `wait` then resolves whenever no flush is pending,
        // and closing does not stop new spawns.
        let flushes = TaskTracker::new();
        flushes.close();

        Ok(Logger {
            inner: Arc::new(Inner {
                level: AtomicU8::new(self.settings.level.into()),
                time_format: self.settings.time_format,
                line,
                json: self.settings.json,
                init: self.init,
                consume: self.consume,
                sink: Mutex::new(self.sink),
                slot: Slot::new(),
                flushes,
            }),
        })
    }
}

/// A line template split around its three placeholders.
struct LineFormat {
    pieces: [String; 4],
}

impl LineFormat {
    fn parse(format: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = format.split("{}").collect();
        let [a, b, c, d] = parts.as_slice() else {
            return Err(Error::InvalidLineFormat(format.to_owned()));
        };
        Ok(Self { pieces: [a, b, c, d].map(|p| (*p).to_owned()) })
    }

    fn render(&self, out: &mut String, timestamp: &str, level: &str, message: &str) {
        let [a, b, c, d] = &self.pieces;
        out.push_str(a);
        out.push_str(timestamp);
        out.push_str(b);
        out.push_str(level);
        out.push_str(c);
        push_escaped(out, message);
        out.push_str(d);
    }
}

/// CR and LF become the two-character sequences `\r` and `\n`.
fn push_escaped(out: &mut String, message: &str) {
    for ch in message.chars() {
        match ch {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

struct Inner {
    level: AtomicU8,
    time_format: String,
    line: LineFormat,
    json: bool,
    init: RecordHook,
    consume: RecordHook,
    sink: Mutex<Box<dyn Write + Send>>,
    slot: Slot<LogRecord>,
    flushes: TaskTracker,
}

/// Level-filtered line logger with per-request records. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl Logger {
    /// A logger with default settings writing to `sink`.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self::from_valid(LoggerConfig::new(sink))
    }

    /// Default settings, standard error.
    pub fn stderr() -> Self {
        Self::from_valid(LoggerConfig::stderr())
    }

    /// Writes nowhere.
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    fn from_valid(config: LoggerConfig) -> Self {
        match config.build() {
            Ok(logger) => logger,
            Err(e) => unreachable!("default logger settings rejected: {e}"),
        }
    }

    pub fn level(&self) -> Level {
        let n = self.inner.level.load(Ordering::Relaxed);
        Level::ALL[usize::from(n)]
    }

    /// Typed, so an out-of-range level cannot get here; parse raw values
    /// with `Level::try_from` / `str::parse` at startup.
    pub fn set_level(&self, level: Level) {
        self.inner.level.store(level.into(), Ordering::Relaxed);
    }

    pub fn is_json(&self) -> bool {
        self.inner.json
    }

    /// Whether a message at `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        u8::from(level) <= self.inner.level.load(Ordering::Relaxed)
    }

    // ── Emission ──────────────────────────────────────────────────────────────

    /// Writes `value` at `level` if the threshold admits it.
    ///
    /// Strings are written as-is; objects render as JSON in JSON mode and as
    /// `key=value` pairs otherwise. Emergency through Error append a stack
    /// trace of the call site. Nothing is converted or formatted when the
    /// level is filtered out.
    pub fn log<V: Into<Value>>(&self, level: Level, value: V) {
        if !self.enabled(level) {
            return;
        }
        let trace = level.has_trace().then(|| std::backtrace::Backtrace::force_capture().to_string());
        self.write_entry(level, &value.into(), trace.as_deref());
    }

    /// Like [`log`](Self::log) with a trace captured elsewhere, e.g. at a
    /// panic site.
    pub(crate) fn log_with_trace(&self, level: Level, value: Value, trace: Option<&str>) {
        if !self.enabled(level) {
            return;
        }
        self.write_entry(level, &value, trace);
    }

    pub fn emergency<V: Into<Value>>(&self, value: V) { self.log(Level::Emergency, value) }
    pub fn alert<V: Into<Value>>(&self, value: V) { self.log(Level::Alert, value) }
    pub fn critical<V: Into<Value>>(&self, value: V) { self.log(Level::Critical, value) }
    pub fn error<V: Into<Value>>(&self, value: V) { self.log(Level::Error, value) }
    pub fn warning<V: Into<Value>>(&self, value: V) { self.log(Level::Warning, value) }
    pub fn notice<V: Into<Value>>(&self, value: V) { self.log(Level::Notice, value) }
    pub fn info<V: Into<Value>>(&self, value: V) { self.log(Level::Info, value) }
    pub fn debug<V: Into<Value>>(&self, value: V) { self.log(Level::Debug, value) }

    fn write_entry(&self, level: Level, value: &Value, trace: Option<&str>) {
        let mut message = self.render(value);
        if let Some(trace) = trace {
            message.push('\n');
            message.push_str(trace);
        }
        let line = self.format_line(level, &message);
        self.write_line(&line);
    }

    fn render(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Object(map) if !self.inner.json => record::render_text(map),
            other => other.to_string(),
        }
    }

    fn format_line(&self, level: Level, message: &str) -> String {
        let mut timestamp = String::new();
        // Validated at build time; a formatting error just leaves it empty.
        let _ = write!(timestamp, "{}", Local::now().format(&self.inner.time_format));

        let mut line = String::with_capacity(timestamp.len() + message.len() + 16);
        self.inner.line.render(&mut line, &timestamp, level.as_str(), message);
        line.push('\n');
        line
    }

    /// One `write_all` under the sink mutex. Failures are reported through
    /// `tracing` and otherwise ignored.
    fn write_line(&self, line: &str) {
        let mut sink = self.inner.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = sink.write_all(line.as_bytes()).and_then(|()| sink.flush()) {
            warn!(error = %e, "log sink write failed");
        }
    }

    // ── Per-request records ───────────────────────────────────────────────────

    /// This request's record. The first call creates it through the init
    /// hook and schedules the consume hook and flush for request end; later
    /// calls return the same record.
    ///
    /// Once the request has finished, returns a detached record that is
    /// never written.
    pub fn from_request(&self, ctx: &Context) -> LogRecord {
        if let Some(record) = ctx.get(&self.inner.slot) {
            return record;
        }
        let record = LogRecord::new();
        if ctx.is_finished() {
            return record;
        }

        // The chain also reaches here while resolving a failure, outside any
        // handler's unwind boundary.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (self.inner.init)(&record, ctx))) {
            take_backtrace();
            error!(panic = %panic_message(payload.as_ref()), "log record init hook panicked");
        }
        ctx.set(&self.inner.slot, record.clone());

        let logger = self.clone();
        let (r, c) = (record.clone(), ctx.clone());
        ctx.on_end(move || logger.finish_request(&r, &c));
        record
    }

    /// End-of-request hook: consume, then hand the record to a flush task.
    fn finish_request(&self, record: &LogRecord, ctx: &Context) {
        (self.inner.consume)(record, ctx);
        if record.is_empty() || !self.enabled(Level::Info) {
            return;
        }

        // From here on the request side no longer touches the record.
        let logger = self.clone();
        let record = record.clone();
        let flush = move || {
            let fields = Value::Object(record.snapshot());
            let line = logger.format_line(Level::Info, &logger.render(&fields));
            logger.write_line(&line);
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            self.inner.flushes.spawn_blocking(flush);
        } else {
            flush();
        }
    }

    /// Waits until every record flush scheduled so far has been written.
    pub async fn flush(&self) {
        self.inner.flushes.wait().await;
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::stderr()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("json", &self.inner.json)
            .finish_non_exhaustive()
    }
}

// ── Default hooks ─────────────────────────────────────────────────────────────

/// Seeds `ip`, `method`, `url` and `start`.
pub fn default_init(record: &LogRecord, ctx: &Context) {
    let req = ctx.request();
    record
        .insert("ip", req.client_ip().unwrap_or_default())
        .insert("method", req.method().as_str())
        .insert("url", req.uri().to_string())
        .insert("start", ctx.started_at().to_rfc3339());
}

/// Adds `status`, `length` and `duration` (ms). For 500 responses, also
/// captures both bodies and their content types.
pub fn default_consume(record: &LogRecord, ctx: &Context) {
    let res = ctx.response();
    let status = res.status();
    record
        .insert("status", status.as_u16())
        .insert("length", res.content_length())
        .insert("duration", ctx.elapsed().as_secs_f64() * 1000.0);

    if status == http::StatusCode::INTERNAL_SERVER_ERROR {
        let req = ctx.request();
        record
            .insert("requestBody", String::from_utf8_lossy(req.body()).into_owned())
            .insert("requestContentType", req.content_type().unwrap_or_default())
            .insert("responseBody", String::from_utf8_lossy(&res.body()).into_owned())
            .insert("responseContentType", res.content_type().unwrap_or_default());
    }
}
