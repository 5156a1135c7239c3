//! Error types.
//!
//! Two families live here and they never mix:
//!
//! - [`Error`]: infrastructure and configuration failures surfaced to the
//!   code that builds or runs the server (bad level, unreadable config,
//!   bind failure).
//! - [`BoxError`] / [`HttpError`]: what a handler returns to abort the
//!   chain. The chain looks for an [`HttpError`] anywhere in the error's
//!   `source()` chain to pick the response status; anything else is a 500.

use std::fmt;

use http::StatusCode;

/// The error type returned by strata's fallible setup and serving operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid log level {0}: expected 0 (emergency) through 7 (debug)")]
    InvalidLevel(u8),

    #[error("unknown log level `{0}`")]
    UnknownLevel(String),

    #[error("line format `{0}` must contain exactly three `{{}}` placeholders")]
    InvalidLineFormat(String),

    #[error("invalid time format `{0}`")]
    InvalidTimeFormat(String),

    #[error("invalid listen address `{0}`")]
    InvalidAddr(String),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

/// Type-erased error returned by handlers.
///
/// Any `std::error::Error + Send + Sync` converts into it with `?`, and so
/// do `&str` / `String` messages.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error carrying the HTTP status the client should see.
///
/// ```rust
/// use strata::HttpError;
/// use http::StatusCode;
///
/// let err = HttpError::new(StatusCode::CONFLICT, "user already exists");
/// assert_eq!(err.status(), StatusCode::CONFLICT);
/// ```
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// An error whose message is the status' canonical reason phrase.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or_default())
    }

    pub fn not_found() -> Self {
        Self::from_status(StatusCode::NOT_FOUND)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// Finds the first [`HttpError`] in `err`'s source chain.
pub(crate) fn find_http_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a HttpError> {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if let Some(http) = e.downcast_ref::<HttpError>() {
            return Some(http);
        }
        cur = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapped(HttpError);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "while loading user: {}", self.0)
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn finds_status_through_source_chain() {
        let err: BoxError = Box::new(Wrapped(HttpError::new(StatusCode::FORBIDDEN, "nope")));
        let found = find_http_error(err.as_ref()).map(HttpError::status);
        assert_eq!(found, Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn plain_errors_have_no_status() {
        let err: BoxError = "disk on fire".into();
        assert!(find_http_error(err.as_ref()).is_none());
    }
}
