//! Response state shared by every middleware of one request.
//!
//! Handlers write status, headers and body through [`ResponseState`]. The
//! response is buffered until it is *committed*: from then on
//! (`header_written() == true`) every mutation is refused and the client
//! sees exactly what was committed.
//!
//! Commit is the arbitration point for the terminal-condition race. The
//! chain commits on completion, error or panic; the timeout path commits a
//! 504. Whoever commits first wins and the others observe `false`.

use std::sync::{Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`ResponseState::send`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── ResponseState ────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    header_written: bool,
}

/// The mutable, commit-once response of one request.
#[derive(Default)]
pub struct ResponseState {
    state: Mutex<State>,
}

impl ResponseState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The status the client will see; 200 until a handler sets one.
    pub fn status(&self) -> StatusCode {
        self.lock().status.unwrap_or(StatusCode::OK)
    }

    /// The status set explicitly by a handler, if any.
    pub fn explicit_status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    /// Returns `false` (and changes nothing) once committed.
    pub fn set_status(&self, status: StatusCode) -> bool {
        let mut s = self.lock();
        if s.header_written {
            return false;
        }
        s.status = Some(status);
        true
    }

    /// Returns `false` (and changes nothing) once committed.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut s = self.lock();
        if s.header_written {
            return false;
        }
        s.headers.insert(name, value);
        true
    }

    pub fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.lock().headers.get(name).cloned()
    }

    pub fn content_type(&self) -> Option<String> {
        self.lock()
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Appends to the body. Returns `false` (and drops `chunk`) once committed.
    pub fn write(&self, chunk: &[u8]) -> bool {
        let mut s = self.lock();
        if s.header_written {
            return false;
        }
        s.body.extend_from_slice(chunk);
        true
    }

    /// Replaces status, content type and body in one step.
    pub fn send(&self, status: StatusCode, content_type: ContentType, body: impl Into<Bytes>) -> bool {
        let mut s = self.lock();
        if s.header_written {
            return false;
        }
        fill(&mut s, status, content_type, body.into());
        true
    }

    /// `200 OK` with a plain-text body.
    pub fn text(&self, body: impl Into<String>) -> bool {
        self.send(StatusCode::OK, ContentType::Text, body.into())
    }

    /// `200 OK` with a JSON body.
    pub fn json(&self, body: impl Into<Bytes>) -> bool {
        self.send(StatusCode::OK, ContentType::Json, body)
    }

    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().body)
    }

    pub fn content_length(&self) -> usize {
        self.lock().body.len()
    }

    /// The point of no return.
    pub fn header_written(&self) -> bool {
        self.lock().header_written
    }

    /// Freezes the response as it stands. Returns `true` for the caller that
    /// performed the commit, `false` if it was already committed.
    pub fn commit(&self) -> bool {
        let mut s = self.lock();
        !std::mem::replace(&mut s.header_written, true)
    }

    /// Check-then-act under one lock: if nothing is committed yet, replaces
    /// the response with `status`/`body` and commits it.
    pub fn commit_with(&self, status: StatusCode, content_type: ContentType, body: impl Into<Bytes>) -> bool {
        let mut s = self.lock();
        if s.header_written {
            return false;
        }
        fill(&mut s, status, content_type, body.into());
        s.header_written = true;
        true
    }

    /// Builds the wire response from the committed state.
    pub(crate) fn to_http(&self) -> http::Response<Full<Bytes>> {
        let s = self.lock();
        let mut res = http::Response::new(Full::new(Bytes::copy_from_slice(&s.body)));
        *res.status_mut() = s.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = s.headers.clone();
        res
    }
}

fn fill(s: &mut State, status: StatusCode, content_type: ContentType, body: Bytes) {
    s.status = Some(status);
    s.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    s.body.clear();
    s.body.extend_from_slice(&body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_200_with_empty_body() {
        let res = ResponseState::new();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.explicit_status(), None);
        assert_eq!(res.content_length(), 0);
    }

    #[test]
    fn commit_freezes_the_response() {
        let res = ResponseState::new();
        res.send(StatusCode::CREATED, ContentType::Json, r#"{"id":1}"#);

        assert!(res.commit());
        assert!(!res.commit());
        assert!(!res.set_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!res.write(b"late"));

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.body(), Bytes::from_static(br#"{"id":1}"#));
        assert_eq!(res.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn commit_with_loses_to_an_earlier_commit() {
        let res = ResponseState::new();
        res.text("done");
        res.commit();

        assert!(!res.commit_with(StatusCode::GATEWAY_TIMEOUT, ContentType::Text, "timeout"));
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn commit_with_replaces_partial_output() {
        let res = ResponseState::new();
        res.write(b"half a page");

        assert!(res.commit_with(StatusCode::INTERNAL_SERVER_ERROR, ContentType::Text, "oops"));

        let http = res.to_http();
        assert_eq!(http.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), Bytes::from_static(b"oops"));
    }
}
