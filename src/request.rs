//! Incoming HTTP request view.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, Uri};

/// An incoming HTTP request with its body fully read.
///
/// Immutable once the context is created; middleware shares per-request
/// state through [`Context`](crate::Context) storage instead.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self { method, uri, headers, body, remote_addr }
    }

    /// Splits an `http::Request` whose body is already collected.
    pub fn from_http(req: http::Request<Bytes>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts.method, parts.uri, parts.headers, body, remote_addr)
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup; `None` for absent or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Best guess at the client address: first `X-Forwarded-For` hop, then
    /// `X-Real-IP`, then the socket peer.
    pub fn client_ip(&self) -> Option<String> {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.header("x-real-ip"))
            .map(str::to_owned)
            .or_else(|| self.remote_addr.map(|a| a.ip().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&'static str, &'static str)]) -> Request {
        let mut builder = http::Request::builder().uri("/users/1?x=y");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let req = builder.body(Bytes::new()).unwrap();
        Request::from_http(req, Some("10.0.0.9:4000".parse().unwrap()))
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let req = request(&[("X-Forwarded-For", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(req.client_ip().as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let req = request(&[]);
        assert_eq!(req.client_ip().as_deref(), Some("10.0.0.9"));
        assert_eq!(req.path(), "/users/1");
    }
}
