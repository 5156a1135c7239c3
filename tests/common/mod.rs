#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use strata::{Chain, Level, Logger, LoggerConfig};

/// In-memory sink shared between the logger and the test.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn json_logger() -> (Logger, SharedBuffer) {
    let buf = SharedBuffer::default();
    let logger = LoggerConfig::new(buf.clone())
        .level(Level::Debug)
        .json(true)
        .build()
        .unwrap();
    (logger, buf)
}

pub fn chain_with(logger: &Logger) -> Chain {
    Chain::new().with_logger(logger.clone())
}

pub fn get(uri: &str) -> http::Request<Bytes> {
    http::Request::builder().uri(uri).body(Bytes::new()).unwrap()
}

pub fn post_json(uri: &str, body: &'static str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Bytes::from_static(body.as_bytes()))
        .unwrap()
}

/// The message part of a `timestamp LEVEL message` line, parsed as JSON.
pub fn record_of(line: &str) -> serde_json::Value {
    let message = line.splitn(3, ' ').nth(2).expect("line has no message");
    serde_json::from_str(message).expect("message is not JSON")
}
