//! Server and logger settings.
//!
//! Every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! listen = "0.0.0.0:3000"
//! request_timeout_ms = 5000
//!
//! [log]
//! level = "info"
//! json = true
//! time_format = "%Y-%m-%dT%H:%M:%S%.3f%:z"
//! line_format = "{} {} {}"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::logger::{DEFAULT_LINE_FORMAT, DEFAULT_TIME_FORMAT, Level};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Bind address, `host:port`.
    pub listen: String,

    /// Per-request deadline. `None` (or absent) disables the timeout
    /// middleware.
    pub request_timeout_ms: Option<u64>,

    pub log: LogSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_owned(),
            request_timeout_ms: None,
            log: LogSettings::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// The serialisable part of a [`LoggerConfig`](crate::logger::LoggerConfig).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: Level,
    pub time_format: String,
    /// Three `{}` placeholders: timestamp, level, message.
    pub line_format: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::Info,
            time_format: DEFAULT_TIME_FORMAT.to_owned(),
            line_format: DEFAULT_LINE_FORMAT.to_owned(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.listen, "0.0.0.0:3000");
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.log.level, Level::Info);
        assert!(!config.log.json);
    }

    #[test]
    fn reads_log_section() {
        let config = Config::from_toml_str(
            r#"
            request_timeout_ms = 250

            [log]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.log.level, Level::Debug);
        assert!(config.log.json);
        assert_eq!(config.log.line_format, DEFAULT_LINE_FORMAT);
    }

    #[test]
    fn level_accepts_aliases_and_ordinals() {
        let alias = Config::from_toml_str("[log]\nlevel = \"warn\"").unwrap();
        assert_eq!(alias.log.level, Level::Warning);

        let ordinal = Config::from_toml_str("[log]\nlevel = 6").unwrap();
        assert_eq!(ordinal.log.level, Level::Info);

        let out_of_range = Config::from_toml_str("[log]\nlevel = 9").unwrap_err();
        assert!(matches!(out_of_range, Error::Config(_)));
    }

    #[test]
    fn unknown_level_is_a_config_error() {
        let err = Config::from_toml_str("[log]\nlevel = \"verbose\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:8080\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080");
    }
}
