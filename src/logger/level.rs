use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Log severity. Lower is more severe; a threshold admits every level at or
/// below it.
///
/// Serialises as the lowercase name. Deserialises from anything
/// [`FromStr`] accepts, or from the bare ordinal.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Level {
    Emergency = 0,
    Alert     = 1,
    Critical  = 2,
    Error     = 3,
    Warning   = 4,
    Notice    = 5,
    Info      = 6,
    Debug     = 7,
}

impl Level {
    pub const ALL: [Level; 8] = [
        Level::Emergency,
        Level::Alert,
        Level::Critical,
        Level::Error,
        Level::Warning,
        Level::Notice,
        Level::Info,
        Level::Debug,
    ];

    /// The tag written into each log line.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Emergency => "EMERGENCY",
            Level::Alert     => "ALERT",
            Level::Critical  => "CRITICAL",
            Level::Error     => "ERROR",
            Level::Warning   => "WARNING",
            Level::Notice    => "NOTICE",
            Level::Info      => "INFO",
            Level::Debug     => "DEBUG",
        }
    }

    /// Emergency through Error carry a stack trace.
    pub fn has_trace(self) -> bool {
        self <= Level::Error
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for Level {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self, Error> {
        Self::ALL.get(usize::from(n)).copied().ok_or(Error::InvalidLevel(n))
    }
}

/// Case-insensitive: `"info"`, `"INFO"`, `"warn"` and numeric `"6"` all parse.
impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Level::try_from(n);
        }
        match s.to_ascii_lowercase().as_str() {
            "emergency" | "emerg" => Ok(Level::Emergency),
            "alert"               => Ok(Level::Alert),
            "critical" | "crit"   => Ok(Level::Critical),
            "error" | "err"       => Ok(Level::Error),
            "warning" | "warn"    => Ok(Level::Warning),
            "notice"              => Ok(Level::Notice),
            "info"                => Ok(Level::Info),
            "debug"               => Ok(Level::Debug),
            _                     => Err(Error::UnknownLevel(s.to_owned())),
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LevelVisitor)
    }
}

struct LevelVisitor;

impl Visitor<'_> for LevelVisitor {
    type Value = Level;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a level name or an ordinal from 0 to 7")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Level, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Level, E> {
        u8::try_from(v)
            .ok()
            .and_then(|n| Level::try_from(n).ok())
            .ok_or_else(|| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Level, E> {
        u64::try_from(v)
            .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
            .and_then(|n| self.visit_u64(n))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
