//! # Leveled, observable logger handed to jobs and tasks.
//!
//! [`Logger`] is the logging collaborator every unit of work borrows. Each
//! accepted entry goes three ways:
//!
//! ```text
//! logger.info("...") ──► threshold check ──┬──► tracing (matching level)
//!                                          ├──► bounded history (entries())
//!                                          └──► Bus: EventKind::Log
//! ```
//!
//! Entries below the current threshold are discarded and return `None`.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{Bus, Event};

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Level {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl Level {
    fn from_u8(v: u8) -> Self {
        match v {
            0..=10 => Level::Debug,
            11..=20 => Level::Info,
            21..=30 => Level::Warning,
            31..=40 => Level::Error,
            _ => Level::Critical,
        }
    }

    /// Upper-case name as shown in log views.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

/// One accepted log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

struct Inner {
    level: AtomicU8,
    history: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    bus: Bus,
}

/// Shared logger handle. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl Logger {
    /// Creates a logger publishing to `bus`, keeping at most `history` entries.
    pub fn new(bus: Bus, level: Level, history: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                level: AtomicU8::new(level as u8),
                history: Mutex::new(VecDeque::with_capacity(history.min(1024))),
                capacity: history,
                bus,
            }),
        }
    }

    /// Current threshold.
    pub fn level(&self) -> Level {
        Level::from_u8(self.inner.level.load(Ordering::Relaxed))
    }

    /// Changes the threshold; affects subsequent entries only.
    pub fn set_level(&self, level: Level) {
        self.inner.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn debug(&self, message: impl Into<String>) -> Option<LogEntry> {
        self.log(Level::Debug, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> Option<LogEntry> {
        self.log(Level::Info, message, None)
    }

    pub fn warning(&self, message: impl Into<String>) -> Option<LogEntry> {
        self.log(Level::Warning, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> Option<LogEntry> {
        self.log(Level::Error, message, None)
    }

    /// Writes an entry at `level` with optional structured context.
    ///
    /// Returns the entry if it passed the threshold.
    pub fn log(
        &self,
        level: Level,
        message: impl Into<String>,
        context: Option<Value>,
    ) -> Option<LogEntry> {
        if level < self.level() {
            return None;
        }
        let entry = LogEntry {
            time: Utc::now(),
            level,
            message: message.into(),
            context,
        };

        match level {
            Level::Debug => tracing::debug!(message = %entry.message),
            Level::Info => tracing::info!(message = %entry.message),
            Level::Warning => tracing::warn!(message = %entry.message),
            Level::Error | Level::Critical => tracing::error!(message = %entry.message),
        }

        if self.inner.capacity > 0 {
            let mut history = self.inner.history.lock();
            if history.len() == self.inner.capacity {
                history.pop_front();
            }
            history.push_back(entry.clone());
        }
        self.inner.bus.publish(Event::log(entry.clone()));
        Some(entry)
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.history.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn entries_below_threshold_are_dropped() {
        let logger = Logger::new(Bus::new(8), Level::Info, 10);
        assert!(logger.debug("hidden").is_none());
        assert!(logger.warning("shown").is_some());

        logger.set_level(Level::Debug);
        assert!(logger.debug("now shown").is_some());
        assert_eq!(logger.entries().len(), 2);
    }

    #[test]
    fn history_is_bounded() {
        let logger = Logger::new(Bus::new(8), Level::Debug, 2);
        for i in 0..5 {
            logger.info(format!("line {i}"));
        }
        let messages: Vec<_> = logger.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["line 3", "line 4"]);
    }

    #[tokio::test]
    async fn entries_are_published_on_the_bus() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let logger = Logger::new(bus, Level::Info, 0);
        logger.error("disk full");

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::Log);
        let entry = ev.entry.unwrap();
        assert_eq!(entry.level, Level::Error);
        assert_eq!(entry.message, "disk full");
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn levels_parse_from_config_strings() {
        assert_eq!("WARN".parse::<Level>(), Ok(Level::Warning));
        assert!("loud".parse::<Level>().is_err());
    }
}
