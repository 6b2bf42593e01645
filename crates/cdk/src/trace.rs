// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide trace hook.
//!
//! The toolkit logs through the `log` facade. Applications that want the
//! traces without pulling in a logger install a single hook with
//! [`set_trace_function`]; it receives every record emitted by this crate,
//! converted to a [`TraceLevel`], together with the id of the connection
//! that emitted it when there is one.
//!
//! The hook is process-lifetime configuration: set it once at startup,
//! before creating connections. It cannot be replaced, and it cannot be
//! installed when another `log` backend is already registered.

use crate::connection::{ConnectionId, LOG_TARGET_PREFIX};
use crate::error::{Error, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

/// Trace severity, 1 (most severe) to 8 (most verbose).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TraceLevel {
    Critical = 1,
    Error = 2,
    Warning = 3,
    Notice = 4,
    Info = 5,
    Detail = 6,
    Verbose = 7,
    Debug = 8,
}

impl TraceLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        Some(match level {
            1 => Self::Critical,
            2 => Self::Error,
            3 => Self::Warning,
            4 => Self::Notice,
            5 => Self::Info,
            6 => Self::Detail,
            7 => Self::Verbose,
            8 => Self::Debug,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Detail => "DETAIL",
            Self::Verbose => "VERBOSE",
            Self::Debug => "DEBUG",
        }
    }

    /// Most verbose `log` filter that still produces this level.
    fn to_filter(self) -> LevelFilter {
        match self {
            Self::Critical | Self::Error => LevelFilter::Error,
            Self::Warning | Self::Notice => LevelFilter::Warn,
            Self::Info | Self::Detail => LevelFilter::Info,
            Self::Verbose => LevelFilter::Debug,
            Self::Debug => LevelFilter::Trace,
        }
    }
}

impl From<Level> for TraceLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => Self::Error,
            Level::Warn => Self::Warning,
            Level::Info => Self::Info,
            Level::Debug => Self::Verbose,
            Level::Trace => Self::Debug,
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature of the trace hook: emitting connection, level, text.
pub type TraceFunction = Arc<dyn Fn(Option<ConnectionId>, TraceLevel, &str) + Send + Sync>;

/// Connection id carried by a record target, if any.
fn connection_of(target: &str) -> Option<ConnectionId> {
    target
        .strip_prefix(LOG_TARGET_PREFIX)?
        .parse::<u64>()
        .ok()
        .map(ConnectionId::from_raw)
}

fn is_own_target(target: &str) -> bool {
    target == "cdk" || target.starts_with("cdk::")
}

struct TraceBridge {
    hook: TraceFunction,
}

impl Log for TraceBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let text = record.args().to_string();
        (self.hook)(connection_of(record.target()), record.level().into(), &text);
    }

    fn flush(&self) {}
}

/// Install the process-wide trace hook.
///
/// Fails with [`Error::InvalidState`] when a hook (or any other `log`
/// backend) is already installed. Every level is forwarded until
/// [`set_trace_level`] narrows it.
///
/// ```no_run
/// use cdk::trace::{set_trace_function, TraceLevel};
///
/// set_trace_function(|conn, level, text| {
///     if level <= TraceLevel::Warning {
///         eprintln!("[{:?}] {}: {}", conn, level, text);
///     }
/// })
/// .unwrap();
/// ```
pub fn set_trace_function<F>(hook: F) -> Result<()>
where
    F: Fn(Option<ConnectionId>, TraceLevel, &str) + Send + Sync + 'static,
{
    let bridge = TraceBridge {
        hook: Arc::new(hook),
    };
    log::set_boxed_logger(Box::new(bridge))
        .map_err(|_| Error::InvalidState("trace function already set".into()))?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}

/// Drop records more verbose than `level`.
pub fn set_trace_level(level: TraceLevel) {
    log::set_max_level(level.to_filter());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_numbers() {
        assert_eq!(TraceLevel::Critical.as_u8(), 1);
        assert_eq!(TraceLevel::Debug.as_u8(), 8);
        assert_eq!(TraceLevel::from_u8(3), Some(TraceLevel::Warning));
        assert_eq!(TraceLevel::from_u8(0), None);
        assert_eq!(TraceLevel::from_u8(9), None);
        assert!(TraceLevel::Critical < TraceLevel::Debug);
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(TraceLevel::from(Level::Error).as_u8(), 2);
        assert_eq!(TraceLevel::from(Level::Warn).as_u8(), 3);
        assert_eq!(TraceLevel::from(Level::Info).as_u8(), 5);
        assert_eq!(TraceLevel::from(Level::Debug).as_u8(), 7);
        assert_eq!(TraceLevel::from(Level::Trace).as_u8(), 8);
        assert_eq!(TraceLevel::Notice.to_filter(), LevelFilter::Warn);
    }

    #[test]
    fn test_connection_from_target() {
        let target = format!("{}{}", LOG_TARGET_PREFIX, 17);
        assert_eq!(connection_of(&target), Some(ConnectionId::from_raw(17)));
        assert_eq!(connection_of("cdk::queue"), None);
        assert_eq!(connection_of("cdk::connection#x"), None);
    }

    #[test]
    fn test_only_own_records_forwarded() {
        assert!(is_own_target("cdk::discover"));
        assert!(is_own_target(&format!("{}3", LOG_TARGET_PREFIX)));
        assert!(!is_own_target("cdkx::other"));
        assert!(!is_own_target("rustls::client"));
    }
}
