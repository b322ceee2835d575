//! Logging utilities
//!
//! Logs always go to stderr: stdout carries the report, and in a worker
//! child only the result line.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a full filter directive, e.g. `testsched=trace`
pub const LOG_ENV: &str = "TESTSCHED_LOG";

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// `Debug` when verbose, `Info` otherwise
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Filter for `level`, unless `TESTSCHED_LOG` overrides it
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
}

fn default_directive(level: LogLevel) -> String {
    format!("testsched={}", level.to_tracing_level())
}

/// Initialize the logger with specified level
pub fn init_logger(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("info".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("unknown".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_verbose_level() {
        assert_eq!(LogLevel::from_verbose(true), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbose(false), LogLevel::Info);
        assert_eq!(default_directive(LogLevel::Warn), "testsched=WARN");
    }
}
