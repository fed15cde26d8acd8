//! Courier Logging Setup
//!
//! Courier crates log through [`tracing`]. This crate installs a
//! subscriber for hosts that do not bring their own, configured from the
//! environment.
//!
//! # Usage
//!
//! ```rust
//! // Reads COURIER_* variables; safe to call more than once.
//! courier_log::init();
//! tracing::info!(vault = "default", "Delivery started");
//! ```
//!
//! # Environment Variables
//!
//! - `COURIER_DEBUG=1` - Enable debug logging
//! - `COURIER_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `COURIER_LOG_FORMAT=pretty|compact|json` - Set output format
//! - `COURIER_LOG_COLOR=1|0` - Enable/disable colors
//! - `RUST_LOG` - Full filter directive, overrides the level when set

use once_cell::sync::OnceCell;
use std::env;
use std::fmt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include the event target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Json,
            color: false, // JSON output doesn't use colors
            target: true,
        }
    }
}

fn flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let debug = lookup("COURIER_DEBUG").is_some_and(|v| flag(&v));

        let level = lookup("COURIER_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("COURIER_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = lookup("COURIER_LOG_COLOR")
            .map(|v| flag(&v))
            .unwrap_or_else(|| {
                format != Format::Json && lookup("NO_COLOR").is_none() && lookup("TERM").is_some()
            });

        let target = lookup("COURIER_LOG_TARGET").is_none_or(|v| flag(&v));

        Self {
            level,
            format,
            color,
            target,
        }
    }

    /// Set the level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Build the event filter. `RUST_LOG` takes precedence when set.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }
}

// ============================================================================
// Installation
// ============================================================================

/// Error returned when a global subscriber is already installed.
#[derive(Debug)]
pub struct InitError(String);

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to install log subscriber: {}", self.0)
    }
}

impl std::error::Error for InitError {}

static INSTALLED: OnceCell<LogConfig> = OnceCell::new();

/// Install the global subscriber from the environment.
///
/// Later calls, or calls after another subscriber was installed, are
/// no-ops.
pub fn init() {
    let _ = try_init();
}

/// Install the global subscriber from the environment, reporting failure.
pub fn try_init() -> Result<&'static LogConfig, InitError> {
    try_init_with(LogConfig::from_env())
}

/// Install the global subscriber with an explicit configuration.
///
/// Concurrent callers wait for the first installation and all get its
/// configuration.
pub fn try_init_with(config: LogConfig) -> Result<&'static LogConfig, InitError> {
    INSTALLED.get_or_try_init(|| {
        install(&config)?;
        Ok(config)
    })
}

fn install(config: &LogConfig) -> Result<(), InitError> {
    let writer = BoxMakeWriter::new(std::io::stderr);
    let registry = tracing_subscriber::registry().with(config.filter());

    let result = match config.format {
        Format::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.target)
                    .with_writer(writer),
            )
            .try_init(),
        Format::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_target(config.target)
                    .with_writer(writer),
            )
            .try_init(),
        Format::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_target(config.target)
                    .with_writer(writer),
            )
            .try_init(),
    };

    result.map_err(|e| InitError(e.to_string()))
}

/// Configuration of the installed subscriber, if this crate installed one.
pub fn installed() -> Option<&'static LogConfig> {
    INSTALLED.get()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse(" DEBUG "), Some(Level::Debug));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("invalid"), None);
        assert_eq!(Level::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse("compact"), Some(Format::Compact));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[("COURIER_DEBUG", "true")]));
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("COURIER_DEBUG", "1"),
            ("COURIER_LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.level, Level::Warn);
    }

    #[test]
    fn test_color_follows_terminal_for_text_formats() {
        let config = LogConfig::from_lookup(lookup(&[
            ("COURIER_LOG_FORMAT", "pretty"),
            ("TERM", "xterm"),
        ]));
        assert_eq!(config.format, Format::Pretty);
        assert!(config.color);

        let config = LogConfig::from_lookup(lookup(&[
            ("COURIER_LOG_FORMAT", "pretty"),
            ("TERM", "xterm"),
            ("NO_COLOR", "1"),
        ]));
        assert!(!config.color);

        let config = LogConfig::from_lookup(lookup(&[("COURIER_LOG_COLOR", "1")]));
        assert!(config.color);
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::default()
            .with_level(Level::Trace)
            .with_format(Format::Compact);
        assert_eq!(config.level, Level::Trace);
        assert_eq!(config.format, Format::Compact);
    }

    #[test]
    fn test_concurrent_init_installs_once() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| try_init_with(LogConfig::default())))
            .collect();

        let configs: Vec<&'static LogConfig> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();

        assert!(configs.iter().all(|config| std::ptr::eq(*config, configs[0])));
        assert!(std::ptr::eq(configs[0], installed().unwrap()));
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::debug!("after init");
        if let Some(config) = installed() {
            assert!(try_init_with(config.clone()).is_ok());
        }
    }
}
