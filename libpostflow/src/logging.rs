//! Logging setup shared by the Postflow binaries
//!
//! Output goes to stderr in one of three formats:
//! - `text`: plain lines for terminals and pipes
//! - `json`: one JSON object per line for log collectors
//! - `pretty`: multi-line colored output for development
//!
//! Format and level come from `POSTFLOW_LOG_FORMAT` and `POSTFLOW_LOG_LEVEL`;
//! `RUST_LOG` takes precedence over both level settings when set.
//!
//! ```no_run
//! use libpostflow::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::from_env(false).init();
//!
//! // or explicitly
//! # fn other() {
//! LoggingConfig::new(LogFormat::Json, "debug".to_string(), false).init();
//! # }
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// HTTP and SQL internals are noisy at debug level
const QUIET_DEPENDENCIES: &[&str] = &["sqlx=warn", "hyper=warn", "hyper_util=warn", "reqwest=info"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Forces `debug` unless `RUST_LOG` is set
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Read format and level from the environment, defaulting to text at info
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("POSTFLOW_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);

        let level = std::env::var("POSTFLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, verbose)
    }

    /// Filter directives applied when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        let mut directives = vec![level.to_string()];
        directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
        directives.join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    /// Install the global subscriber
    ///
    /// Call once at startup. A second call leaves the first subscriber in
    /// place and reports the conflict on stderr.
    pub fn init(&self) {
        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(self.filter())
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(self.filter())
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(self.filter())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .try_init(),
        };

        if let Err(e) = result {
            eprintln!("logging already initialized: {}", e);
        }
    }
}

/// Initialize logging from the environment
pub fn init_default() {
    LoggingConfig::from_env(false).init();
}
