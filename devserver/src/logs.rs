//! Logging configuration

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::DevServerError;
use crate::telemetry::METRICS_TARGET;

/// Log level configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = DevServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(DevServerError::Config(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level
    pub log_level: LogLevel,

    /// Enable JSON format
    pub json_format: bool,

    /// Keep metric events (target `devserver::metrics`) in the log stream
    pub metrics: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_format: false,
            metrics: true,
        }
    }
}

impl LogOptions {
    fn filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.to_string()));
        if self.metrics {
            base
        } else {
            match format!("{}=off", METRICS_TARGET).parse() {
                Ok(directive) => base.add_directive(directive),
                Err(_) => base,
            }
        }
    }
}

/// Initialize logging for an embedding process.
///
/// The library itself only emits `tracing` events; installing a subscriber is
/// left to whoever owns `main`.
pub fn init_logging(options: LogOptions) -> Result<(), DevServerError> {
    let subscriber = tracing_subscriber::registry().with(options.filter());

    let result = if options.json_format {
        subscriber.with(fmt_layer::layer().json()).try_init()
    } else {
        subscriber.with(fmt_layer::layer()).try_init()
    };
    result.map_err(|e| DevServerError::Config(e.to_string()))
}
