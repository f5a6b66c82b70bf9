//! Common command-line arguments for service binaries
//!
//! Provides a unified argument structure that individual services flatten into their own

#[cfg(feature = "cli")]
use clap::Parser;
use std::path::PathBuf;

use crate::logging::LogConfig;

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", clap(author, version, about))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        clap(short = 'l', long, default_value = "info", env = "RUST_LOG")
    )]
    pub log_level: String,

    /// Configuration file (TOML or YAML)
    #[cfg_attr(feature = "cli", clap(short = 'c', long))]
    pub config: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    #[cfg_attr(feature = "cli", clap(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Logging setup derived from the flags
    pub fn log_config(&self, service_name: &str) -> LogConfig {
        LogConfig {
            service_name: service_name.to_string(),
            level: self.parse_log_level(),
            ansi: !self.no_color,
        }
    }
}
