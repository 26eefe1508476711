//! Runtime configuration for the proxy.
//!
//! The proxy reads no configuration files: everything here comes from the
//! command line. Standard output carries the protocol, so logging goes to
//! standard error unless a log file is configured.

use std::path::PathBuf;

use thiserror::Error;

use crate::dispatcher::DEFAULT_ACTIVITY_CAPACITY;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("activity_capacity must be between 1 and 65536, got {0}")]
    InvalidActivityCapacity(usize),

    #[error("log_file must name a file, got {}", .0.display())]
    InvalidLogFile(PathBuf),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Diagnostic output settings.
    pub logging: LoggingConfig,

    /// Session plumbing settings.
    pub session: SessionConfig,
}

/// Diagnostic output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Append logs to this file instead of standard error.
    pub file: Option<PathBuf>,
}

/// Session plumbing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Replies that may queue between the session readers and the dispatcher.
    pub activity_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl Config {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        if let Some(file) = &self.logging.file {
            if file.file_name().is_none() {
                return Err(ConfigError::InvalidLogFile(file.clone()));
            }
        }

        if self.session.activity_capacity < 1 || self.session.activity_capacity > 65536 {
            return Err(ConfigError::InvalidActivityCapacity(
                self.session.activity_capacity,
            ));
        }

        Ok(())
    }

    /// The log level in the form `EnvFilter` expects.
    pub fn filter_directive(&self) -> String {
        self.logging.level.to_lowercase()
    }
}
