//! CLI runner for common setup.
//!
//! Loads the config file and keeps logging alive for the duration of a
//! command.

use tracing::info;
use vtlayer::config::ConfigFile;
use vtlayer::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Keeps the log file writer alive while the runner exists.
    _logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load the config file (defaults if absent) and initialize logging.
    ///
    /// # Arguments
    ///
    /// * `verbose` - Log at debug level unless `RUST_LOG` says otherwise
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let logging_guard =
            init_logging(&default_log_dir(), default_log_file(), verbose || config.debug)
                .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("vtlayer v{}", vtlayer::VERSION);
        info!("vtlayer CLI: {} command", command);
    }
}
