//! Logging setup for the simulator

use std::str::FromStr;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// JSON lines on stdout instead of human-readable output
    pub json: bool,
    /// Annotate records with source file and line
    pub file_info: bool,
    pub app_name: String,
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        Self {
            level,
            json: false,
            file_info: false,
            app_name: app_name.into(),
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// `RUST_LOG` directives first, then the configured level as a floor.
    fn filter(&self) -> EnvFilter {
        EnvFilter::from_default_env().add_directive(self.level.into())
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.file_info)
                    .with_line_number(config.file_info),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(config.file_info)
                    .with_line_number(config.file_info),
            )
            .try_init()
    };
    installed.map_err(|e| anyhow!("tracing subscriber already installed: {}", e))?;

    tracing::info!(app = %config.app_name, version = env!("CARGO_PKG_VERSION"), json = config.json, "Logging ready");
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| anyhow!("unknown log level '{}', expected trace|debug|info|warn|error", level))
}
