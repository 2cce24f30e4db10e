//! Load and validate server configuration.
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

use crate::lib::errors::ConfigError;

pub mod environment;
pub mod lifecycle;
pub mod server;
pub mod sheets;
pub mod telemetry;

pub use environment::{EnvKey, EnvironmentConfig, KeyFormat};
pub use lifecycle::{
    parse_lifecycle_section, LifecycleSection, RawLifecycleSection,
    DEFAULT_INVOCATION_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_INVOCATIONS,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use server::{parse_server_section, RawServerSection, ServerSection, DEFAULT_HOST, DEFAULT_PORT};
pub use sheets::{parse_sheets_section, RawSheetsSection, SheetsSection, DEFAULT_SHEET_RANGE};

pub(crate) const CONFIG_ENV_KEY: &str = "MCP_CONFIG_PATH";
pub(crate) const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level configuration container.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub lifecycle: LifecycleSection,
    pub sheets: SheetsSection,
    /// File the configuration came from; `None` when built-in defaults are used.
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    server: Option<RawServerSection>,
    lifecycle: Option<RawLifecycleSection>,
    sheets: Option<RawSheetsSection>,
}

impl ServerConfig {
    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_optional(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            telemetry::log_defaults(&path);
            let config = Self::default();
            telemetry::log_loaded(&config);
            return Ok(config);
        }
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        info!(
            target: "sheets_mcp::config",
            path = %path.display(),
            "Starting configuration load"
        );

        if !path.exists() {
            let error = ConfigError::NotFound { path: path.clone() };
            error!(
                target: "sheets_mcp::config",
                path = %path.display(),
                reason = %error,
                "Configuration file is missing"
            );
            return Err(error);
        }

        let builder = config::Config::builder().add_source(config::File::from(path.clone()));
        let document = builder.build().map_err(|err| {
            let error = ConfigError::from_read_error(path.clone(), err);
            error!(
                target: "sheets_mcp::config",
                path = %path.display(),
                reason = %error,
                "Failed to read configuration file"
            );
            error
        })?;

        let raw: RawServerConfig = document.try_deserialize().map_err(|err| {
            let error = ConfigError::from_parse_error(path.clone(), err);
            error!(
                target: "sheets_mcp::config",
                path = %path.display(),
                reason = %error,
                "Failed to parse configuration file"
            );
            error
        })?;

        let config = Self::from_raw(raw, path.clone()).map_err(|err| {
            error!(
                target: "sheets_mcp::config",
                path = %path.display(),
                reason = %err,
                "Failed to validate configuration file"
            );
            err
        })?;

        telemetry::log_loaded(&config);
        Ok(config)
    }

    /// Human-readable origin of the configuration.
    pub fn source_label(&self) -> String {
        self.source_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<defaults>".to_string())
    }

    fn from_raw(raw: RawServerConfig, path: PathBuf) -> Result<Self, ConfigError> {
        let server = parse_server_section(raw.server, &path)?;
        let lifecycle = parse_lifecycle_section(raw.lifecycle, &path)?;
        let sheets = parse_sheets_section(raw.sheets, &path)?;

        Ok(Self {
            server,
            lifecycle,
            sheets,
            source_path: Some(path),
        })
    }
}
