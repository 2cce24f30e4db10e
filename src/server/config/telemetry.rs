use tracing::{debug, info};

use super::{ServerConfig, CONFIG_ENV_KEY, DEFAULT_CONFIG_PATH};

pub fn log_env_source(path: &std::path::Path, explicit: bool) {
    if explicit {
        info!(
            target: "sheets_mcp::config",
            path = %path.display(),
            "Loading configuration named by MCP_CONFIG_PATH or --config"
        );
    } else {
        debug!(
            target: "sheets_mcp::config",
            path = %path.display(),
            env = CONFIG_ENV_KEY,
            default = DEFAULT_CONFIG_PATH,
            "MCP_CONFIG_PATH not set; using default config.toml"
        );
    }
}

pub fn log_defaults(path: &std::path::Path) {
    debug!(
        target: "sheets_mcp::config",
        path = %path.display(),
        "Optional configuration file not found; using built-in defaults"
    );
}

pub fn log_loaded(config: &ServerConfig) {
    info!(
        target: "sheets_mcp::config",
        path = %config.source_label(),
        host = %config.server.host,
        port = config.server.port,
        shutdown_timeout_secs = config.lifecycle.shutdown_timeout_secs,
        invocation_timeout_secs = config.lifecycle.invocation_timeout_secs,
        max_concurrent_invocations = config.lifecycle.max_concurrent_invocations,
        default_range = %config.sheets.default_range,
        "Configuration loaded successfully"
    );
}
