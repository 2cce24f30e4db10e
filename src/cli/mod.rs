//! CLI entrypoint module structure.
use anyhow::Result;
use serde_json::json;

use crate::{
    lib::errors::ConfigError,
    server::config::{telemetry as config_telemetry, EnvironmentConfig, ServerConfig},
    tools::{build_registry, sheets},
};

pub mod args;
pub mod profile;

pub use args::{CliCommand, LaunchProfileArgs, ParsedCommand};
pub use profile::{
    build_launch_args, resolve_config_path, ConfigSource, LaunchProfile, TransportMode,
};

/// Result of a utility command: the JSON printed on stdout and whether it succeeded.
#[derive(Debug, Clone)]
pub struct CliReport {
    pub payload: String,
    pub success: bool,
}

/// Load the configuration named by the profile. An explicitly named file must
/// exist; the implicit `config.toml` is optional.
pub fn load_config(profile: &LaunchProfile) -> Result<ServerConfig, ConfigError> {
    let explicit = profile.config_source.is_explicit();
    config_telemetry::log_env_source(&profile.config_path, explicit);
    if explicit {
        ServerConfig::load_from_path(profile.config_path.clone())
    } else {
        ServerConfig::load_optional(profile.config_path.clone())
    }
}

/// Execute CLI command mode and return a user-facing result payload.
pub fn execute_cli_command(command: CliCommand, config: &ServerConfig) -> Result<CliReport> {
    match command {
        CliCommand::Tools => describe_tools(config),
        CliCommand::CheckEnv => Ok(check_environment(&EnvironmentConfig::capture(
            sheets::ENV_KEYS,
        ))?),
    }
}

fn describe_tools(config: &ServerConfig) -> Result<CliReport> {
    let registry = build_registry(&config.sheets)?;
    let descriptors = registry
        .descriptors()
        .map(|descriptor| {
            json!({
                "name": descriptor.name,
                "description": descriptor.description,
                "params": descriptor.params,
                "returns": descriptor.returns,
                "input_schema": descriptor.input_schema(),
            })
        })
        .collect::<Vec<_>>();
    Ok(CliReport {
        payload: serde_json::to_string_pretty(&json!({ "tools": descriptors }))?,
        success: true,
    })
}

/// Report presence and format of each declared key. Values are never echoed.
fn check_environment(env: &EnvironmentConfig) -> serde_json::Result<CliReport> {
    let mut success = true;
    let keys = sheets::ENV_KEYS
        .iter()
        .map(|key| {
            let present = env.get(key.name).is_some();
            let error = env.validate([key]).err().map(|err| err.to_string());
            success &= error.is_none();
            json!({
                "name": key.name,
                "required": key.required,
                "present": present,
                "description": key.description,
                "error": error,
            })
        })
        .collect::<Vec<_>>();

    let payload = json!({
        "status": if success { "ok" } else { "invalid" },
        "keys": keys,
    });
    Ok(CliReport {
        payload: serde_json::to_string_pretty(&payload)?,
        success,
    })
}
