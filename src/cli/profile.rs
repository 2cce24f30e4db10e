//! LaunchProfile and config path resolution.
use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::server::config::{CONFIG_ENV_KEY, DEFAULT_CONFIG_PATH};

/// MCP transport mode.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Tcp,
}

impl TransportMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Stdio => "stdio",
            TransportMode::Tcp => "tcp",
        }
    }
}

/// Where the config path came from. Only the implicit default may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    Default,
}

impl ConfigSource {
    pub const fn is_explicit(&self) -> bool {
        !matches!(self, ConfigSource::Default)
    }
}

/// Resolved launch profile.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub config_path: PathBuf,
    pub config_source: ConfigSource,
    pub transport: TransportMode,
    pub launch_args: Vec<String>,
}

/// Resolve config path in the order: CLI override → env var → default.
pub fn resolve_config_path(override_path: Option<PathBuf>) -> Result<(PathBuf, ConfigSource)> {
    let (path, source) = match override_path {
        Some(path) => (path, ConfigSource::Cli),
        None => match env::var_os(CONFIG_ENV_KEY).filter(|value| !value.is_empty()) {
            Some(value) => (PathBuf::from(value), ConfigSource::Env),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), ConfigSource::Default),
        },
    };

    if path.is_absolute() {
        return Ok((path, source));
    }

    let cwd = env::current_dir().context("failed to obtain current directory")?;
    Ok((cwd.join(path), source))
}

/// Build launch arguments suitable for reproduction/logging.
pub fn build_launch_args(transport: TransportMode, config: &Path) -> Vec<String> {
    vec![
        format!("--transport={}", transport.as_str()),
        format!("--config={}", config.display()),
    ]
}
