use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{lib::errors::ConfigError, server::lifecycle::LifecycleSettings};

pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_CONCURRENT_INVOCATIONS: usize = 16;

/// Lifecycle limits applied by the tool server.
#[derive(Debug, Clone)]
pub struct LifecycleSection {
    pub shutdown_timeout_secs: u64,
    pub invocation_timeout_secs: u64,
    pub max_concurrent_invocations: usize,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT_SECS,
            max_concurrent_invocations: DEFAULT_MAX_CONCURRENT_INVOCATIONS,
        }
    }
}

impl LifecycleSection {
    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            invocation_timeout: Duration::from_secs(self.invocation_timeout_secs),
            max_concurrent_invocations: self.max_concurrent_invocations,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLifecycleSection {
    pub shutdown_timeout_secs: Option<u64>,
    pub invocation_timeout_secs: Option<u64>,
    pub max_concurrent_invocations: Option<usize>,
}

pub fn parse_lifecycle_section(
    raw: Option<RawLifecycleSection>,
    path: &Path,
) -> Result<LifecycleSection, ConfigError> {
    let raw = raw.unwrap_or_default();

    let shutdown_timeout_secs = raw
        .shutdown_timeout_secs
        .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);
    if !(1..=300).contains(&shutdown_timeout_secs) {
        return Err(ConfigError::InvalidField {
            path: path.to_path_buf(),
            field: "lifecycle.shutdown_timeout_secs",
            message: "Specify a value between 1 and 300 seconds".into(),
        });
    }

    let invocation_timeout_secs = raw
        .invocation_timeout_secs
        .unwrap_or(DEFAULT_INVOCATION_TIMEOUT_SECS);
    if !(1..=600).contains(&invocation_timeout_secs) {
        return Err(ConfigError::InvalidField {
            path: path.to_path_buf(),
            field: "lifecycle.invocation_timeout_secs",
            message: "Specify a value between 1 and 600 seconds".into(),
        });
    }

    let max_concurrent_invocations = raw
        .max_concurrent_invocations
        .unwrap_or(DEFAULT_MAX_CONCURRENT_INVOCATIONS);
    if !(1..=256).contains(&max_concurrent_invocations) {
        return Err(ConfigError::InvalidField {
            path: path.to_path_buf(),
            field: "lifecycle.max_concurrent_invocations",
            message: "Specify a value between 1 and 256".into(),
        });
    }

    Ok(LifecycleSection {
        shutdown_timeout_secs,
        invocation_timeout_secs,
        max_concurrent_invocations,
    })
}
