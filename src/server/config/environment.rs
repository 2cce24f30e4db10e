//! Process environment snapshot taken once at startup.
use std::{collections::BTreeMap, env};

use url::Url;

use crate::lib::errors::ConfigError;

/// Shape an environment value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    NonEmpty,
    Url,
    PositiveInteger,
}

/// An environment variable declared by a resource provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvKey {
    pub name: &'static str,
    pub required: bool,
    pub format: KeyFormat,
    pub description: &'static str,
}

impl EnvKey {
    pub const fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            required: true,
            format: KeyFormat::NonEmpty,
            description,
        }
    }

    pub const fn optional(name: &'static str, format: KeyFormat, description: &'static str) -> Self {
        Self {
            name,
            required: false,
            format,
            description,
        }
    }

    fn check_format(&self, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidEnv {
            key: self.name,
            message,
        };
        match self.format {
            KeyFormat::NonEmpty => Ok(()),
            KeyFormat::Url => {
                let url = Url::parse(value).map_err(|err| invalid(format!("not a URL: {err}")))?;
                match url.scheme() {
                    "http" | "https" => Ok(()),
                    other => Err(invalid(format!("unsupported URL scheme `{other}`"))),
                }
            }
            KeyFormat::PositiveInteger => match value.parse::<u64>() {
                Ok(parsed) if parsed > 0 => Ok(()),
                _ => Err(invalid(format!("expected a positive integer, got `{value}`"))),
            },
        }
    }
}

/// Immutable mapping from declared environment keys to their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentConfig {
    values: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    /// Read the declared keys from the process environment. Blank values count as absent.
    pub fn capture<'a>(keys: impl IntoIterator<Item = &'a EnvKey>) -> Self {
        let values = keys
            .into_iter()
            .filter_map(|key| {
                env::var(key.name)
                    .ok()
                    .map(|value| (key.name.to_string(), value))
            })
            .collect::<Vec<_>>();
        Self::from_pairs(values)
    }

    /// Build a snapshot from explicit pairs (used by tests and embedders).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into().trim().to_string()))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &EnvKey) -> Result<&str, ConfigError> {
        self.get(key.name).ok_or(ConfigError::MissingEnv {
            key: key.name,
            description: key.description,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check presence and format of every declared key, reporting the first failure.
    pub fn validate<'a>(&self, keys: impl IntoIterator<Item = &'a EnvKey>) -> Result<(), ConfigError> {
        for key in keys {
            match self.get(key.name) {
                Some(value) => key.check_format(value)?,
                None if key.required => {
                    return Err(ConfigError::MissingEnv {
                        key: key.name,
                        description: key.description,
                    })
                }
                None => {}
            }
        }
        Ok(())
    }
}
