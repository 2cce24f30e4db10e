use std::{borrow::Cow, path::PathBuf};

use config::ConfigError as ConfigLoaderError;
use rmcp::model::{ErrorCode, ErrorData};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::server::lifecycle::ServerState;

/// Exit code for configuration failures (sysexits `EX_CONFIG`).
pub const EXIT_CONFIGURATION: u8 = 78;
/// Exit code for resource initialization failures (sysexits `EX_UNAVAILABLE`).
pub const EXIT_INITIALIZATION: u8 = 69;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to build (read) the configuration file.
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: ConfigLoaderError,
    },
    /// Failed to deserialize TOML into a struct.
    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ConfigLoaderError,
    },
    /// Explicitly requested configuration file does not exist.
    #[error("Configuration file {path} does not exist")]
    NotFound { path: PathBuf },
    /// Field failed validation.
    #[error("Configuration file {path} has invalid `{field}`: {message}")]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        message: String,
    },
    /// Required environment variable is absent or blank.
    #[error("Required environment variable `{key}` is not set ({description})")]
    MissingEnv {
        key: &'static str,
        description: &'static str,
    },
    /// Environment variable is present but malformed.
    #[error("Environment variable `{key}` is malformed: {message}")]
    InvalidEnv { key: &'static str, message: String },
}

impl ConfigError {
    /// Helper to wrap `config::ConfigError` as a read failure.
    pub fn from_read_error(path: PathBuf, source: ConfigLoaderError) -> Self {
        Self::FileRead { path, source }
    }

    /// Helper to wrap `config::ConfigError` as a parse failure.
    pub fn from_parse_error(path: PathBuf, source: ConfigLoaderError) -> Self {
        Self::Parse { path, source }
    }
}

/// A shared resource could not be constructed during startup.
#[derive(Debug, Error)]
#[error("Failed to initialize resource `{resource}`: {source:#}")]
pub struct InitializationError {
    pub resource: &'static str,
    #[source]
    pub source: anyhow::Error,
}

/// Failures returned by `ToolServer::start`.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error("Server cannot start from state `{state}`")]
    AlreadyStarted { state: ServerState },
    #[error("Startup was aborted by a shutdown request")]
    Aborted,
}

impl StartupError {
    /// Process exit code distinguishing configuration from initialization failures.
    pub fn exit_code_value(&self) -> u8 {
        match self {
            StartupError::Configuration(_) => EXIT_CONFIGURATION,
            StartupError::Initialization(_) => EXIT_INITIALIZATION,
            StartupError::AlreadyStarted { .. } | StartupError::Aborted => 1,
        }
    }

    /// Structured error payload printed on stderr before the process exits.
    pub fn to_error_data(&self) -> ErrorData {
        let (descriptor, details) = match self {
            StartupError::Configuration(err) => (
                &CONFIGURATION_ERROR,
                match err {
                    ConfigError::MissingEnv { key, .. } | ConfigError::InvalidEnv { key, .. } => {
                        json!({ "key": key })
                    }
                    ConfigError::InvalidField { field, .. } => json!({ "field": field }),
                    _ => Value::Null,
                },
            ),
            StartupError::Initialization(err) => (
                &INITIALIZATION_ERROR,
                json!({ "resource": err.resource }),
            ),
            StartupError::AlreadyStarted { state } => {
                (&NOT_READY_ERROR, json!({ "state": state.as_str() }))
            }
            StartupError::Aborted => (&NOT_READY_ERROR, Value::Null),
        };
        descriptor
            .builder(self.to_string())
            .retryable(false)
            .details(details)
            .with_exit_code_value(self.exit_code_value())
            .build()
            .unwrap_or_else(|err| ErrorData::internal_error(err.to_string(), None))
    }
}

/// Failures reported to callers of `ToolServer::invoke`. None of them stop the server.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool `{name}`")]
    UnknownTool { name: String },
    #[error("Invalid argument `{parameter}` for tool `{tool}`: {reason}")]
    InvalidArgument {
        tool: String,
        parameter: String,
        reason: String,
    },
    #[error("Tool `{tool}` failed: {source:#}")]
    Execution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Server is not ready to accept invocations (state: {state})")]
    NotReady { state: ServerState },
}

impl ToolError {
    /// Stable error kind exposed to callers.
    pub fn kind(&self) -> &'static str {
        self.descriptor().code
    }

    fn descriptor(&self) -> &'static ToolErrorDescriptor {
        match self {
            ToolError::UnknownTool { .. } => &UNKNOWN_TOOL_ERROR,
            ToolError::InvalidArgument { .. } => &INVALID_ARGUMENT_ERROR,
            ToolError::Execution { .. } => &TOOL_EXECUTION_ERROR,
            ToolError::NotReady { .. } => &NOT_READY_ERROR,
        }
    }

    /// Convert into MCP error data at the dispatch boundary.
    pub fn to_error_data(&self) -> ErrorData {
        let (retryable, details) = match self {
            ToolError::UnknownTool { name } => (false, json!({ "tool": name })),
            ToolError::InvalidArgument {
                tool,
                parameter,
                reason,
            } => (
                false,
                json!({ "tool": tool, "parameter": parameter, "reason": reason }),
            ),
            ToolError::Execution { tool, .. } => (true, json!({ "tool": tool })),
            ToolError::NotReady { state } => (true, json!({ "state": state.as_str() })),
        };
        self.descriptor()
            .builder(self.to_string())
            .retryable(retryable)
            .details(details)
            .build()
            .unwrap_or_else(|err| ErrorData::internal_error(err.to_string(), None))
    }
}

/// JSON-RPC error class used for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    InvalidParams,
    Internal,
}

impl ErrorClass {
    fn code(self) -> ErrorCode {
        match self {
            ErrorClass::InvalidParams => ErrorCode::INVALID_PARAMS,
            ErrorClass::Internal => ErrorCode::INTERNAL_ERROR,
        }
    }
}

/// Structured error metadata returned by MCP tools.
#[derive(Debug, Clone, Serialize)]
pub struct ToolErrorDescriptor {
    /// Stable error code.
    pub code: &'static str,
    /// JSON-RPC error class.
    pub class: ErrorClass,
    /// Recommended remediation.
    pub remediation: &'static str,
}

impl ToolErrorDescriptor {
    pub const fn new(code: &'static str, class: ErrorClass, remediation: &'static str) -> Self {
        Self {
            code,
            class,
            remediation,
        }
    }

    /// Create a builder carrying the user-facing message.
    pub fn builder(&self, message: impl Into<String>) -> ToolErrorDescriptorBuilder<'_> {
        ToolErrorDescriptorBuilder::new(self, message)
    }
}

/// Builder for error data that fails if required fields are missing.
pub struct ToolErrorDescriptorBuilder<'a> {
    descriptor: &'a ToolErrorDescriptor,
    message: String,
    retryable: Option<bool>,
    details: Option<Value>,
    extra_fields: Map<String, Value>,
}

impl<'a> ToolErrorDescriptorBuilder<'a> {
    pub fn new(descriptor: &'a ToolErrorDescriptor, message: impl Into<String>) -> Self {
        Self {
            descriptor,
            message: message.into(),
            retryable: None,
            details: None,
            extra_fields: Map::new(),
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        if !details.is_null() {
            self.details = Some(details);
        }
        self
    }

    pub fn with_context_field(mut self, key: &str, value: Value) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }

    pub fn with_exit_code_value(mut self, exit_code: u8) -> Self {
        self.extra_fields
            .insert("exit_code".into(), Value::from(exit_code));
        self
    }

    pub fn build(self) -> Result<ErrorData, ToolErrorBuilderError> {
        if self.descriptor.remediation.trim().is_empty() {
            return Err(ToolErrorBuilderError::MissingRemediation {
                code: self.descriptor.code,
            });
        }
        if self.message.trim().is_empty() {
            return Err(ToolErrorBuilderError::MissingMessage {
                code: self.descriptor.code,
            });
        }
        let retryable = self
            .retryable
            .ok_or(ToolErrorBuilderError::MissingRetryable {
                code: self.descriptor.code,
            })?;

        let mut data = Map::new();
        data.insert("code".into(), Value::String(self.descriptor.code.into()));
        data.insert(
            "remediation".into(),
            Value::String(self.descriptor.remediation.into()),
        );
        data.insert("retryable".into(), Value::Bool(retryable));
        if let Some(details) = self.details {
            data.insert("details".into(), details);
        }
        for (key, value) in self.extra_fields {
            data.insert(key, value);
        }

        Ok(ErrorData::new(
            self.descriptor.class.code(),
            Cow::Owned(self.message),
            Some(Value::Object(data)),
        ))
    }
}

/// Errors when required builder fields are missing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolErrorBuilderError {
    #[error("retryable is missing (code={code})")]
    MissingRetryable { code: &'static str },
    #[error("remediation is empty (code={code})")]
    MissingRemediation { code: &'static str },
    #[error("message is empty (code={code})")]
    MissingMessage { code: &'static str },
}

pub const UNKNOWN_TOOL_ERROR: ToolErrorDescriptor = ToolErrorDescriptor::new(
    "UNKNOWN_TOOL",
    ErrorClass::InvalidParams,
    "Call tools/list and use one of the advertised tool names.",
);

pub const INVALID_ARGUMENT_ERROR: ToolErrorDescriptor = ToolErrorDescriptor::new(
    "INVALID_ARGUMENT",
    ErrorClass::InvalidParams,
    "Check the arguments against the tool's input schema before retrying.",
);

pub const TOOL_EXECUTION_ERROR: ToolErrorDescriptor = ToolErrorDescriptor::new(
    "TOOL_EXECUTION_FAILED",
    ErrorClass::Internal,
    "Inspect the message and server logs; the server remains available for further calls.",
);

pub const NOT_READY_ERROR: ToolErrorDescriptor = ToolErrorDescriptor::new(
    "NOT_READY",
    ErrorClass::Internal,
    "Wait for the server to finish starting, or restart it if it is shutting down.",
);

pub const CONFIGURATION_ERROR: ToolErrorDescriptor = ToolErrorDescriptor::new(
    "CONFIGURATION_ERROR",
    ErrorClass::InvalidParams,
    "Set the missing environment variable or fix the configuration file, then restart.",
);

pub const INITIALIZATION_ERROR: ToolErrorDescriptor = ToolErrorDescriptor::new(
    "INITIALIZATION_ERROR",
    ErrorClass::Internal,
    "Check network access and credentials for the named resource, then restart.",
);
