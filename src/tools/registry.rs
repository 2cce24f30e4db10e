//! Declared tool schemas, argument validation, and the handler seam.
use std::{collections::BTreeMap, fmt, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{lib::errors::ToolError, server::lifecycle::SharedContext};

/// Closed set of value shapes a parameter or return value may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(number) if number.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub value_type: ValueType,
    pub description: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, value_type: ValueType, description: &'static str) -> Self {
        Self {
            name,
            value_type,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, value_type: ValueType, description: &'static str) -> Self {
        Self {
            name,
            value_type,
            description,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }
}

/// Name, parameters and return shape of a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub returns: ValueType,
}

impl ToolDescriptor {
    pub fn new(name: &'static str, description: &'static str, returns: ValueType) -> Self {
        Self {
            name,
            description,
            params: Vec::new(),
            returns,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// JSON Schema for the tool input, as advertised over MCP.
    pub fn input_schema(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut property = Map::new();
            property.insert("type".into(), json!(param.value_type.as_str()));
            property.insert("description".into(), json!(param.description));
            if let Some(default) = &param.default {
                property.insert("default".into(), default.clone());
            }
            properties.insert(param.name.to_string(), Value::Object(property));
            if param.required {
                required.push(json!(param.name));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), Value::Array(required));
        }
        schema.insert("additionalProperties".into(), Value::Bool(false));
        schema
    }

    /// Check `arguments` against the declared parameters and fill in defaults.
    pub fn validate(&self, arguments: Map<String, Value>) -> Result<Arguments, ToolError> {
        let invalid = |parameter: &str, reason: String| ToolError::InvalidArgument {
            tool: self.name.to_string(),
            parameter: parameter.to_string(),
            reason,
        };

        if let Some(unexpected) = arguments
            .keys()
            .find(|key| !self.params.iter().any(|param| param.name == key.as_str()))
        {
            let reason = if self.params.is_empty() {
                "this tool takes no parameters".to_string()
            } else {
                "unexpected parameter".to_string()
            };
            return Err(invalid(unexpected, reason));
        }

        let mut values = arguments;
        values.retain(|_, value| !value.is_null());

        for param in &self.params {
            match values.get(param.name) {
                Some(value) if !param.value_type.matches(value) => {
                    return Err(invalid(
                        param.name,
                        format!(
                            "expected {}, got {}",
                            param.value_type,
                            ValueType::describe(value)
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    if let Some(default) = &param.default {
                        values.insert(param.name.to_string(), default.clone());
                    } else if param.required {
                        return Err(invalid(param.name, "missing required parameter".into()));
                    }
                }
            }
        }

        Ok(Arguments { values })
    }

    fn check_defaults(&self) -> Result<(), RegistryError> {
        for param in &self.params {
            if let Some(default) = &param.default {
                if !param.value_type.matches(default) {
                    return Err(RegistryError::InvalidDefault {
                        tool: self.name,
                        parameter: param.name,
                        expected: param.value_type,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Validated arguments passed to a tool body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Map<String, Value>,
}

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn require_str(&self, name: &str) -> anyhow::Result<&str> {
        self.str(name)
            .ok_or_else(|| anyhow!("argument `{name}` is missing"))
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Body of a tool. Reads shared resources through `SharedContext` only.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, context: &SharedContext, arguments: Arguments) -> anyhow::Result<Value>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool `{name}` is registered twice")]
    DuplicateTool { name: &'static str },
    #[error("Default for `{tool}.{parameter}` does not match declared type {expected}")]
    InvalidDefault {
        tool: &'static str,
        parameter: &'static str,
        expected: ValueType,
    },
    #[error("Tool name `{name}` must be 1-64 characters of [a-z0-9_]")]
    InvalidName { name: &'static str },
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

/// Closed set of tools known to a server.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolEntry>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    /// Descriptors sorted by tool name.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|entry| &entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    entries: Vec<ToolEntry>,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, descriptor: ToolDescriptor, handler: impl ToolHandler + 'static) -> Self {
        self.entries.push(ToolEntry {
            descriptor,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut tools = BTreeMap::new();
        for entry in self.entries {
            let name = entry.descriptor.name;
            if !is_valid_tool_name(name) {
                return Err(RegistryError::InvalidName { name });
            }
            entry.descriptor.check_defaults()?;
            if tools.insert(name, entry).is_some() {
                return Err(RegistryError::DuplicateTool { name });
            }
        }
        Ok(ToolRegistry { tools })
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
