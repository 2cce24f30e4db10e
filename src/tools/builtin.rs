use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    server::lifecycle::SharedContext,
    tools::{Arguments, ToolDescriptor, ToolHandler, ValueType},
};

pub const PING_TOOL: &str = "ping";

pub fn ping_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        PING_TOOL,
        "Liveness check; returns \"pong\"",
        ValueType::String,
    )
}

pub struct Ping;

#[async_trait]
impl ToolHandler for Ping {
    async fn call(&self, _context: &SharedContext, _arguments: Arguments) -> anyhow::Result<Value> {
        Ok(json!("pong"))
    }
}
