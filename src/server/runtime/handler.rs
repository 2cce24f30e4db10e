use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorData, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    RoleServer,
};
use serde_json::Value;

use crate::{server::lifecycle::ToolServer, tools::ToolDescriptor};

/// Exposes a `ToolServer` over MCP. Cloned once per connection; every clone
/// shares the same lifecycle.
#[derive(Clone)]
pub struct SheetsMcpServer {
    server: Arc<ToolServer>,
    instructions: Arc<String>,
}

impl SheetsMcpServer {
    pub fn new(server: Arc<ToolServer>, instructions: String) -> Self {
        Self {
            server,
            instructions: Arc::new(instructions),
        }
    }

    /// MCP tool listing derived from the registry.
    pub fn tools(&self) -> Vec<Tool> {
        self.server.registry().descriptors().map(to_mcp_tool).collect()
    }
}

fn to_mcp_tool(descriptor: &ToolDescriptor) -> Tool {
    Tool::new(
        descriptor.name,
        descriptor.description,
        Arc::new(descriptor.input_schema()),
    )
}

fn to_call_result(value: Value) -> CallToolResult {
    match value {
        Value::String(text) => CallToolResult::success(vec![Content::text(text)]),
        value @ Value::Object(_) => CallToolResult::structured(value),
        other => CallToolResult::success(vec![Content::text(other.to_string())]),
    }
}

impl ServerHandler for SheetsMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some((*self.instructions).clone()),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = request.arguments.unwrap_or_default();
        self.server
            .invoke_with_cancel(&request.name, arguments, context.ct.clone())
            .await
            .map(to_call_result)
            .map_err(|err| err.to_error_data())
    }
}
