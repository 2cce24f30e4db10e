//! MCP server startup and the adapter from MCP requests to the tool server.
mod handler;
mod server_info;
mod startup;

pub use handler::SheetsMcpServer;
pub use server_info::build_instructions;
pub use startup::{build_tool_server, run_server, RuntimeExit};
