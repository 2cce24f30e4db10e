use crate::{cli::LaunchProfile, server::config::ServerConfig, tools::ToolRegistry};

/// Build the `ServerInfo.instructions` string shown to MCP clients.
pub fn build_instructions(
    profile: &LaunchProfile,
    config: &ServerConfig,
    registry: &ToolRegistry,
) -> String {
    let tools = registry
        .descriptors()
        .map(|descriptor| descriptor.name)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Read-only Google Sheets tools ({tools}). Loaded config {path}; waiting in {transport} mode (host={host}, port={port}). get_sheet_data reads {range} when no range is given.",
        path = config.source_label(),
        transport = profile.transport.as_str(),
        host = config.server.host,
        port = config.server.port,
        range = config.sheets.default_range,
    )
}
