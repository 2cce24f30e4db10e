//! Server configuration, lifecycle, and MCP runtime wiring.
pub mod config;
pub mod lifecycle;
pub mod runtime;
