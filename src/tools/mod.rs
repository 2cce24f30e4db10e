//! Tools exposed by the server and the registry that declares them.

pub mod builtin;
pub mod registry;
pub mod sheets;

pub use registry::{
    Arguments, ParamSpec, RegistryError, ToolDescriptor, ToolEntry, ToolHandler, ToolRegistry,
    ToolRegistryBuilder, ValueType,
};

use crate::server::config::SheetsSection;

/// Build the registry served by the binary.
pub fn build_registry(sheets: &SheetsSection) -> Result<ToolRegistry, RegistryError> {
    ToolRegistry::builder()
        .register(builtin::ping_descriptor(), builtin::Ping)
        .register(sheets::list_sheets_descriptor(), sheets::ListSheets)
        .register(sheets::find_sheet_descriptor(), sheets::FindSheet)
        .register(
            sheets::get_sheet_data_descriptor(&sheets.default_range),
            sheets::GetSheetData,
        )
        .build()
}
