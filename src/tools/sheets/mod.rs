//! Google Sheets resource and read-only tools.

pub mod client;
pub mod titles;
pub mod tools;

use std::sync::Arc;

use async_trait::async_trait;

pub use client::{
    a1_notation, SheetSummary, SheetsClient, SheetsClientSettings, SheetsError, Spreadsheet,
    ValueRange, API_BASE_ENV, API_KEY_ENV, DEFAULT_API_BASE, ENV_KEYS, TIMEOUT_ENV,
};
pub use tools::{
    find_sheet_descriptor, get_sheet_data_descriptor, list_sheets_descriptor, FindSheet,
    GetSheetData, ListSheets, FIND_SHEET_TOOL, GET_SHEET_DATA_TOOL, LIST_SHEETS_TOOL,
};

use crate::server::{
    config::{EnvKey, EnvironmentConfig},
    lifecycle::{Resource, ResourceProvider},
};

/// Name of the Sheets client in the shared context.
pub const SHEETS_RESOURCE: &str = "sheets";

/// Builds the shared `SheetsClient` at startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct SheetsProvider;

#[async_trait]
impl ResourceProvider for SheetsProvider {
    fn name(&self) -> &'static str {
        SHEETS_RESOURCE
    }

    fn env_keys(&self) -> &'static [EnvKey] {
        ENV_KEYS
    }

    async fn acquire(&self, env: &EnvironmentConfig) -> anyhow::Result<Arc<dyn Resource>> {
        let settings = SheetsClientSettings::from_env(env)?;
        Ok(Arc::new(SheetsClient::new(settings)?))
    }
}
