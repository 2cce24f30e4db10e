use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    client::{SheetsClient, SheetsError},
    titles::{title_contains, titles_match},
    SHEETS_RESOURCE,
};
use crate::{
    server::lifecycle::SharedContext,
    tools::{Arguments, ParamSpec, ToolDescriptor, ToolHandler, ValueType},
};

pub const LIST_SHEETS_TOOL: &str = "list_sheets";
pub const FIND_SHEET_TOOL: &str = "find_sheet";
pub const GET_SHEET_DATA_TOOL: &str = "get_sheet_data";

fn spreadsheet_id_param() -> ParamSpec {
    ParamSpec::required(
        "spreadsheet_id",
        ValueType::String,
        "Spreadsheet ID from the sheet URL (docs.google.com/spreadsheets/d/<ID>/...)",
    )
}

fn spreadsheet_id(arguments: &Arguments) -> anyhow::Result<&str> {
    let id = arguments.require_str("spreadsheet_id")?.trim();
    if id.is_empty() {
        bail!("spreadsheet_id must not be empty");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("spreadsheet_id may only contain letters, digits, `-` and `_`");
    }
    Ok(id)
}

pub fn list_sheets_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        LIST_SHEETS_TOOL,
        "List the sheets (tabs) of a spreadsheet with their sizes",
        ValueType::Object,
    )
    .param(spreadsheet_id_param())
}

pub fn find_sheet_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        FIND_SHEET_TOOL,
        "Find sheets whose title contains a fragment, ignoring case and Cyrillic look-alike letters",
        ValueType::Object,
    )
    .param(spreadsheet_id_param())
    .param(ParamSpec::required(
        "title_contains",
        ValueType::String,
        "Fragment of the sheet title to look for",
    ))
}

pub fn get_sheet_data_descriptor(default_range: &str) -> ToolDescriptor {
    ToolDescriptor::new(
        GET_SHEET_DATA_TOOL,
        "Read cell values from a sheet range, row by row",
        ValueType::Object,
    )
    .param(spreadsheet_id_param())
    .param(ParamSpec::required(
        "sheet_name",
        ValueType::String,
        "Title of the sheet (tab) to read",
    ))
    .param(
        ParamSpec::optional("range", ValueType::String, "A1 range without the sheet prefix")
            .with_default(json!(default_range)),
    )
}

pub struct ListSheets;

#[async_trait]
impl ToolHandler for ListSheets {
    async fn call(&self, context: &SharedContext, arguments: Arguments) -> anyhow::Result<Value> {
        let client = context.require::<SheetsClient>(SHEETS_RESOURCE)?;
        let spreadsheet = client.spreadsheet(spreadsheet_id(&arguments)?).await?;
        Ok(serde_json::to_value(spreadsheet)?)
    }
}

pub struct FindSheet;

#[async_trait]
impl ToolHandler for FindSheet {
    async fn call(&self, context: &SharedContext, arguments: Arguments) -> anyhow::Result<Value> {
        let client = context.require::<SheetsClient>(SHEETS_RESOURCE)?;
        let id = spreadsheet_id(&arguments)?;
        let query = arguments.require_str("title_contains")?;
        if query.trim().is_empty() {
            bail!("title_contains must not be empty");
        }

        let spreadsheet = client.spreadsheet(id).await?;
        let matches: Vec<&str> = spreadsheet
            .sheets
            .iter()
            .filter(|sheet| title_contains(&sheet.title, query))
            .map(|sheet| sheet.title.as_str())
            .collect();

        Ok(json!({
            "spreadsheet_id": id,
            "query": query,
            "matches": matches,
        }))
    }
}

pub struct GetSheetData;

#[async_trait]
impl ToolHandler for GetSheetData {
    async fn call(&self, context: &SharedContext, arguments: Arguments) -> anyhow::Result<Value> {
        let client = context.require::<SheetsClient>(SHEETS_RESOURCE)?;
        let id = spreadsheet_id(&arguments)?;
        let sheet = arguments.require_str("sheet_name")?;
        let range = arguments.require_str("range")?.trim();
        if sheet.trim().is_empty() {
            bail!("sheet_name must not be empty");
        }
        if range.is_empty() || range.contains('!') {
            bail!("range must be a non-empty A1 range without a sheet prefix");
        }

        let (title, values) = match client.values(id, sheet, range).await {
            Ok(values) => (sheet.to_string(), values),
            // The API answers 400 when the range names a sheet that does not exist.
            Err(err @ SheetsError::Api { status: 400, .. }) => {
                let spreadsheet = client.spreadsheet(id).await?;
                let resolved = spreadsheet
                    .sheets
                    .iter()
                    .find(|candidate| titles_match(&candidate.title, sheet))
                    .ok_or_else(|| {
                        let available: Vec<&str> =
                            spreadsheet.sheets.iter().map(|s| s.title.as_str()).collect();
                        anyhow!("sheet `{sheet}` not found; available sheets: {available:?}")
                    })?;
                // The title was already exact, so the range itself was rejected.
                if resolved.title == sheet {
                    return Err(err.into());
                }
                info!(
                    target: "sheets_mcp::sheets",
                    requested = sheet,
                    resolved = %resolved.title,
                    "Resolved sheet title by loose match"
                );
                let values = client.values(id, &resolved.title, range).await?;
                (resolved.title.clone(), values)
            }
            Err(err) => return Err(err.into()),
        };

        Ok(json!({
            "spreadsheet_id": id,
            "sheet": title,
            "range": values.range,
            "row_count": values.rows.len(),
            "empty": values.rows.is_empty(),
            "rows": values.rows,
        }))
    }
}
