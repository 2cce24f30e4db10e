use std::path::Path;

use serde::Deserialize;

use crate::lib::errors::ConfigError;

pub const DEFAULT_SHEET_RANGE: &str = "A1:Z100";
const MAX_RANGE_LENGTH: usize = 64;

/// Defaults applied by the Sheets tools.
#[derive(Debug, Clone)]
pub struct SheetsSection {
    pub default_range: String,
}

impl Default for SheetsSection {
    fn default() -> Self {
        Self {
            default_range: DEFAULT_SHEET_RANGE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawSheetsSection {
    pub default_range: Option<String>,
}

pub fn parse_sheets_section(
    raw: Option<RawSheetsSection>,
    path: &Path,
) -> Result<SheetsSection, ConfigError> {
    let default_range = raw
        .unwrap_or_default()
        .default_range
        .map(|range| range.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SHEET_RANGE.to_string());

    if default_range.is_empty() || default_range.chars().count() > MAX_RANGE_LENGTH {
        return Err(ConfigError::InvalidField {
            path: path.to_path_buf(),
            field: "sheets.default_range",
            message: format!("Provide an A1 range of 1-{MAX_RANGE_LENGTH} characters"),
        });
    }
    if default_range.contains('!') {
        return Err(ConfigError::InvalidField {
            path: path.to_path_buf(),
            field: "sheets.default_range",
            message: "The default range must not name a sheet (drop the `Sheet!` prefix)".into(),
        });
    }

    Ok(SheetsSection { default_range })
}
