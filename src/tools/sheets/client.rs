//! Read-only client for the Google Sheets v4 REST API.
use std::{
    any::Any,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::server::{
    config::{EnvKey, EnvironmentConfig, KeyFormat},
    lifecycle::Resource,
};

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const API_KEY_ENV: EnvKey = EnvKey::required(
    "GOOGLE_SHEETS_API_KEY",
    "Google API key with the Sheets API enabled",
);
pub const API_BASE_ENV: EnvKey = EnvKey::optional(
    "GOOGLE_SHEETS_API_BASE",
    KeyFormat::Url,
    "Base URL of the Sheets API",
);
pub const TIMEOUT_ENV: EnvKey = EnvKey::optional(
    "GOOGLE_SHEETS_TIMEOUT_SECS",
    KeyFormat::PositiveInteger,
    "HTTP timeout for Sheets API requests in seconds",
);
pub const ENV_KEYS: &[EnvKey] = &[API_KEY_ENV, API_BASE_ENV, TIMEOUT_ENV];

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Sheets client has been released")]
    Closed,
    #[error("Cannot build request URL from base {base}")]
    InvalidBase { base: String },
    #[error("HTTP request to the Sheets API failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sheets API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl SheetsError {
    fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ApiErrorBody>(body)
            .ok()
            .map(|parsed| match parsed.error.status {
                Some(kind) => format!("{} ({kind})", parsed.error.message),
                None => parsed.error.message,
            })
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });
        SheetsError::Api {
            status: status.as_u16(),
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SheetsError::Api { status, .. } => Some(*status),
            SheetsError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    status: Option<String>,
}

/// Connection settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetsClientSettings {
    pub base_url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl SheetsClientSettings {
    pub fn from_env(env: &EnvironmentConfig) -> anyhow::Result<Self> {
        let api_key = env.require(&API_KEY_ENV)?.to_string();
        let base = env.get(API_BASE_ENV.name).unwrap_or(DEFAULT_API_BASE);
        let base_url =
            Url::parse(base).with_context(|| format!("invalid {}: {base}", API_BASE_ENV.name))?;
        let timeout_secs = match env.get(TIMEOUT_ENV.name) {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid {}: {raw}", TIMEOUT_ENV.name))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            base_url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spreadsheet {
    pub spreadsheet_id: String,
    pub title: Option<String>,
    pub sheets: Vec<SheetSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetSummary {
    pub title: String,
    pub sheet_id: Option<i64>,
    pub index: Option<i64>,
    pub row_count: Option<u64>,
    pub column_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRange {
    pub range: String,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawSpreadsheet {
    properties: Option<RawSpreadsheetProperties>,
    #[serde(default)]
    sheets: Vec<RawSheet>,
}

#[derive(Debug, Deserialize)]
struct RawSpreadsheetProperties {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSheet {
    properties: RawSheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSheetProperties {
    title: String,
    sheet_id: Option<i64>,
    index: Option<i64>,
    grid_properties: Option<RawGridProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGridProperties {
    row_count: Option<u64>,
    column_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawValueRange {
    range: String,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Format `sheet` and `range` as A1 notation, quoting the sheet title.
pub fn a1_notation(sheet: &str, range: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), range)
}

/// Shared Sheets API client. `reqwest::Client` pools connections internally,
/// so one instance serves concurrent invocations.
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url.as_str())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SheetsClient {
    pub fn new(settings: SheetsClientSettings) -> Result<Self, SheetsError> {
        if settings.base_url.cannot_be_a_base() {
            return Err(SheetsError::InvalidBase {
                base: settings.base_url.to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        info!(
            target: "sheets_mcp::sheets",
            base_url = %settings.base_url,
            timeout_secs = settings.timeout.as_secs(),
            "Created Sheets API client"
        );
        Ok(Self {
            http,
            base_url: settings.base_url,
            api_key: settings.api_key,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse further requests. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Spreadsheet title and the properties of every sheet in it.
    pub async fn spreadsheet(&self, spreadsheet_id: &str) -> Result<Spreadsheet, SheetsError> {
        let url = self.endpoint(&[spreadsheet_id])?;
        let raw: RawSpreadsheet = self
            .get_json(url, &[("fields", "properties.title,sheets.properties")])
            .await?;

        let sheets = raw
            .sheets
            .into_iter()
            .map(|sheet| {
                let grid = sheet.properties.grid_properties;
                SheetSummary {
                    title: sheet.properties.title,
                    sheet_id: sheet.properties.sheet_id,
                    index: sheet.properties.index,
                    row_count: grid.as_ref().and_then(|g| g.row_count),
                    column_count: grid.as_ref().and_then(|g| g.column_count),
                }
            })
            .collect();

        Ok(Spreadsheet {
            spreadsheet_id: spreadsheet_id.to_string(),
            title: raw.properties.and_then(|p| p.title),
            sheets,
        })
    }

    /// Cell values of `range` on `sheet`, row by row.
    pub async fn values(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        range: &str,
    ) -> Result<ValueRange, SheetsError> {
        let notation = a1_notation(sheet, range);
        let url = self.endpoint(&[spreadsheet_id, "values", &notation])?;
        let raw: RawValueRange = self.get_json(url, &[("majorDimension", "ROWS")]).await?;
        Ok(ValueRange {
            range: raw.range,
            rows: raw.values,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SheetsError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| SheetsError::InvalidBase {
                base: self.base_url.to_string(),
            })?;
            path.pop_if_empty()
                .extend(["v4", "spreadsheets"])
                .extend(segments);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, SheetsError> {
        if self.is_closed() {
            return Err(SheetsError::Closed);
        }
        debug!(
            target: "sheets_mcp::sheets",
            path = url.path(),
            "Sending Sheets API request"
        );
        let response = self
            .http
            .get(url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::from_response(status, &body));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Resource for SheetsClient {
    async fn release(&self) -> anyhow::Result<()> {
        if self.close() {
            info!(target: "sheets_mcp::sheets", "Closed Sheets API client");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
