use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, ClientInfo, ErrorData},
    serve_client,
    service::{RoleClient, RunningService, ServiceError},
    ServiceExt,
};
use serde_json::{json, Map, Value};
use sheets_mcp::server::{
    config::{EnvironmentConfig, ServerConfig},
    lifecycle::ToolServer,
    runtime::{build_tool_server, SheetsMcpServer},
};
use wiremock::{
    matchers::{method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::common::TEST_API_KEY;

const SPREADSHEET_ID: &str = "1AbC-test_sheet";
/// Title as stored in the spreadsheet: the `с` in "Researсher" is Cyrillic.
const STORED_TITLE: &str = "PROMT Temp: UX Researсher";

struct Harness {
    server: Arc<ToolServer>,
    client: RunningService<RoleClient, ClientInfo>,
}

impl Harness {
    async fn start(mock: &MockServer) -> Result<Self> {
        let env = EnvironmentConfig::from_pairs([
            ("GOOGLE_SHEETS_API_KEY", TEST_API_KEY.to_string()),
            ("GOOGLE_SHEETS_API_BASE", mock.uri()),
        ]);
        let server = Arc::new(build_tool_server(&ServerConfig::default(), env)?);
        server.start().await?;

        let (server_io, client_io) = tokio::io::duplex(4096);
        let handler = SheetsMcpServer::new(server.clone(), "test".to_string());
        tokio::spawn(async move {
            if let Ok(running) = handler.serve(server_io).await {
                let _ = running.waiting().await;
            }
        });
        let client = serve_client(ClientInfo::default(), client_io).await?;
        Ok(Self { server, client })
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, ServiceError> {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.client
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
    }

    async fn shutdown(self) -> Result<()> {
        self.client.cancel().await?;
        self.server.stop().await;
        Ok(())
    }
}

fn mcp_error(result: Result<CallToolResult, ServiceError>) -> ErrorData {
    match result {
        Err(ServiceError::McpError(error)) => error,
        other => panic!("expected an MCP error, got {other:?}"),
    }
}

fn metadata_body() -> Value {
    json!({
        "properties": { "title": "Hiring pipeline" },
        "sheets": [
            {
                "properties": {
                    "sheetId": 0,
                    "title": "Summary",
                    "index": 0,
                    "gridProperties": { "rowCount": 1000, "columnCount": 26 }
                }
            },
            {
                "properties": {
                    "sheetId": 17,
                    "title": STORED_TITLE,
                    "index": 1,
                    "gridProperties": { "rowCount": 200, "columnCount": 8 }
                }
            }
        ]
    })
}

async fn mount_metadata(mock: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/v4/spreadsheets/{SPREADSHEET_ID}")))
        .and(query_param("key", TEST_API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body()))
        .mount(mock)
        .await;
}

#[tokio::test]
async fn list_sheets_returns_titles_and_sizes() -> Result<()> {
    let mock = MockServer::start().await;
    mount_metadata(&mock).await;
    let harness = Harness::start(&mock).await?;

    let result = harness
        .call("list_sheets", json!({ "spreadsheet_id": SPREADSHEET_ID }))
        .await?;
    let body = result.structured_content.expect("structured result");
    assert_eq!(body["title"], "Hiring pipeline");
    assert_eq!(body["sheets"][1]["title"], STORED_TITLE);
    assert_eq!(body["sheets"][1]["row_count"], 200);

    harness.shutdown().await
}

#[tokio::test]
async fn find_sheet_ignores_case_and_lookalike_letters() -> Result<()> {
    let mock = MockServer::start().await;
    mount_metadata(&mock).await;
    let harness = Harness::start(&mock).await?;

    let result = harness
        .call(
            "find_sheet",
            json!({ "spreadsheet_id": SPREADSHEET_ID, "title_contains": "ux researcher" }),
        )
        .await?;
    let body = result.structured_content.expect("structured result");
    assert_eq!(body["matches"], json!([STORED_TITLE]));

    harness.shutdown().await
}

#[tokio::test]
async fn get_sheet_data_retries_with_the_stored_title() -> Result<()> {
    let mock = MockServer::start().await;
    mount_metadata(&mock).await;
    // Only the stored (Cyrillic) spelling resolves; any other title is a bad range.
    Mock::given(method("GET"))
        .and(path_regex(format!(
            r"^/v4/spreadsheets/{SPREADSHEET_ID}/values/.*%D1%81.*$"
        )))
        .and(query_param("majorDimension", "ROWS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "range": "'PROMT Temp: UX Researсher'!A1:Z100",
            "majorDimension": "ROWS",
            "values": [["Name", "Stage"], ["Ada", "Offer"]]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(format!(r"^/v4/spreadsheets/{SPREADSHEET_ID}/values/")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "Unable to parse range", "status": "INVALID_ARGUMENT" }
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let harness = Harness::start(&mock).await?;

    let result = harness
        .call(
            "get_sheet_data",
            json!({
                "spreadsheet_id": SPREADSHEET_ID,
                "sheet_name": "PROMT Temp: UX Researcher"
            }),
        )
        .await?;
    let body = result.structured_content.expect("structured result");
    assert_eq!(body["sheet"], STORED_TITLE);
    assert_eq!(body["row_count"], 2);
    assert_eq!(body["empty"], false);
    assert_eq!(body["rows"][1], json!(["Ada", "Offer"]));

    harness.shutdown().await
}

#[tokio::test]
async fn get_sheet_data_does_not_retry_when_the_title_was_already_exact() -> Result<()> {
    let mock = MockServer::start().await;
    mount_metadata(&mock).await;
    Mock::given(method("GET"))
        .and(path_regex(format!(r"^/v4/spreadsheets/{SPREADSHEET_ID}/values/")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "Unable to parse range: Summary!ZZ", "status": "INVALID_ARGUMENT" }
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let harness = Harness::start(&mock).await?;

    let error = mcp_error(
        harness
            .call(
                "get_sheet_data",
                json!({
                    "spreadsheet_id": SPREADSHEET_ID,
                    "sheet_name": "Summary",
                    "range": "ZZ"
                }),
            )
            .await,
    );
    let data = error.data.expect("structured error data");
    assert_eq!(data["code"], "TOOL_EXECUTION_FAILED");
    assert_eq!(data["details"]["tool"], "get_sheet_data");
    assert!(error.message.contains("Unable to parse range"));

    harness.shutdown().await
}

#[tokio::test]
async fn api_failures_surface_as_execution_errors_and_the_server_keeps_serving() -> Result<()> {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/spreadsheets/missing-sheet"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND" }
        })))
        .mount(&mock)
        .await;
    let harness = Harness::start(&mock).await?;

    let error = mcp_error(
        harness
            .call("list_sheets", json!({ "spreadsheet_id": "missing-sheet" }))
            .await,
    );
    let data = error.data.expect("structured error data");
    assert_eq!(data["code"], "TOOL_EXECUTION_FAILED");
    assert_eq!(data["details"]["tool"], "list_sheets");
    assert!(error.message.contains("Requested entity was not found"));

    let pong = harness.call("ping", json!({})).await?;
    assert!(!pong.is_error.unwrap_or(false));

    harness.shutdown().await
}

#[tokio::test]
async fn argument_errors_are_reported_before_any_request() -> Result<()> {
    let mock = MockServer::start().await;
    let harness = Harness::start(&mock).await?;

    let error = mcp_error(harness.call("list_sheets", json!({})).await);
    let data = error.data.expect("structured error data");
    assert_eq!(data["code"], "INVALID_ARGUMENT");
    assert_eq!(data["details"]["parameter"], "spreadsheet_id");

    let error = mcp_error(harness.call("ping", json!({ "unexpected": 1 })).await);
    assert_eq!(error.data.expect("data")["code"], "INVALID_ARGUMENT");

    let error = mcp_error(harness.call("nonexistent_tool", json!({})).await);
    assert_eq!(error.data.expect("data")["code"], "UNKNOWN_TOOL");

    assert!(mock
        .received_requests()
        .await
        .unwrap_or_default()
        .is_empty());
    harness.shutdown().await
}
