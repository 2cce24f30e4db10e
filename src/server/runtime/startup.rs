use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Error};
use rmcp::ServiceExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    cli::{LaunchProfile, TransportMode},
    lib::{
        errors::{ConfigError, StartupError},
        telemetry::{emit_runtime_mode, RuntimeModeTelemetry},
    },
    server::{
        config::{EnvironmentConfig, ServerConfig},
        lifecycle::ToolServer,
        runtime::{build_instructions, SheetsMcpServer},
    },
    tools::{
        build_registry,
        sheets::{self, SheetsProvider},
    },
};

/// Bundles a runtime error message with an exit code and optional structured error data.
#[derive(Debug)]
pub struct RuntimeExit {
    message: String,
    exit_code: ExitCode,
    error_data: Option<rmcp::model::ErrorData>,
}

impl RuntimeExit {
    pub fn structured(error: rmcp::model::ErrorData, exit_code: ExitCode) -> Self {
        Self {
            message: error.message.to_string(),
            exit_code,
            error_data: Some(error),
        }
    }

    pub fn from_error(err: impl Into<Error>) -> Self {
        let err = err.into();
        Self {
            message: format!("{err:?}"),
            exit_code: ExitCode::FAILURE,
            error_data: None,
        }
    }

    /// Startup failures carry their own exit code (78 configuration, 69 initialization).
    pub fn from_startup(err: StartupError) -> Self {
        Self::structured(err.to_error_data(), ExitCode::from(err.exit_code_value()))
    }

    pub fn from_config(err: ConfigError) -> Self {
        Self::from_startup(StartupError::Configuration(err))
    }

    pub fn report(self) -> ExitCode {
        if let Some(data) = self.error_data {
            if let Ok(serialized) = serde_json::to_string(&data) {
                eprintln!("{serialized}");
            } else {
                eprintln!("{}", data.message);
            }
        } else {
            eprintln!("{}", self.message);
        }
        self.exit_code
    }
}

/// Assemble the tool server the binary runs: the built-in registry plus the
/// Sheets resource, limited by the `[lifecycle]` settings.
pub fn build_tool_server(config: &ServerConfig, env: EnvironmentConfig) -> anyhow::Result<ToolServer> {
    let registry = build_registry(&config.sheets).context("failed to build tool registry")?;
    Ok(ToolServer::builder(registry)
        .provider(SheetsProvider)
        .environment(env)
        .settings(config.lifecycle.settings())
        .build())
}

/// Start the MCP server and select stdio/TCP based on the launch profile.
pub async fn run_server(profile: LaunchProfile, config: ServerConfig) -> Result<(), RuntimeExit> {
    let env = EnvironmentConfig::capture(sheets::ENV_KEYS);
    let server = Arc::new(build_tool_server(&config, env).map_err(RuntimeExit::from_error)?);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    server.start().await.map_err(RuntimeExit::from_startup)?;

    let instructions = build_instructions(&profile, &config, server.registry());
    let config_path = config.source_path.as_ref().map(|p| p.to_string_lossy());
    emit_runtime_mode(&RuntimeModeTelemetry {
        transport: profile.transport.as_str(),
        host: Some(config.server.host.as_str()),
        port: Some(config.server.port),
        config_path: config_path.as_deref(),
        tools: server.registry().len(),
        instructions: &instructions,
        launch_args: &profile.launch_args,
    });

    let handler = SheetsMcpServer::new(server.clone(), instructions);
    let served = match profile.transport {
        TransportMode::Stdio => run_stdio(handler, shutdown.clone()).await,
        TransportMode::Tcp => run_tcp(handler, &config, shutdown.clone()).await,
    };

    let report = server.stop().await;
    tracing::info!(
        target: "sheets_mcp::runtime",
        drained = report.drained,
        released = report.release.released.len(),
        release_failures = report.release.failures.len(),
        "Server stopped"
    );
    served
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(
                target: "sheets_mcp::runtime",
                "Interrupt received; shutting down"
            );
            shutdown.cancel();
        }
    });
}

async fn run_stdio(server: SheetsMcpServer, shutdown: CancellationToken) -> Result<(), RuntimeExit> {
    let running = server
        .serve_with_ct(rmcp::transport::stdio(), shutdown)
        .await
        .map_err(RuntimeExit::from_error)?;
    running.waiting().await.map_err(RuntimeExit::from_error)?;
    Ok(())
}

async fn run_tcp(
    server: SheetsMcpServer,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), RuntimeExit> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind TCP port {addr}"))
        .map_err(RuntimeExit::from_error)?;
    tracing::info!(
        target: "sheets_mcp::runtime",
        transport = "tcp",
        bind_addr = %addr,
        "Started listening in TCP mode"
    );

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted
                .with_context(|| format!("failed to accept TCP connection ({addr})"))
                .map_err(RuntimeExit::from_error)?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        tracing::info!(
            target: "sheets_mcp::runtime",
            peer = %peer,
            "Accepted connection from MCP client"
        );
        let running = server
            .clone()
            .serve_with_ct(stream, shutdown.child_token())
            .await
            .map_err(RuntimeExit::from_error)?;
        running.waiting().await.map_err(RuntimeExit::from_error)?;
        if shutdown.is_cancelled() {
            return Ok(());
        }
    }
}
