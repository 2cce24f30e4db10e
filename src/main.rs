//! Entry point for the Sheets MCP server.
use std::process::ExitCode;

use clap::Parser;
use sheets_mcp::{
    cli::{execute_cli_command, load_config, CliCommand, LaunchProfileArgs, ParsedCommand},
    lib::{errors::EXIT_CONFIGURATION, telemetry},
    server::{
        config::ServerConfig,
        runtime::{self, RuntimeExit},
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    match bootstrap().await {
        Ok(code) => code,
        Err(exit) => exit.report(),
    }
}

async fn bootstrap() -> Result<ExitCode, RuntimeExit> {
    telemetry::init_tracing().map_err(RuntimeExit::from_error)?;
    let args = LaunchProfileArgs::parse();
    let command = args.into_command().map_err(RuntimeExit::from_error)?;

    match command {
        ParsedCommand::RunServer(profile) => {
            let config = load_config(&profile).map_err(RuntimeExit::from_config)?;
            runtime::run_server(profile, config).await?;
            Ok(ExitCode::SUCCESS)
        }
        ParsedCommand::Cli(command, profile) => {
            let config = load_config(&profile).map_err(RuntimeExit::from_config)?;
            handle_cli_command(command, &config)
        }
    }
}

fn handle_cli_command(command: CliCommand, config: &ServerConfig) -> Result<ExitCode, RuntimeExit> {
    let report = execute_cli_command(command, config).map_err(RuntimeExit::from_error)?;
    println!("{}", report.payload);
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CONFIGURATION)
    })
}
