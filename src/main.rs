//! OAI-PMH proxy
//!
//! Extends an OAI-PMH repository with set intersections and additional
//! metadata formats.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use oai_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, OaiProxy},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Record { format, identifier }) => {
            run_record(&config, &format, &identifier).await
        }
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print one record's metadata
async fn run_record(config: &Config, format: &str, identifier: &str) -> ExitCode {
    let proxy = match OaiProxy::from_config(config) {
        Ok(proxy) => proxy,
        Err(e) => {
            error!("Failed to create proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    match proxy.get_record(format, identifier).await {
        Ok(Some(xml)) => {
            println!("{xml}");
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("No record {identifier} in format {format}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Failed to fetch record: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the proxy server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        formats = config.formats.len(),
        intersections = config.intersect_sets.len(),
        "Starting OAI-PMH proxy"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
