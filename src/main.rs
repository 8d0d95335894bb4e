//! dummypage HTTP server
//!
//! Loads configuration, assembles the router and serves until a shutdown
//! signal arrives.

use clap::Parser;
use dummypage::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    server::{self, Server},
    telemetry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                eprintln!("Configuration template written to {}", path.display());
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Arc::new(Config::load(cli.config.as_deref())?);
    telemetry::init(&config.log)?;

    tracing::info!(
        addr = %config.server.addr,
        version = %config.server.version,
        "Starting dummypage"
    );

    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::clone(&config), shutdown.clone())?;

    let sweeper = if config.rate_limit.enabled {
        Some(state.limiter().spawn_sweeper(shutdown.clone()))
    } else {
        None
    };

    let router = handlers::build_router(state)?;
    let server = Server::bind(&config.server).await?;
    tracing::info!(address = %server.local_addr()?, "Listening");

    server
        .run(router, server::shutdown_signal(), shutdown.clone())
        .await?;

    if let Some(sweeper) = sweeper
        && let Err(e) = sweeper.await
    {
        tracing::warn!(error = %e, "Rate limit sweeper ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
