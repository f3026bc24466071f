//! Feedmill — RSS/feed ingestion and summarization delivery service
//!
//! CLI entry point for the Feedmill server.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod middleware;
mod server;

#[derive(Parser)]
#[command(name = "feedmill", version, about = "Feed ingestion and summarization service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve {
        /// Path to a configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedmill=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };

    let config = server::AppConfig::load(config_path.as_deref())?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let (router, _state, shutdown) = server::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "feedmill listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, stopping loops");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
