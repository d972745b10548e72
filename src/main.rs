use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parliament_loop::{
    ai::MoonshotClient,
    config::Config,
    server::{AppState, RpcServer},
    storage::SqliteStorage,
};

/// Discussion-distillation server speaking JSON-RPC over stdio.
#[derive(Debug, Parser)]
#[command(name = "parliament-loop", version, about)]
struct Cli {
    /// Override the SQLite database path.
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(database) = cli.database {
        config.database.path = database;
    }
    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Parliament loop server starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Initialize summarization client
    let summarizer = match MoonshotClient::new(&config.ai, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.ai.base_url, model = %config.ai.model, "Summarization client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize summarization client");
            return Err(e.into());
        }
    };

    // Create application state and the background distillation dispatcher
    let (state, dispatcher) = AppState::new(config, Arc::new(storage), Arc::new(summarizer));

    // Start RPC server
    let server = RpcServer::new(Arc::new(state));

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    dispatcher.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        parliament_loop::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        parliament_loop::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
