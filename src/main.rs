use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use factcheck_verifier::{
    cli::{execute_command, Cli, Commands},
    config::{Config, LogFormat},
    gateway,
    presentation::ChannelPresentation,
    server::{AppState, McpServer},
    storage::{SqliteStorage, Storage},
    store::ItemStore,
};

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
    cli.apply(&mut config);

    // Initialize logging
    init_logging(&config);

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

    match cli.command() {
        Commands::Serve => serve(config, storage).await,
        command => {
            let result = execute_command(command, &config, Arc::new(storage)).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
            }
            std::process::exit(result.exit_code);
        }
    }
}

async fn serve(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Fact-check verifier server starting..."
    );

    // Restore queued items from the last session
    let mut store = ItemStore::new();
    match storage.load_snapshot().await {
        Ok(Some(snapshot)) => {
            info!(items = snapshot.items.len(), "Restoring saved news items");
            store.restore(snapshot.items, snapshot.next_id);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Failed to load saved news items, starting empty"),
    }

    // Initialize Gemini client
    let gateway = match gateway::from_config(&config) {
        Ok(g) => {
            info!(base_url = %g.inner().base_url(), model = %config.gemini.model, "Gemini client initialized");
            g
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Gemini client");
            return Err(e.into());
        }
    };
    if config.gemini.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; analyses will be rejected until it is configured");
    }

    let (presentation, events) = ChannelPresentation::new();
    let state = Arc::new(AppState::new(
        config,
        store.shared(),
        Arc::new(storage),
        Arc::new(gateway),
        Arc::new(presentation),
    ));
    state.orchestrator.persist_snapshot().await;

    let server = McpServer::new(state, events);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
