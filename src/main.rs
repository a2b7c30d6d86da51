//! llm-gate server binary.
//!
//! Serves the gateway HTTP API over the in-process simulated backend.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use llm_gate::config::{Cli, Config};
use llm_gate::inference::simulated::SimulatedBackend;
use llm_gate::models::store::FsModelStore;
use llm_gate::server::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llm_gate=debug,tower_http=debug"
    } else {
        "llm_gate=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("llm-gate v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);

    info!(
        model_dir = %config.models.model_dir.display(),
        lora_dir = %config.models.lora_dir.display(),
        flexgen = config.models.flexgen,
        poll_timeout_ms = config.gate.poll_timeout_ms,
        backoff_ms = config.gate.backoff_ms,
        "Configuration loaded"
    );

    let store = Arc::new(FsModelStore::new(config.models.clone()));
    let backend = Arc::new(SimulatedBackend::new(&config.engine));
    let state = Arc::new(AppState::new(config.clone(), store, backend)?);

    // Startup model selection; a failure leaves the gateway up with nothing loaded.
    match state
        .service
        .bootstrap(cli.model.as_deref(), cli.lora.as_deref())
        .await
    {
        Ok(loaded) => info!(
            model = loaded.model_name(),
            loras = ?loaded.adapters,
            "Startup model ready"
        ),
        Err(e) => error!(error = %e, "Startup model failed to load"),
    }

    let app = build_router(state);

    let listen_addr = cli.listen.unwrap_or_else(|| config.server.listen.clone());
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
