//! `gate-webhook`: the callback verifier's HTTP front door. Terminates
//! inbound chat-provider callbacks, runs the shared verification pipeline
//! (spec §4.7), and transitions approval rows. Also runs the periodic
//! cleanup sweep (spec §3).

mod cli;

use clap::Parser;
use cli::Cli;
use gate_core::config::GateConfig;
use gate_core::store::RestStore;
use gate_webhook::cleanup;
use gate_webhook::routes;
use gate_webhook::state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GateConfig::load_from_path(path)?,
        None => GateConfig::load()?,
    };

    let mut store = RestStore::new(config.store_url(), config.toml.store.anon_key.clone());
    if let Some(service_key) = config.store_service_key() {
        store = store.with_service_key(service_key);
    }

    let app_state = AppState::from_config(&config, store)?;
    cleanup::spawn(app_state.store.clone());

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&cli.addr).await?;
    tracing::info!(addr = %cli.addr, "gate-webhook listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
