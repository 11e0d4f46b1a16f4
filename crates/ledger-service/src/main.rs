//! Ledger service entry point.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_service::{auto_recharge, create_router, AppState, ServiceConfig};
use ledger_store::LedgerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ledger_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ledger service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        stripe_configured = %config.stripe_api_key.is_some(),
        paypal_configured = %config.paypal_client_id.is_some(),
        "Service configuration loaded"
    );

    let store = LedgerStore::connect(&config.database_url).await?;
    store.migrate().await?;
    tracing::info!("Database migrations applied");

    let state = AppState::new(store, config.clone());

    auto_recharge::spawn_sweep_task(state.clone());

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
