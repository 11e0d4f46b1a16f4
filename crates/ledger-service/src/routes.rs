//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, webhooks, workspaces};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /healthz` - Health check
///
/// ## Workspaces (service API key auth)
/// - `GET /v1/workspaces/:id/balance` - Current balance
/// - `GET /v1/workspaces/:id/ledger` - Ledger history, newest first
/// - `POST /v1/workspaces/:id/deduct` - Record a usage deduction
/// - `PUT /v1/workspaces/:id/auto-recharge` - Auto-recharge settings
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
/// - `POST /webhooks/paypal` - PayPal webhooks
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);
    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/healthz", get(health::healthz))
        // Workspaces
        .route(
            "/v1/workspaces/:id/balance",
            get(workspaces::get_balance),
        )
        .route("/v1/workspaces/:id/ledger", get(workspaces::list_ledger))
        .route("/v1/workspaces/:id/deduct", post(workspaces::deduct))
        .route(
            "/v1/workspaces/:id/auto-recharge",
            put(workspaces::update_auto_recharge),
        )
        // Webhooks
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/webhooks/paypal", post(webhooks::paypal_webhook))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
