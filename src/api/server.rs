use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use tower_http::cors::{Any, CorsLayer};

use super::chains::Chain;
use super::hub::HubHandle;
use super::prices::PriceResolver;
use super::relay::RelaySender;
use super::{ingest, live, routes};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub http: reqwest::Client,
    pub prices: PriceResolver,
    pub hub: HubHandle,
    pub relay: RelaySender,
    pub webhook_secret: String,
    /// Per-chain indexer base URLs for the reconciliation poller.
    pub indexers: Arc<HashMap<Chain, String>>,
}

pub async fn run(state: AppState, port: u16) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/webhooks/{chain}/transactions", post(ingest::webhook_handler))
        .route("/api/trades/recent", get(routes::recent_trades))
        .route("/api/agents/{id}/trades", get(routes::agent_trades))
        .route("/api/agents/{id}/buybacks", get(routes::agent_buybacks))
        .route(
            "/api/agents/{id}/token-snapshots",
            post(routes::append_token_snapshot),
        )
        .route("/api/leaderboard", get(routes::leaderboard))
        .route("/api/rankings/recalculate", post(routes::recalculate))
        .route(
            "/api/tokens/{mint}/refresh-metadata",
            post(routes::refresh_token_metadata),
        )
        .route("/api/health", get(routes::health))
        .route("/ws/live", get(live::ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("Failed to bind");

    tracing::info!("API server listening on port {port}");
    axum::serve(listener, app).await.expect("Server failed");
}
