use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};

mod api;

use api::chains::Chain;
use api::hub::HubHandle;
use api::prices::PriceResolver;
use api::server::AppState;
use api::{poller, rankings, relay, store};

const RELAY_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port: u16 = env::var("API_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);
    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/agentboard.db".into());
    let webhook_secret = env::var("WEBHOOK_SECRET").unwrap_or_default();
    let poll_interval: u64 = env::var("POLL_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
    let poll_lookback: u32 = env::var("POLL_LOOKBACK_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(25);
    let ranking_interval: u64 = env::var("RANKING_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    if webhook_secret.is_empty() {
        tracing::warn!("WEBHOOK_SECRET is not set — webhook authentication is disabled");
    }

    let conn = store::init_db(&db_path);
    if let Ok(path) = env::var("AGENT_WALLETS_FILE") {
        match store::seed_wallets_from_file(&conn, &path) {
            Ok(added) => tracing::info!("seeded {added} agent wallets from {path}"),
            Err(e) => tracing::warn!("wallet seeding failed: {e}"),
        }
    }
    let db = Arc::new(Mutex::new(conn));

    let mut indexers = HashMap::new();
    if let Ok(url) = env::var("SOLANA_INDEXER_URL") {
        indexers.insert(Chain::Solana, url);
    }
    if let Ok(url) = env::var("BASE_INDEXER_URL") {
        indexers.insert(Chain::Base, url);
    }
    if indexers.is_empty() {
        tracing::warn!("no indexer URLs configured — reconciliation sweeps will be idle");
    }

    let http = reqwest::Client::new();
    let (relay_tx, relay_rx) = relay::channel(RELAY_QUEUE_CAPACITY);

    let state = AppState {
        db,
        http: http.clone(),
        prices: PriceResolver::new(http),
        hub: HubHandle::spawn(),
        relay: relay_tx,
        webhook_secret,
        indexers: Arc::new(indexers),
    };

    tokio::spawn(relay::run_consumer(relay_rx, state.clone()));
    tokio::spawn(poller::run(state.clone(), poll_interval, poll_lookback));
    tokio::spawn(rankings::run(state.clone(), ranking_interval));

    api::server::run(state, port).await;
}
