use std::time::Duration;

use serde_json::Value;

use super::chains::Chain;
use super::ingest::{self, IngestOutcome};
use super::server::AppState;
use super::store;

const SWEEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Pull-based safety net for the push path. Webhook delivery is not
/// guaranteed (provider outage, missed registration, transient network
/// failure), so every tracked wallet gets a bounded-lookback re-scan on a
/// fixed cadence; the store's uniqueness constraint makes repeated sweeps
/// free of duplicates.
pub async fn run(state: AppState, interval_secs: u64, lookback: u32) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.tick().await; // skip the immediate tick, webhooks cover startup
    tracing::info!("reconciliation poller started (every {interval_secs}s, lookback {lookback})");

    loop {
        ticker.tick().await;
        sweep(&state, lookback).await;
    }
}

pub async fn sweep(state: &AppState, lookback: u32) {
    let wallets = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        match store::all_wallets(&conn) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!("poller: wallet listing failed: {e}");
                return;
            }
        }
    };

    let mut backfilled = 0usize;
    let mut scanned = 0usize;

    for wallet in &wallets {
        let Some(chain) = Chain::parse(&wallet.chain) else {
            tracing::warn!("poller: wallet {} has unknown chain {}", wallet.wallet_address, wallet.chain);
            continue;
        };
        let Some(base) = state.indexers.get(&chain) else {
            continue; // no indexer configured for this chain
        };

        let txs = match fetch_recent(&state.http, base, &wallet.wallet_address, lookback).await {
            Ok(txs) => txs,
            Err(e) => {
                // One wallet's provider hiccup must not abort the sweep
                tracing::warn!("poller: fetch failed for {}: {e}", wallet.wallet_address);
                continue;
            }
        };

        for tx in &txs {
            scanned += 1;
            if ingest::process_payload(state, chain, tx).await == IngestOutcome::Inserted {
                backfilled += 1;
            }
        }
    }

    if backfilled > 0 {
        tracing::info!(
            "poller: backfilled {backfilled} missed trades ({scanned} txs, {} wallets)",
            wallets.len()
        );
    } else {
        tracing::debug!("poller: sweep clean ({scanned} txs, {} wallets)", wallets.len());
    }
}

/// Most recent transactions for a wallet from the chain's indexing provider,
/// provider-native shape (identical to webhook payloads).
async fn fetch_recent(
    http: &reqwest::Client,
    base: &str,
    wallet: &str,
    limit: u32,
) -> Result<Vec<Value>, reqwest::Error> {
    let url = format!(
        "{}/v0/addresses/{wallet}/transactions?limit={limit}",
        base.trim_end_matches('/')
    );
    let resp = http.get(&url).timeout(SWEEP_TIMEOUT).send().await?;
    resp.json().await
}
