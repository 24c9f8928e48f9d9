use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use rusqlite::Connection;
use serde_json::{json, Value};

use super::chains::{Chain, SwapEvent, TradeSide};
use super::hub::{FeedEvent, HubHandle, TradePayload};
use super::relay::{RelaySender, TradeNotice};
use super::server::AppState;
use super::store::{self, AgentWallet, NewTrade};
use super::types::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Fresh trade persisted, relay + broadcast fired.
    Inserted,
    /// Already stored via the other delivery path; nothing re-fired.
    Duplicate,
    /// Not a swap, unknown wallet, no price, or a storage error. Logged,
    /// never fatal to the batch.
    Skipped,
}

// ---------------------------------------------------------------------------
// POST /webhooks/{chain}/transactions
// ---------------------------------------------------------------------------

/// Push ingestion from the chain-monitoring provider. The body is one
/// provider-native transaction object or an array of them. Item outcomes are
/// internal-only: the provider always gets the same acknowledgment, so a bad
/// item can never trigger a redelivery storm.
pub async fn webhook_handler(
    State(state): State<AppState>,
    Path(chain): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.webhook_secret.is_empty() {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {}", state.webhook_secret) {
            return Err(ApiError::Unauthorized);
        }
    }

    let Some(chain) = Chain::parse(&chain) else {
        return Err(ApiError::BadRequest(format!("unknown chain: {chain}")));
    };

    let items: Vec<Value> = match body {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => {
            return Err(ApiError::BadRequest(
                "expected a transaction object or array".into(),
            ));
        }
    };

    let received = items.len();
    let mut inserted = 0;
    for item in &items {
        if process_payload(&state, chain, item).await == IngestOutcome::Inserted {
            inserted += 1;
        }
    }
    tracing::debug!(
        "webhook: {inserted}/{received} new trades on {}",
        chain.as_str()
    );

    Ok(Json(json!({ "received": received })))
}

// ---------------------------------------------------------------------------
// Shared ingestion core (webhook + reconciliation poller)
// ---------------------------------------------------------------------------

/// Runs one provider payload through the full pipeline: wallet resolve →
/// normalize → price → persist → (on fresh insert only) relay + broadcast.
/// Every failure mode is a per-item skip.
pub async fn process_payload(state: &AppState, chain: Chain, payload: &Value) -> IngestOutcome {
    let Some(address) = chain.wallet_of(payload) else {
        return IngestOutcome::Skipped;
    };

    let wallet = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        match store::find_wallet(&conn, chain.as_str(), &address) {
            Ok(Some(w)) => w,
            // This endpoint sees traffic for addresses it does not track
            Ok(None) => return IngestOutcome::Skipped,
            Err(e) => {
                tracing::warn!("ingest: wallet lookup failed for {address}: {e}");
                return IngestOutcome::Skipped;
            }
        }
    };

    let Some(swap) = chain.normalize(&wallet.wallet_address, payload) else {
        return IngestOutcome::Skipped;
    };

    let base_price = match state.prices.base_asset_price_usd(chain).await {
        Ok(p) => p,
        Err(e) => {
            // Without a price the trade is unprocessable; the poller will
            // pick it up on a later sweep once pricing recovers.
            tracing::warn!("ingest: skipping {}: {e}", swap.signature);
            return IngestOutcome::Skipped;
        }
    };

    let trade = build_trade(&wallet, chain, &swap, base_price, payload);
    let symbol = match trade.side.as_str() {
        "buy" => state.prices.token_metadata(&trade.output_mint).await,
        _ => state.prices.token_metadata(&trade.input_mint).await,
    }
    .map(|m| m.symbol);

    let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
    commit_trade(&conn, &state.hub, &state.relay, chain, &trade, symbol)
}

pub(crate) fn build_trade(
    wallet: &AgentWallet,
    chain: Chain,
    swap: &SwapEvent,
    base_price: f64,
    raw: &Value,
) -> NewTrade {
    let is_buyback = swap.side == TradeSide::Buy
        && wallet
            .token_address
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(&swap.output_mint));

    NewTrade {
        agent_id: wallet.agent_id,
        wallet_address: wallet.wallet_address.clone(),
        chain: chain.as_str().to_string(),
        tx_signature: swap.signature.clone(),
        block_time: swap.block_time,
        platform: swap.platform.clone(),
        side: swap.side.as_str().to_string(),
        input_mint: swap.input_mint.clone(),
        input_amount: swap.input_amount,
        output_mint: swap.output_mint.clone(),
        output_amount: swap.output_amount,
        base_price_usd: base_price,
        value_usd: swap.native_amount * base_price,
        is_buyback,
        raw_json: raw.to_string(),
    }
}

/// Persists a trade and fires the post-insert side effects exactly when the
/// row is new. The uniqueness constraint is the only dedup mechanism: a
/// duplicate is a quiet no-op with no second relay notice or broadcast.
pub(crate) fn commit_trade(
    conn: &Connection,
    hub: &HubHandle,
    relay: &RelaySender,
    chain: Chain,
    trade: &NewTrade,
    token_symbol: Option<String>,
) -> IngestOutcome {
    let inserted = match store::insert_trade(conn, trade) {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!("ingest: insert failed for {}: {e}", trade.tx_signature);
            return IngestOutcome::Skipped;
        }
    };
    if !inserted {
        return IngestOutcome::Duplicate;
    }

    tracing::info!(
        "ingest: {} {} {:.4} {} (${:.2}) agent={} via {}",
        trade.side,
        trade.tx_signature,
        trade.output_amount,
        trade.output_mint,
        trade.value_usd,
        trade.agent_id,
        trade.platform
    );

    // Best-effort side effects after the durable write; neither can roll
    // the trade back.
    relay.enqueue(TradeNotice {
        agent_id: trade.agent_id,
        chain,
        signature: trade.tx_signature.clone(),
        is_buyback: trade.is_buyback,
    });
    hub.broadcast(FeedEvent::trade(
        trade.agent_id,
        TradePayload {
            chain: trade.chain.clone(),
            tx_signature: trade.tx_signature.clone(),
            platform: trade.platform.clone(),
            side: trade.side.clone(),
            input_mint: trade.input_mint.clone(),
            input_amount: trade.input_amount,
            output_mint: trade.output_mint.clone(),
            output_amount: trade.output_amount,
            value_usd: trade.value_usd,
            is_buyback: trade.is_buyback,
            token_symbol,
        },
    ));

    IngestOutcome::Inserted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::prices::PriceResolver;
    use super::super::relay;
    use super::super::store::tests::test_conn;
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WALLET: &str = "AgentWa11etPubkey111111111111111111111111111";
    const AGENT_TOKEN: &str = "TokenMint1111111111111111111111111111111111";

    fn seeded_state() -> (AppState, mpsc::Receiver<TradeNotice>) {
        let conn = test_conn();
        store::insert_wallet(
            &conn,
            &AgentWallet {
                agent_id: 1,
                chain: "solana".into(),
                wallet_address: WALLET.into(),
                token_address: Some(AGENT_TOKEN.into()),
            },
        )
        .unwrap();

        // Unreachable upstreams: price lookups fail unless prewarmed and
        // metadata enrichment degrades to None, keeping tests offline.
        let (relay_tx, relay_rx) = relay::channel(64);
        let state = AppState {
            db: Arc::new(Mutex::new(conn)),
            http: reqwest::Client::new(),
            prices: PriceResolver::with_hosts(
                reqwest::Client::new(),
                "http://127.0.0.1:9/price",
                "http://127.0.0.1:9/tokens",
            ),
            hub: HubHandle::spawn(),
            relay: relay_tx,
            webhook_secret: "hook-secret".into(),
            indexers: Arc::new(HashMap::new()),
        };
        (state, relay_rx)
    }

    fn swap_payload(signature: &str) -> Value {
        json!({
            "signature": signature,
            "timestamp": 1_754_000_000,
            "feePayer": WALLET,
            "source": "PUMP_FUN",
            "events": {
                "swap": {
                    "nativeInput": { "account": WALLET, "amount": "2000000000" },
                    "tokenOutputs": [{
                        "userAccount": WALLET,
                        "mint": AGENT_TOKEN,
                        "rawTokenAmount": { "tokenAmount": "500000000000", "decimals": 6 }
                    }]
                }
            }
        })
    }

    fn auth_headers(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {secret}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn duplicate_delivery_converges_to_one_trade_and_one_side_effect() {
        let (state, mut relay_rx) = seeded_state();
        state.prices.prewarm(Chain::Solana, 150.0).await;

        // Live viewer watching everything
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        state.hub.connect(feed_tx).await.unwrap();

        // Same signature delivered twice, 50ms apart (webhook vs poller race)
        let payload = swap_payload("5xY2kDupSig");
        let first = process_payload(&state, Chain::Solana, &payload).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = process_payload(&state, Chain::Solana, &payload).await;

        assert_eq!(first, IngestOutcome::Inserted);
        assert_eq!(second, IngestOutcome::Duplicate);

        let conn = state.db.lock().unwrap();
        assert_eq!(store::trade_count(&conn).unwrap(), 1);
        let rows = store::recent_trades(&conn, 10).unwrap();
        assert!(rows[0].is_buyback); // bought the agent's own token
        assert!((rows[0].value_usd - 300.0).abs() < 1e-6);
        drop(conn);

        // Exactly one relay notice
        let notice = relay_rx.try_recv().unwrap();
        assert_eq!(notice.signature, "5xY2kDupSig");
        assert!(notice.is_buyback);
        assert!(relay_rx.try_recv().is_err());

        // Exactly one trade broadcast
        state.hub.session_count().await;
        let mut trade_events = 0;
        while let Ok(ev) = feed_rx.try_recv() {
            if matches!(ev, FeedEvent::Trade { .. }) {
                trade_events += 1;
            }
        }
        assert_eq!(trade_events, 1);
    }

    #[tokio::test]
    async fn unknown_wallet_and_non_swap_are_skipped() {
        let (state, mut relay_rx) = seeded_state();
        state.prices.prewarm(Chain::Solana, 150.0).await;

        let mut stranger = swap_payload("sigStranger");
        stranger["feePayer"] = json!("SomeUntrackedWa11et11111111111111111111111");
        assert_eq!(
            process_payload(&state, Chain::Solana, &stranger).await,
            IngestOutcome::Skipped
        );

        let not_a_swap = json!({
            "signature": "sigNoise",
            "timestamp": 1_754_000_000,
            "feePayer": WALLET
        });
        assert_eq!(
            process_payload(&state, Chain::Solana, &not_a_swap).await,
            IngestOutcome::Skipped
        );

        assert!(relay_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn webhook_batch_survives_a_malformed_item() {
        let (state, _relay_rx) = seeded_state();
        state.prices.prewarm(Chain::Solana, 150.0).await;

        let batch = json!([
            swap_payload("sigOk1"),
            { "garbage": true },
            swap_payload("sigOk2"),
        ]);

        let resp = webhook_handler(
            State(state.clone()),
            Path("solana".into()),
            auth_headers("hook-secret"),
            Json(batch),
        )
        .await;
        assert!(resp.is_ok());

        let conn = state.db.lock().unwrap();
        assert_eq!(store::trade_count(&conn).unwrap(), 2);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_credentials_before_processing() {
        let (state, _relay_rx) = seeded_state();

        let resp = webhook_handler(
            State(state.clone()),
            Path("solana".into()),
            auth_headers("wrong-secret"),
            Json(swap_payload("sigAuth")),
        )
        .await;
        assert!(matches!(resp, Err(ApiError::Unauthorized)));

        let conn = state.db.lock().unwrap();
        assert_eq!(store::trade_count(&conn).unwrap(), 0);
    }

    #[tokio::test]
    async fn price_outage_skips_the_trade_instead_of_storing_zero() {
        let (state, mut relay_rx) = seeded_state();
        // No prewarm: resolver hits an unreachable host and fails
        let outcome = process_payload(&state, Chain::Solana, &swap_payload("sigNoPrice")).await;
        assert_eq!(outcome, IngestOutcome::Skipped);

        let conn = state.db.lock().unwrap();
        assert_eq!(store::trade_count(&conn).unwrap(), 0);
        drop(conn);
        assert!(relay_rx.try_recv().is_err());
    }
}
