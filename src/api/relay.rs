use std::time::Duration;

use tokio::sync::mpsc;

use super::chains::Chain;
use super::hub::{FeedEvent, PricePayload};
use super::server::AppState;
use super::store;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Lightweight "trade processed" notification. Carries nothing that is not
/// already durable in the trade store — it only triggers idempotent
/// downstream side effects, so redelivery is always safe.
#[derive(Clone, Debug)]
pub struct TradeNotice {
    pub agent_id: i64,
    pub chain: Chain,
    pub signature: String,
    pub is_buyback: bool,
}

#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<TradeNotice>,
}

impl RelaySender {
    /// Fire-and-forget enqueue on the ingestion path. A full queue drops the
    /// notice with a warning rather than stalling ingestion; the trade itself
    /// is already durable.
    pub fn enqueue(&self, notice: TradeNotice) {
        if let Err(e) = self.tx.try_send(notice) {
            tracing::warn!("relay queue full, dropping notice: {e}");
        }
    }
}

pub fn channel(capacity: usize) -> (RelaySender, mpsc::Receiver<TradeNotice>) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelaySender { tx }, rx)
}

/// Consumer loop. Each notice gets a bounded number of attempts; an
/// exhausted notice is dead-lettered to the log and the queue moves on.
pub async fn run_consumer(mut rx: mpsc::Receiver<TradeNotice>, state: AppState) {
    tracing::info!("relay consumer started");
    while let Some(notice) = rx.recv().await {
        let mut attempt = 1;
        loop {
            match handle_notice(&state, &notice).await {
                Ok(()) => break,
                Err(e) if attempt >= MAX_ATTEMPTS => {
                    tracing::warn!(
                        "relay: dead-lettering {} after {attempt} attempts: {e}",
                        notice.signature
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        "relay: attempt {attempt} failed for {}: {e}",
                        notice.signature
                    );
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
            }
        }
    }
    tracing::info!("relay consumer stopped");
}

pub(crate) async fn handle_notice(
    state: &AppState,
    notice: &TradeNotice,
) -> Result<(), rusqlite::Error> {
    if notice.is_buyback {
        tracing::info!(
            "relay: buyback {} on {} for agent {}",
            notice.signature,
            notice.chain.as_str(),
            notice.agent_id
        );
    }

    // Push a fresh token price to live viewers. Built purely from durable
    // snapshot data, so re-running it for a redelivered notice is harmless.
    let snapshot = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        store::latest_token_snapshot(&conn, notice.agent_id)?
    };
    if let Some(s) = snapshot {
        state.hub.broadcast(FeedEvent::price_update(
            notice.agent_id,
            PricePayload {
                mint: s.mint,
                price_usd: s.price_usd,
                market_cap_usd: s.market_cap_usd,
                holder_count: s.holder_count,
            },
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::hub::HubHandle;
    use super::super::prices::PriceResolver;
    use super::super::store::{self, tests::test_conn, AgentWallet};
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn state_with_snapshot() -> AppState {
        let conn = test_conn();
        store::insert_wallet(
            &conn,
            &AgentWallet {
                agent_id: 1,
                chain: "solana".into(),
                wallet_address: "Wa11et".into(),
                token_address: Some("Mint1".into()),
            },
        )
        .unwrap();
        store::insert_token_snapshot(&conn, 1, "Mint1", 0.05, 50_000.0, Some(420), 1_754_000_000)
            .unwrap();

        let (relay_tx, _relay_rx) = channel(8);
        AppState {
            db: Arc::new(Mutex::new(conn)),
            http: reqwest::Client::new(),
            prices: PriceResolver::new(reqwest::Client::new()),
            hub: HubHandle::spawn(),
            relay: relay_tx,
            webhook_secret: String::new(),
            indexers: Arc::new(HashMap::new()),
        }
    }

    #[tokio::test]
    async fn notice_pushes_the_latest_token_price_to_viewers() {
        let state = state_with_snapshot();
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        state.hub.connect(feed_tx).await.unwrap();

        let notice = TradeNotice {
            agent_id: 1,
            chain: Chain::Solana,
            signature: "sigRelay".into(),
            is_buyback: true,
        };
        handle_notice(&state, &notice).await.unwrap();
        // Reprocessing the same notice (at-least-once redelivery) is harmless
        handle_notice(&state, &notice).await.unwrap();

        state.hub.session_count().await;
        let mut updates = 0;
        while let Ok(ev) = feed_rx.try_recv() {
            if let FeedEvent::PriceUpdate { agent_id, payload, .. } = ev {
                assert_eq!(agent_id, 1);
                assert_eq!(payload.mint, "Mint1");
                assert_eq!(payload.holder_count, Some(420));
                updates += 1;
            }
        }
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn notice_without_snapshots_is_quietly_complete() {
        let state = state_with_snapshot();
        let notice = TradeNotice {
            agent_id: 99, // no snapshots for this agent
            chain: Chain::Base,
            signature: "sigNone".into(),
            is_buyback: false,
        };
        assert!(handle_notice(&state, &notice).await.is_ok());
    }
}
