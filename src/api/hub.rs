use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Feed events
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct TradePayload {
    pub chain: String,
    pub tx_signature: String,
    pub platform: String,
    pub side: String,
    pub input_mint: String,
    pub input_amount: f64,
    pub output_mint: String,
    pub output_amount: f64,
    pub value_usd: f64,
    pub is_buyback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PricePayload {
    pub mint: String,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_count: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Connected {
        session_id: String,
        timestamp: i64,
    },
    Trade {
        agent_id: i64,
        payload: TradePayload,
        timestamp: i64,
    },
    PriceUpdate {
        agent_id: i64,
        payload: PricePayload,
        timestamp: i64,
    },
}

impl FeedEvent {
    pub fn trade(agent_id: i64, payload: TradePayload) -> Self {
        FeedEvent::Trade {
            agent_id,
            payload,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn price_update(agent_id: i64, payload: PricePayload) -> Self {
        FeedEvent::PriceUpdate {
            agent_id,
            payload,
            timestamp: Utc::now().timestamp(),
        }
    }

    fn agent_id(&self) -> Option<i64> {
        match self {
            FeedEvent::Connected { .. } => None,
            FeedEvent::Trade { agent_id, .. } | FeedEvent::PriceUpdate { agent_id, .. } => {
                Some(*agent_id)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Hub actor
// ---------------------------------------------------------------------------

struct Session {
    tx: mpsc::UnboundedSender<FeedEvent>,
    /// `None` delivers everything; `Some(agent)` delivers only that agent's
    /// events (untagged events still reach everyone).
    filter: Option<i64>,
}

enum HubCommand {
    Connect {
        tx: mpsc::UnboundedSender<FeedEvent>,
        reply: oneshot::Sender<Uuid>,
    },
    Subscribe {
        session: Uuid,
        agent_id: i64,
    },
    Unsubscribe {
        session: Uuid,
    },
    Disconnect {
        session: Uuid,
    },
    Broadcast {
        event: FeedEvent,
    },
    SessionCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the hub actor. The actor task exclusively owns the session map;
/// every mutation and broadcast is serialized through its command channel, so
/// there is no shared-map locking anywhere.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn spawn() -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(rx));
        HubHandle { tx }
    }

    /// Registers a viewer session; events for it arrive on `out`.
    pub async fn connect(&self, out: mpsc::UnboundedSender<FeedEvent>) -> Option<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::Connect { tx: out, reply }).ok()?;
        rx.await.ok()
    }

    pub fn subscribe(&self, session: Uuid, agent_id: i64) {
        let _ = self.tx.send(HubCommand::Subscribe { session, agent_id });
    }

    pub fn unsubscribe(&self, session: Uuid) {
        let _ = self.tx.send(HubCommand::Unsubscribe { session });
    }

    pub fn disconnect(&self, session: Uuid) {
        let _ = self.tx.send(HubCommand::Disconnect { session });
    }

    /// Fire-and-forget fan-out. Losing the race with a dying hub is fine —
    /// live delivery is best-effort by design.
    pub fn broadcast(&self, event: FeedEvent) {
        let _ = self.tx.send(HubCommand::Broadcast { event });
    }

    pub async fn session_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::SessionCount { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

async fn run_hub(mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    let mut sessions: HashMap<Uuid, Session> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Connect { tx, reply } => {
                let id = Uuid::new_v4();
                sessions.insert(id, Session { tx, filter: None });
                tracing::debug!("hub: session {id} connected ({} live)", sessions.len());
                let _ = reply.send(id);
            }
            HubCommand::Subscribe { session, agent_id } => {
                if let Some(s) = sessions.get_mut(&session) {
                    s.filter = Some(agent_id);
                }
            }
            HubCommand::Unsubscribe { session } => {
                if let Some(s) = sessions.get_mut(&session) {
                    s.filter = None;
                }
            }
            HubCommand::Disconnect { session } => {
                sessions.remove(&session);
                tracing::debug!("hub: session {session} disconnected ({} live)", sessions.len());
            }
            HubCommand::Broadcast { event } => {
                let mut dead: Vec<Uuid> = Vec::new();
                for (id, session) in &sessions {
                    if !should_deliver(session.filter, event.agent_id()) {
                        continue;
                    }
                    if session.tx.send(event.clone()).is_err() {
                        dead.push(*id);
                    }
                }
                // A failed send means the transport is gone; drop the
                // session, the client reconnects and subscribes fresh.
                for id in dead {
                    sessions.remove(&id);
                    tracing::debug!("hub: dropped dead session {id}");
                }
            }
            HubCommand::SessionCount { reply } => {
                let _ = reply.send(sessions.len());
            }
        }
    }
}

fn should_deliver(filter: Option<i64>, event_agent: Option<i64>) -> bool {
    match (event_agent, filter) {
        // Untagged events (global notices) reach every session
        (None, _) => true,
        (Some(_), None) => true,
        (Some(agent), Some(wanted)) => agent == wanted,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_event(agent_id: i64) -> FeedEvent {
        FeedEvent::trade(
            agent_id,
            TradePayload {
                chain: "solana".into(),
                tx_signature: format!("sig-{agent_id}"),
                platform: "raydium".into(),
                side: "buy".into(),
                input_mint: "SOL".into(),
                input_amount: 1.0,
                output_mint: "MINT".into(),
                output_amount: 10.0,
                value_usd: 150.0,
                is_buyback: false,
                token_symbol: None,
            },
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<FeedEvent>) -> Vec<FeedEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn filters_route_events_to_the_right_sessions() {
        let hub = HubHandle::spawn();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_all, mut rx_all) = mpsc::unbounded_channel();

        let sess_a = hub.connect(tx_a).await.unwrap();
        let sess_b = hub.connect(tx_b).await.unwrap();
        let _sess_all = hub.connect(tx_all).await.unwrap();

        hub.subscribe(sess_a, 1);
        hub.subscribe(sess_b, 2);

        hub.broadcast(trade_event(1));
        hub.broadcast(trade_event(2));
        hub.broadcast(FeedEvent::Connected {
            session_id: "notice".into(),
            timestamp: 0,
        });
        // Commands are processed in order; a round-trip guarantees the
        // broadcasts above have been handled.
        hub.session_count().await;

        let a = drain(&mut rx_a);
        assert_eq!(a.len(), 2); // agent-1 trade + untagged notice
        assert!(a.iter().any(|e| matches!(e, FeedEvent::Trade { agent_id: 1, .. })));
        assert!(!a.iter().any(|e| matches!(e, FeedEvent::Trade { agent_id: 2, .. })));

        let b = drain(&mut rx_b);
        assert_eq!(b.len(), 2); // agent-2 trade + untagged notice

        let all = drain(&mut rx_all);
        assert_eq!(all.len(), 3); // everything
    }

    #[tokio::test]
    async fn unsubscribe_restores_the_firehose() {
        let hub = HubHandle::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sess = hub.connect(tx).await.unwrap();

        hub.subscribe(sess, 1);
        hub.broadcast(trade_event(2));
        hub.unsubscribe(sess);
        hub.broadcast(trade_event(2));
        hub.session_count().await;

        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn dead_sessions_are_dropped_on_broadcast() {
        let hub = HubHandle::spawn();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();

        hub.connect(tx_live).await.unwrap();
        hub.connect(tx_dead).await.unwrap();
        assert_eq!(hub.session_count().await, 2);

        drop(rx_dead); // transport failure
        hub.broadcast(trade_event(1));
        assert_eq!(hub.session_count().await, 1);

        assert_eq!(drain(&mut rx_live).len(), 1);
    }
}
