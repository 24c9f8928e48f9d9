use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};

use super::server::AppState;
use super::store::{self, RankingRow};

const PRICE_CHANGE_WINDOW_SECS: i64 = 24 * 3600;

#[derive(Clone, Debug)]
pub struct RankingRunSummary {
    pub agents_ranked: usize,
    pub ranked_at: i64,
}

/// Periodic leaderboard recomputation. Each run is an immutable batch keyed
/// by one shared `ranked_at`; overlapping runs race benignly and the latest
/// batch wins.
pub async fn run(state: AppState, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    tracing::info!("ranking aggregator started (every {interval_secs}s)");

    loop {
        ticker.tick().await;
        let result = {
            let mut conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
            run_ranking(&mut conn)
        };
        match result {
            Ok(summary) => tracing::info!(
                "rankings: ranked {} agents at {}",
                summary.agents_ranked,
                summary.ranked_at
            ),
            Err(e) => tracing::warn!("rankings: run failed: {e}"),
        }
    }
}

/// One full aggregation pass: metrics per agent, sort, dense ranks, single
/// transactional batch write.
pub fn run_ranking(conn: &mut Connection) -> rusqlite::Result<RankingRunSummary> {
    let agents = store::agent_ids(conn)?;
    let now = Utc::now();

    let mut metrics: Vec<AgentMetrics> = Vec::with_capacity(agents.len());
    for agent_id in agents {
        match compute_agent_metrics(conn, agent_id, now.timestamp()) {
            Ok(m) => metrics.push(m),
            // One agent's bad data must not starve the rest of the board
            Err(e) => tracing::warn!("rankings: skipping agent {agent_id}: {e}"),
        }
    }

    // Descending PnL, stable tie-break on agent id
    metrics.sort_by(|a, b| {
        b.total_pnl_usd
            .partial_cmp(&a.total_pnl_usd)
            .unwrap_or(Ordering::Equal)
            .then(a.agent_id.cmp(&b.agent_id))
    });

    let ranked_at = now.timestamp_millis();
    let rows: Vec<RankingRow> = metrics
        .into_iter()
        .enumerate()
        .map(|(i, m)| RankingRow {
            agent_id: m.agent_id,
            total_pnl_usd: m.total_pnl_usd,
            win_rate: m.win_rate,
            trade_count: m.trade_count,
            total_volume_usd: m.total_volume_usd,
            token_price_change_24h: m.token_price_change_24h,
            buyback_volume_native: m.buyback_volume_native,
            buyback_volume_token: m.buyback_volume_token,
            rank: (i + 1) as i64,
            ranked_at,
        })
        .collect();

    store::insert_ranking_batch(conn, &rows)?;
    Ok(RankingRunSummary {
        agents_ranked: rows.len(),
        ranked_at,
    })
}

struct AgentMetrics {
    agent_id: i64,
    total_pnl_usd: f64,
    win_rate: f64,
    trade_count: i64,
    total_volume_usd: f64,
    token_price_change_24h: f64,
    buyback_volume_native: f64,
    buyback_volume_token: f64,
}

fn compute_agent_metrics(
    conn: &Connection,
    agent_id: i64,
    now_ts: i64,
) -> rusqlite::Result<AgentMetrics> {
    // Realized PnL over the whole ledger: sell proceeds minus buy spend
    let (trade_count, total_volume_usd, sell_usd, buy_usd): (i64, f64, f64, f64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(value_usd), 0),
                COALESCE(SUM(CASE WHEN side = 'sell' THEN value_usd ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN side = 'buy' THEN value_usd ELSE 0 END), 0)
         FROM trades WHERE agent_id = ?1",
        params![agent_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let (buyback_volume_native, buyback_volume_token): (f64, f64) = conn.query_row(
        "SELECT COALESCE(SUM(input_amount), 0), COALESCE(SUM(output_amount), 0)
         FROM trades WHERE agent_id = ?1 AND is_buyback = 1",
        params![agent_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(AgentMetrics {
        agent_id,
        total_pnl_usd: sell_usd - buy_usd,
        win_rate: compute_win_rate(conn, agent_id)?,
        trade_count,
        total_volume_usd,
        token_price_change_24h: price_change_24h(conn, agent_id, now_ts)?,
        buyback_volume_native,
        buyback_volume_token,
    })
}

/// Share of sells that beat the agent's volume-weighted average buy cost of
/// the sold token. No sells → 0.0.
fn compute_win_rate(conn: &Connection, agent_id: i64) -> rusqlite::Result<f64> {
    // Average USD cost per token unit, per mint bought
    let mut stmt = conn.prepare(
        "SELECT output_mint, SUM(value_usd) / NULLIF(SUM(output_amount), 0)
         FROM trades WHERE agent_id = ?1 AND side = 'buy'
         GROUP BY output_mint",
    )?;
    let avg_costs: HashMap<String, Option<f64>> = stmt
        .query_map(params![agent_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    let mut stmt = conn.prepare(
        "SELECT input_mint, input_amount, value_usd
         FROM trades WHERE agent_id = ?1 AND side = 'sell'",
    )?;
    let sells: Vec<(String, f64, f64)> = stmt
        .query_map(params![agent_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    if sells.is_empty() {
        return Ok(0.0);
    }

    let wins = sells
        .iter()
        .filter(|(mint, amount, value_usd)| {
            match avg_costs.get(mint).copied().flatten() {
                Some(unit_cost) => *value_usd > unit_cost * amount,
                // Sold without a recorded buy — proceeds with no cost basis
                None => *value_usd > 0.0,
            }
        })
        .count();

    Ok(wins as f64 / sells.len() as f64)
}

/// Percent change between the earliest and latest token snapshot in the
/// trailing 24h. Fewer than two snapshots in the window is not an error —
/// a freshly listed agent simply reports 0.0 and is still ranked.
fn price_change_24h(conn: &Connection, agent_id: i64, now_ts: i64) -> rusqlite::Result<f64> {
    let snapshots = store::snapshots_since(conn, agent_id, now_ts - PRICE_CHANGE_WINDOW_SECS)?;
    let (Some(first), Some(last)) = (snapshots.first(), snapshots.last()) else {
        return Ok(0.0);
    };
    if snapshots.len() < 2 || first.price_usd <= 0.0 {
        return Ok(0.0);
    }
    Ok((last.price_usd - first.price_usd) / first.price_usd * 100.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
