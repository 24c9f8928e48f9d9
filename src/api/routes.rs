use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};

use super::chains::Chain;
use super::rankings;
use super::server::AppState;
use super::store;
use super::types::*;

const RECENT_FEED_CAP: u32 = 50;
const PAGE_CAP: u32 = 200;

pub async fn recent_trades(
    State(state): State<AppState>,
    Query(params): Query<RecentTradesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(20).min(RECENT_FEED_CAP);

    let trades = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        store::recent_trades(&conn, limit)
    }?;

    Ok(Json(TradesResponse {
        count: trades.len(),
        trades,
        limit,
        offset: 0,
    }))
}

pub async fn agent_trades(
    State(state): State<AppState>,
    Path(agent_id): Path<i64>,
    Query(params): Query<AgentTradesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(50).min(PAGE_CAP);
    let offset = params.offset.unwrap_or(0);

    let chain = match params.chain.as_deref() {
        None => "",
        Some(raw) => match Chain::parse(raw) {
            Some(c) => c.as_str(),
            None => {
                return Err(ApiError::BadRequest(format!("unknown chain: {raw}")));
            }
        },
    };

    let trades = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        if !store::agent_exists(&conn, agent_id)? {
            return Err(ApiError::NotFound);
        }
        store::trades_by_agent(&conn, agent_id, chain, limit, offset)
    }?;

    Ok(Json(TradesResponse {
        count: trades.len(),
        trades,
        limit,
        offset,
    }))
}

pub async fn agent_buybacks(
    State(state): State<AppState>,
    Path(agent_id): Path<i64>,
    Query(params): Query<BuybacksParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(50).min(PAGE_CAP);
    let offset = params.offset.unwrap_or(0);

    let trades = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        if !store::agent_exists(&conn, agent_id)? {
            return Err(ApiError::NotFound);
        }
        store::buybacks_by_agent(&conn, agent_id, limit, offset)
    }?;

    Ok(Json(TradesResponse {
        count: trades.len(),
        trades,
        limit,
        offset,
    }))
}

/// Append point for the external token price poller. Snapshots are read by
/// the ranking aggregator (24h change) and the relay consumer (price pushes).
pub async fn append_token_snapshot(
    State(state): State<AppState>,
    Path(agent_id): Path<i64>,
    Json(body): Json<TokenSnapshotBody>,
) -> Result<impl IntoResponse, ApiError> {
    let captured_at = body
        .captured_at
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        if !store::agent_exists(&conn, agent_id)? {
            return Err(ApiError::NotFound);
        }
        store::insert_token_snapshot(
            &conn,
            agent_id,
            &body.mint,
            body.price_usd,
            body.market_cap_usd,
            body.holder_count,
            captured_at,
        )?;
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Current leaderboard: all rows of the most recent ranking batch.
pub async fn leaderboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let agents = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        store::current_leaderboard(&conn)
    }?;

    Ok(Json(LeaderboardResponse {
        ranked_at: agents.first().map(|r| r.ranked_at),
        agents,
    }))
}

/// Operational escape hatch: recompute the leaderboard right now instead of
/// waiting for the next scheduled run.
pub async fn recalculate(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let summary = {
        let mut conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        rankings::run_ranking(&mut conn)
    }?;

    tracing::info!("rankings: manual recalculation ranked {} agents", summary.agents_ranked);
    Ok(Json(RecalculateResponse {
        agents_ranked: summary.agents_ranked,
        ranked_at: summary.ranked_at,
    }))
}

/// Drops the cached display metadata for one token. Metadata is otherwise
/// cached indefinitely; this is the operational hook for the rare rename.
pub async fn refresh_token_metadata(
    State(state): State<AppState>,
    Path(mint): Path<String>,
) -> impl IntoResponse {
    state.prices.invalidate_metadata(&mint).await;
    Json(serde_json::json!({ "ok": true }))
}

pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let live_sessions = state.hub.session_count().await;
    let (trade_count, agent_count, last_ranked_at) = {
        let conn = state.db.lock().unwrap_or_else(|p| p.into_inner());
        (
            store::trade_count(&conn)?,
            store::agent_count(&conn)?,
            store::latest_ranked_at(&conn)?,
        )
    };

    Ok(Json(HealthResponse {
        status: "ok",
        trade_count,
        agent_count,
        live_sessions,
        last_ranked_at,
    }))
}
