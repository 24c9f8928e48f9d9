use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::store::{RankingRow, TradeRow};

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// Typed error for the query endpoints; maps failure classes onto HTTP
/// statuses and a JSON `{"error": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Db(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Db(e) => {
                tracing::warn!("api: database error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentTradesParams {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct AgentTradesParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub chain: Option<String>,
}

#[derive(Deserialize)]
pub struct BuybacksParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Deserialize)]
pub struct TokenSnapshotBody {
    pub mint: String,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    #[serde(default)]
    pub holder_count: Option<i64>,
    /// Unix seconds; defaults to receipt time.
    #[serde(default)]
    pub captured_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TradesResponse {
    pub trades: Vec<TradeRow>,
    pub count: usize,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Serialize)]
pub struct LeaderboardResponse {
    pub ranked_at: Option<i64>,
    pub agents: Vec<RankingRow>,
}

#[derive(Serialize)]
pub struct RecalculateResponse {
    pub agents_ranked: usize,
    pub ranked_at: i64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub trade_count: i64,
    pub agent_count: i64,
    pub live_sessions: usize,
    pub last_ranked_at: Option<i64>,
}
