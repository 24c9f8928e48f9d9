use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Opens (or creates) the SQLite database and runs migrations.
/// Panics on failure — intended to be called once at startup.
pub fn init_db(path: &str) -> Connection {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent).expect("failed to create data directory");
    }
    let conn = Connection::open(path).expect("failed to open SQLite database");

    // WAL keeps readers unblocked while either ingestion path is writing
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON")
        .expect("failed to configure database");

    init_schema(&conn).expect("failed to create tables");
    tracing::info!("SQLite database initialized at {path}");
    conn
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS trades (
            id              INTEGER PRIMARY KEY,
            agent_id        INTEGER NOT NULL,
            wallet_address  TEXT NOT NULL,
            chain           TEXT NOT NULL,
            tx_signature    TEXT NOT NULL,
            block_time      INTEGER NOT NULL,
            platform        TEXT NOT NULL,
            side            TEXT NOT NULL,
            input_mint      TEXT NOT NULL,
            input_amount    REAL NOT NULL,
            output_mint     TEXT NOT NULL,
            output_amount   REAL NOT NULL,
            base_price_usd  REAL NOT NULL,
            value_usd       REAL NOT NULL,
            is_buyback      INTEGER NOT NULL DEFAULT 0,
            raw_json        TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(tx_signature, chain)
        );

        CREATE INDEX IF NOT EXISTS idx_trades_agent_time
            ON trades(agent_id, block_time DESC);

        CREATE TABLE IF NOT EXISTS agent_wallets (
            id              INTEGER PRIMARY KEY,
            agent_id        INTEGER NOT NULL,
            chain           TEXT NOT NULL,
            wallet_address  TEXT NOT NULL,
            token_address   TEXT,
            UNIQUE(agent_id, chain, wallet_address)
        );

        CREATE TABLE IF NOT EXISTS token_snapshots (
            id              INTEGER PRIMARY KEY,
            agent_id        INTEGER NOT NULL,
            mint            TEXT NOT NULL,
            price_usd       REAL NOT NULL,
            market_cap_usd  REAL NOT NULL,
            holder_count    INTEGER,
            captured_at     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_agent_time
            ON token_snapshots(agent_id, captured_at);

        CREATE TABLE IF NOT EXISTS ranking_snapshots (
            id                      INTEGER PRIMARY KEY,
            agent_id                INTEGER NOT NULL,
            total_pnl_usd           REAL NOT NULL,
            win_rate                REAL NOT NULL,
            trade_count             INTEGER NOT NULL,
            total_volume_usd        REAL NOT NULL,
            token_price_change_24h  REAL NOT NULL,
            buyback_volume_native   REAL NOT NULL,
            buyback_volume_token    REAL NOT NULL,
            rank                    INTEGER NOT NULL,
            ranked_at               INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rankings_batch
            ON ranking_snapshots(ranked_at, rank)",
    )
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct NewTrade {
    pub agent_id: i64,
    pub wallet_address: String,
    pub chain: String,
    pub tx_signature: String,
    pub block_time: i64,
    pub platform: String,
    pub side: String,
    pub input_mint: String,
    pub input_amount: f64,
    pub output_mint: String,
    pub output_amount: f64,
    pub base_price_usd: f64,
    pub value_usd: f64,
    pub is_buyback: bool,
    pub raw_json: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TradeRow {
    pub id: i64,
    pub agent_id: i64,
    pub chain: String,
    pub tx_signature: String,
    pub block_time: i64,
    pub platform: String,
    pub side: String,
    pub input_mint: String,
    pub input_amount: f64,
    pub output_mint: String,
    pub output_amount: f64,
    pub value_usd: f64,
    pub is_buyback: bool,
}

/// Inserts a trade under the `(tx_signature, chain)` uniqueness constraint.
/// Returns `false` when the row already exists — the store is the sole
/// arbiter of duplicate delivery, and a conflict is a success-no-op: the
/// caller must not relay or broadcast again.
pub fn insert_trade(conn: &Connection, t: &NewTrade) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO trades (
            agent_id, wallet_address, chain, tx_signature, block_time,
            platform, side, input_mint, input_amount, output_mint,
            output_amount, base_price_usd, value_usd, is_buyback,
            raw_json, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            t.agent_id,
            t.wallet_address,
            t.chain,
            t.tx_signature,
            t.block_time,
            t.platform,
            t.side,
            t.input_mint,
            t.input_amount,
            t.output_mint,
            t.output_amount,
            t.base_price_usd,
            t.value_usd,
            t.is_buyback,
            t.raw_json,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(changed > 0)
}

const TRADE_COLUMNS: &str = "id, agent_id, chain, tx_signature, block_time, platform, side,
     input_mint, input_amount, output_mint, output_amount, value_usd, is_buyback";

fn map_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<TradeRow> {
    Ok(TradeRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        chain: row.get(2)?,
        tx_signature: row.get(3)?,
        block_time: row.get(4)?,
        platform: row.get(5)?,
        side: row.get(6)?,
        input_mint: row.get(7)?,
        input_amount: row.get(8)?,
        output_mint: row.get(9)?,
        output_amount: row.get(10)?,
        value_usd: row.get(11)?,
        is_buyback: row.get(12)?,
    })
}

/// Global feed across all agents, newest first, bounded page.
pub fn recent_trades(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<TradeRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRADE_COLUMNS} FROM trades ORDER BY block_time DESC, id DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], map_trade)?;
    rows.collect()
}

/// Trades for one agent, newest first. Empty `chain` means all chains.
pub fn trades_by_agent(
    conn: &Connection,
    agent_id: i64,
    chain: &str,
    limit: u32,
    offset: u32,
) -> rusqlite::Result<Vec<TradeRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRADE_COLUMNS} FROM trades
         WHERE agent_id = ?1 AND (chain = ?2 OR ?2 = '')
         ORDER BY block_time DESC, id DESC
         LIMIT ?3 OFFSET ?4"
    ))?;
    let rows = stmt.query_map(params![agent_id, chain, limit, offset], map_trade)?;
    rows.collect()
}

pub fn buybacks_by_agent(
    conn: &Connection,
    agent_id: i64,
    limit: u32,
    offset: u32,
) -> rusqlite::Result<Vec<TradeRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRADE_COLUMNS} FROM trades
         WHERE agent_id = ?1 AND is_buyback = 1
         ORDER BY block_time DESC, id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![agent_id, limit, offset], map_trade)?;
    rows.collect()
}

pub fn trade_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))
}

// ---------------------------------------------------------------------------
// Agent wallets
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentWallet {
    pub agent_id: i64,
    pub chain: String,
    pub wallet_address: String,
    #[serde(default)]
    pub token_address: Option<String>,
}

pub fn insert_wallet(conn: &Connection, w: &AgentWallet) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO agent_wallets (agent_id, chain, wallet_address, token_address)
         VALUES (?1, ?2, ?3, ?4)",
        params![w.agent_id, w.chain, w.wallet_address, w.token_address],
    )?;
    Ok(changed > 0)
}

pub fn find_wallet(
    conn: &Connection,
    chain: &str,
    address: &str,
) -> rusqlite::Result<Option<AgentWallet>> {
    conn.query_row(
        "SELECT agent_id, chain, wallet_address, token_address
         FROM agent_wallets
         WHERE chain = ?1 AND lower(wallet_address) = lower(?2)",
        params![chain, address],
        |row| {
            Ok(AgentWallet {
                agent_id: row.get(0)?,
                chain: row.get(1)?,
                wallet_address: row.get(2)?,
                token_address: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn all_wallets(conn: &Connection) -> rusqlite::Result<Vec<AgentWallet>> {
    let mut stmt = conn.prepare(
        "SELECT agent_id, chain, wallet_address, token_address
         FROM agent_wallets ORDER BY agent_id, chain",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AgentWallet {
            agent_id: row.get(0)?,
            chain: row.get(1)?,
            wallet_address: row.get(2)?,
            token_address: row.get(3)?,
        })
    })?;
    rows.collect()
}

pub fn agent_ids(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT agent_id FROM agent_wallets ORDER BY agent_id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

pub fn agent_exists(conn: &Connection, agent_id: i64) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM agent_wallets WHERE agent_id = ?1",
        params![agent_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn agent_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(DISTINCT agent_id) FROM agent_wallets",
        [],
        |row| row.get(0),
    )
}

/// Seeds agent wallets from a JSON file (array of wallet objects).
/// Existing rows are left untouched; returns the number of new rows.
pub fn seed_wallets_from_file(conn: &Connection, path: &str) -> rusqlite::Result<usize> {
    let raw = match std::fs::read_to_string(path) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("could not read wallet file {path}: {e}");
            return Ok(0);
        }
    };
    let wallets: Vec<AgentWallet> = match serde_json::from_str(&raw) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("could not parse wallet file {path}: {e}");
            return Ok(0);
        }
    };
    let mut added = 0;
    for w in &wallets {
        if insert_wallet(conn, w)? {
            added += 1;
        }
    }
    Ok(added)
}

// ---------------------------------------------------------------------------
// Token snapshots
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TokenSnapshotRow {
    pub mint: String,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub holder_count: Option<i64>,
    pub captured_at: i64,
}

pub fn insert_token_snapshot(
    conn: &Connection,
    agent_id: i64,
    mint: &str,
    price_usd: f64,
    market_cap_usd: f64,
    holder_count: Option<i64>,
    captured_at: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO token_snapshots (agent_id, mint, price_usd, market_cap_usd, holder_count, captured_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![agent_id, mint, price_usd, market_cap_usd, holder_count, captured_at],
    )?;
    Ok(())
}

pub fn latest_token_snapshot(
    conn: &Connection,
    agent_id: i64,
) -> rusqlite::Result<Option<TokenSnapshotRow>> {
    conn.query_row(
        "SELECT mint, price_usd, market_cap_usd, holder_count, captured_at
         FROM token_snapshots WHERE agent_id = ?1
         ORDER BY captured_at DESC LIMIT 1",
        params![agent_id],
        map_snapshot,
    )
    .optional()
}

/// Snapshots captured at or after `from_ts`, oldest first.
pub fn snapshots_since(
    conn: &Connection,
    agent_id: i64,
    from_ts: i64,
) -> rusqlite::Result<Vec<TokenSnapshotRow>> {
    let mut stmt = conn.prepare(
        "SELECT mint, price_usd, market_cap_usd, holder_count, captured_at
         FROM token_snapshots
         WHERE agent_id = ?1 AND captured_at >= ?2
         ORDER BY captured_at",
    )?;
    let rows = stmt.query_map(params![agent_id, from_ts], map_snapshot)?;
    rows.collect()
}

fn map_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenSnapshotRow> {
    Ok(TokenSnapshotRow {
        mint: row.get(0)?,
        price_usd: row.get(1)?,
        market_cap_usd: row.get(2)?,
        holder_count: row.get(3)?,
        captured_at: row.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Ranking snapshots
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct RankingRow {
    pub agent_id: i64,
    pub total_pnl_usd: f64,
    pub win_rate: f64,
    pub trade_count: i64,
    pub total_volume_usd: f64,
    pub token_price_change_24h: f64,
    pub buyback_volume_native: f64,
    pub buyback_volume_token: f64,
    pub rank: i64,
    pub ranked_at: i64,
}

/// Writes one whole ranking batch atomically. Readers keyed on the latest
/// `ranked_at` never observe a partial batch.
pub fn insert_ranking_batch(conn: &mut Connection, rows: &[RankingRow]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO ranking_snapshots (
                agent_id, total_pnl_usd, win_rate, trade_count, total_volume_usd,
                token_price_change_24h, buyback_volume_native, buyback_volume_token,
                rank, ranked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for r in rows {
            stmt.execute(params![
                r.agent_id,
                r.total_pnl_usd,
                r.win_rate,
                r.trade_count,
                r.total_volume_usd,
                r.token_price_change_24h,
                r.buyback_volume_native,
                r.buyback_volume_token,
                r.rank,
                r.ranked_at,
            ])?;
        }
    }
    tx.commit()
}

/// The current leaderboard: all rows of the most recent batch, by rank.
pub fn current_leaderboard(conn: &Connection) -> rusqlite::Result<Vec<RankingRow>> {
    let mut stmt = conn.prepare(
        "SELECT agent_id, total_pnl_usd, win_rate, trade_count, total_volume_usd,
                token_price_change_24h, buyback_volume_native, buyback_volume_token,
                rank, ranked_at
         FROM ranking_snapshots
         WHERE ranked_at = (SELECT MAX(ranked_at) FROM ranking_snapshots)
         ORDER BY rank",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RankingRow {
            agent_id: row.get(0)?,
            total_pnl_usd: row.get(1)?,
            win_rate: row.get(2)?,
            trade_count: row.get(3)?,
            total_volume_usd: row.get(4)?,
            token_price_change_24h: row.get(5)?,
            buyback_volume_native: row.get(6)?,
            buyback_volume_token: row.get(7)?,
            rank: row.get(8)?,
            ranked_at: row.get(9)?,
        })
    })?;
    rows.collect()
}

pub fn latest_ranked_at(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    conn.query_row("SELECT MAX(ranked_at) FROM ranking_snapshots", [], |row| {
        row.get(0)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
