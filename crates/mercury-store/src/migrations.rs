//! Schema migrations.
//!
//! `schema_version` holds the current migration number. Migrations are
//! applied in order inside one transaction each; later versions extend
//! existing tables with `ALTER TABLE ADD COLUMN` rather than rebuilding
//! them, so a database written by an older build upgrades in place.

use crate::error::StoreResult;
use rusqlite::Connection;
use tracing::info;

/// Latest schema version.
pub const SCHEMA_VERSION: i64 = 2;

/// Base schema: trades, positions, settlement queue, fills, daily stats.
const V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    market_id TEXT NOT NULL,
    strategy TEXT NOT NULL,
    side TEXT NOT NULL,
    yes_token_id TEXT,
    no_token_id TEXT,
    yes_size TEXT DEFAULT '0',
    no_size TEXT DEFAULT '0',
    yes_price TEXT DEFAULT '0',
    no_price TEXT DEFAULT '0',
    total_cost TEXT NOT NULL,
    guaranteed_pnl TEXT DEFAULT '0',
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    id TEXT PRIMARY KEY,
    market_id TEXT NOT NULL,
    trade_id TEXT REFERENCES trades(id),
    yes_shares TEXT DEFAULT '0',
    no_shares TEXT DEFAULT '0',
    cost_basis TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'OPEN',
    opened_at TEXT NOT NULL,
    closed_at TEXT,
    settlement_proceeds TEXT,
    realized_pnl TEXT
);

CREATE TABLE IF NOT EXISTS settlement_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    position_id TEXT REFERENCES positions(id),
    market_id TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER DEFAULT 0,
    last_attempt_at TEXT,
    status TEXT DEFAULT 'PENDING',
    error TEXT
);

CREATE TABLE IF NOT EXISTS fills (
    id TEXT PRIMARY KEY,
    trade_id TEXT REFERENCES trades(id),
    order_id TEXT NOT NULL,
    token_id TEXT NOT NULL,
    side TEXT NOT NULL,
    requested_size TEXT NOT NULL,
    filled_size TEXT NOT NULL,
    requested_price TEXT NOT NULL,
    filled_price TEXT NOT NULL,
    slippage_cents TEXT,
    latency_ms INTEGER,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_stats (
    date TEXT PRIMARY KEY,
    total_trades INTEGER DEFAULT 0,
    total_volume TEXT DEFAULT '0',
    realized_pnl TEXT DEFAULT '0',
    unrealized_pnl TEXT DEFAULT '0',
    positions_opened INTEGER DEFAULT 0,
    positions_closed INTEGER DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_trades_market ON trades(market_id, created_at);
CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
CREATE INDEX IF NOT EXISTS idx_settlement_status ON settlement_queue(status);
CREATE INDEX IF NOT EXISTS idx_fills_trade ON fills(trade_id);
"#;

/// v2: execution telemetry columns, retry scheduling, the realized-P&L
/// ledger and the persisted circuit-breaker row.
const V2_SQL: &str = r#"
ALTER TABLE trades ADD COLUMN pre_fill_yes_depth TEXT DEFAULT '0';
ALTER TABLE trades ADD COLUMN pre_fill_no_depth TEXT DEFAULT '0';
ALTER TABLE trades ADD COLUMN execution_status TEXT DEFAULT 'full_fill';
ALTER TABLE trades ADD COLUMN dry_run INTEGER DEFAULT 0;

ALTER TABLE settlement_queue ADD COLUMN next_retry_at TEXT;
CREATE UNIQUE INDEX IF NOT EXISTS idx_settlement_position ON settlement_queue(position_id);
CREATE INDEX IF NOT EXISTS idx_settlement_retry ON settlement_queue(status, next_retry_at);

CREATE TABLE IF NOT EXISTS realized_pnl_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    pnl_amount TEXT NOT NULL,
    pnl_type TEXT NOT NULL,
    notes TEXT,
    UNIQUE(trade_id, pnl_type)
);
CREATE INDEX IF NOT EXISTS idx_ledger_date_type ON realized_pnl_ledger(trade_date, pnl_type);

CREATE TABLE IF NOT EXISTS circuit_breaker_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    date TEXT NOT NULL,
    realized_pnl TEXT NOT NULL DEFAULT '0',
    circuit_breaker_hit INTEGER NOT NULL DEFAULT 0,
    hit_at TEXT,
    hit_reason TEXT,
    total_trades_today INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

/// Apply all pending migrations.
pub fn migrate(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);",
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for version in (current + 1)..=SCHEMA_VERSION {
        let tx = conn.transaction()?;
        match version {
            1 => tx.execute_batch(V1_SQL)?,
            2 => tx.execute_batch(V2_SQL)?,
            other => return Err(crate::error::StoreError::UnknownSchemaVersion(other)),
        }
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
        info!(version, "schema migration applied");
    }

    Ok(())
}
