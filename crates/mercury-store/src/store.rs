//! The single-writer SQLite store.

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::models::{
    CircuitBreakerRow, ClaimableEntry, DailyStats, PnlType, RealizedPnlEntry, SettlementStatus,
    Trade,
};
use chrono::{DateTime, NaiveDate, Utc};
use mercury_core::{ConditionId, Fill, Position, PositionStatus, Size, TokenId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

fn parse_decimal(raw: String, field: &str) -> StoreResult<Decimal> {
    Decimal::from_str(&raw).map_err(|_| StoreError::CorruptRow(format!("{field}: {raw}")))
}

fn parse_opt_decimal(raw: Option<String>, field: &str) -> StoreResult<Option<Decimal>> {
    raw.map(|s| parse_decimal(s, field)).transpose()
}

fn parse_datetime(raw: String, field: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::CorruptRow(format!("{field}: {raw}")))
}

fn parse_opt_datetime(raw: Option<String>, field: &str) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(|s| parse_datetime(s, field)).transpose()
}

/// Persistent, single-writer state store.
///
/// One connection guarded by a mutex: callers serialize on it, which is
/// exactly the single-writer policy the schema assumes. Operations are
/// small and local, so the lock is held only for microseconds.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (and migrate) the on-disk store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        info!(path = %path.as_ref().display(), "state store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ------------------------------------------------------------------
    // Trades, positions, fills
    // ------------------------------------------------------------------

    /// Persist one business event atomically: the trade, its fills, the
    /// position (if any leg matched) and the settlement-queue entry.
    /// Daily aggregates are upserted in the same transaction.
    pub fn record_execution(
        &self,
        trade: &Trade,
        position: Option<&Position>,
        fills: &[Fill],
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO trades (id, market_id, strategy, side, yes_token_id, no_token_id,
                                 yes_size, no_size, yes_price, no_price, total_cost,
                                 guaranteed_pnl, status, execution_status,
                                 pre_fill_yes_depth, pre_fill_no_depth, dry_run,
                                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                trade.trade_id,
                trade.market_id.as_str(),
                trade.strategy,
                trade.side,
                trade.yes_token_id.as_str(),
                trade.no_token_id.as_str(),
                trade.yes_size.to_string(),
                trade.no_size.to_string(),
                trade.yes_price.to_string(),
                trade.no_price.to_string(),
                trade.total_cost.to_string(),
                trade.guaranteed_pnl.to_string(),
                trade.status,
                trade.execution_status.to_string(),
                trade.pre_fill_yes_depth.to_string(),
                trade.pre_fill_no_depth.to_string(),
                trade.dry_run as i64,
                trade.created_at.to_rfc3339(),
                trade.updated_at.to_rfc3339(),
            ],
        )?;

        for fill in fills {
            tx.execute(
                "INSERT INTO fills (id, trade_id, order_id, token_id, side, requested_size,
                                    filled_size, requested_price, filled_price, slippage_cents,
                                    latency_ms, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    Uuid::new_v4().to_string(),
                    trade.trade_id,
                    fill.order_id,
                    fill.token_id.as_str(),
                    fill.side.to_string(),
                    fill.requested_size.to_string(),
                    fill.filled_size.to_string(),
                    fill.requested_price.to_string(),
                    fill.filled_price.to_string(),
                    fill.slippage_cents.to_string(),
                    fill.latency_ms,
                    fill.timestamp.to_rfc3339(),
                ],
            )?;
        }

        let mut positions_opened = 0u32;
        if let Some(position) = position {
            Self::insert_position(&tx, position)?;
            Self::enqueue_settlement(
                &tx,
                &position.position_id,
                &position.market_id,
                &position.market_id,
            )?;
            positions_opened = 1;
        }

        let date = trade.created_at.date_naive();
        Self::upsert_daily_stats(&tx, date, 1, trade.total_cost, Decimal::ZERO, positions_opened, 0)?;

        tx.commit()?;
        debug!(trade_id = %trade.trade_id, "execution recorded");
        Ok(())
    }

    fn insert_position(tx: &rusqlite::Transaction<'_>, position: &Position) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO positions (id, market_id, trade_id, yes_shares, no_shares,
                                    cost_basis, status, opened_at, closed_at,
                                    settlement_proceeds, realized_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                position.position_id,
                position.market_id.as_str(),
                position.trade_id,
                position.yes_shares.to_string(),
                position.no_shares.to_string(),
                position.cost_basis.to_string(),
                position.status.to_string(),
                position.opened_at.to_rfc3339(),
                position.closed_at.map(|t| t.to_rfc3339()),
                position.settlement_proceeds.map(|d| d.to_string()),
                position.realized_pnl.map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn save_position(&self, position: &Position) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::insert_position(&tx, position)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_trade(&self, trade_id: &str) -> StoreResult<Option<Trade>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, market_id, strategy, side, yes_token_id, no_token_id,
                    yes_size, no_size, yes_price, no_price, total_cost, guaranteed_pnl,
                    status, execution_status, pre_fill_yes_depth, pre_fill_no_depth,
                    dry_run, created_at, updated_at
             FROM trades WHERE id = ?1",
            [trade_id],
            Self::row_to_trade,
        )
        .optional()?
        .transpose()
    }

    pub fn get_trades(&self, market_id: &ConditionId, limit: u32) -> StoreResult<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, market_id, strategy, side, yes_token_id, no_token_id,
                    yes_size, no_size, yes_price, no_price, total_cost, guaranteed_pnl,
                    status, execution_status, pre_fill_yes_depth, pre_fill_no_depth,
                    dry_run, created_at, updated_at
             FROM trades WHERE market_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![market_id.as_str(), limit], Self::row_to_trade)?;
        rows.map(|r| r?).collect()
    }

    fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<StoreResult<Trade>> {
        let yes_size: String = row.get(6)?;
        let no_size: String = row.get(7)?;
        let yes_price: String = row.get(8)?;
        let no_price: String = row.get(9)?;
        let total_cost: String = row.get(10)?;
        let guaranteed_pnl: String = row.get(11)?;
        let execution_status: String = row.get(13)?;
        let pre_yes: String = row.get(14)?;
        let pre_no: String = row.get(15)?;
        let created_at: String = row.get(17)?;
        let updated_at: String = row.get(18)?;
        let market_id: String = row.get(1)?;
        let yes_token: String = row.get(4)?;
        let no_token: String = row.get(5)?;

        Ok((|| {
            Ok(Trade {
                trade_id: row.get(0)?,
                market_id: ConditionId::new(market_id),
                strategy: row.get(2)?,
                side: row.get(3)?,
                yes_token_id: TokenId::new(yes_token),
                no_token_id: TokenId::new(no_token),
                yes_size: Size::new(parse_decimal(yes_size, "yes_size")?),
                no_size: Size::new(parse_decimal(no_size, "no_size")?),
                yes_price: parse_decimal(yes_price, "yes_price")?,
                no_price: parse_decimal(no_price, "no_price")?,
                total_cost: parse_decimal(total_cost, "total_cost")?,
                guaranteed_pnl: parse_decimal(guaranteed_pnl, "guaranteed_pnl")?,
                status: row.get(12)?,
                execution_status: execution_status
                    .parse()
                    .map_err(StoreError::CorruptRow)?,
                pre_fill_yes_depth: Size::new(parse_decimal(pre_yes, "pre_fill_yes_depth")?),
                pre_fill_no_depth: Size::new(parse_decimal(pre_no, "pre_fill_no_depth")?),
                dry_run: row.get::<_, i64>(16)? != 0,
                created_at: parse_datetime(created_at, "created_at")?,
                updated_at: parse_datetime(updated_at, "updated_at")?,
            })
        })())
    }

    fn row_to_position(row: &Row<'_>) -> rusqlite::Result<StoreResult<Position>> {
        let market_id: String = row.get(1)?;
        let yes_shares: String = row.get(3)?;
        let no_shares: String = row.get(4)?;
        let cost_basis: String = row.get(5)?;
        let status: String = row.get(6)?;
        let opened_at: String = row.get(7)?;
        let closed_at: Option<String> = row.get(8)?;
        let proceeds: Option<String> = row.get(9)?;
        let realized: Option<String> = row.get(10)?;

        Ok((|| {
            let status = match status.as_str() {
                "OPEN" => PositionStatus::Open,
                "CLAIMED" => PositionStatus::Claimed,
                "SETTLED" => PositionStatus::Settled,
                "ABANDONED" => PositionStatus::Abandoned,
                other => return Err(StoreError::CorruptRow(format!("status: {other}"))),
            };
            Ok(Position {
                position_id: row.get(0)?,
                market_id: ConditionId::new(market_id),
                trade_id: row.get(2)?,
                yes_shares: Size::new(parse_decimal(yes_shares, "yes_shares")?),
                no_shares: Size::new(parse_decimal(no_shares, "no_shares")?),
                cost_basis: parse_decimal(cost_basis, "cost_basis")?,
                status,
                opened_at: parse_datetime(opened_at, "opened_at")?,
                closed_at: parse_opt_datetime(closed_at, "closed_at")?,
                settlement_proceeds: parse_opt_decimal(proceeds, "settlement_proceeds")?,
                realized_pnl: parse_opt_decimal(realized, "realized_pnl")?,
            })
        })())
    }

    const POSITION_COLUMNS: &'static str = "id, market_id, trade_id, yes_shares, no_shares, \
         cost_basis, status, opened_at, closed_at, settlement_proceeds, realized_pnl";

    pub fn get_position(&self, position_id: &str) -> StoreResult<Option<Position>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM positions WHERE id = ?1",
                Self::POSITION_COLUMNS
            ),
            [position_id],
            Self::row_to_position,
        )
        .optional()?
        .transpose()
    }

    pub fn get_open_positions(&self) -> StoreResult<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM positions WHERE status = 'OPEN' ORDER BY opened_at",
            Self::POSITION_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_position)?;
        rows.map(|r| r?).collect()
    }

    pub fn open_positions_count(&self) -> StoreResult<u32> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM positions WHERE status = 'OPEN'",
            [],
            |r| r.get(0),
        )?)
    }

    /// Close a position after a successful claim, crediting the daily
    /// aggregates in the same transaction.
    pub fn mark_position_claimed(
        &self,
        position_id: &str,
        proceeds: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE positions SET status = 'CLAIMED', closed_at = ?2,
                    settlement_proceeds = ?3, realized_pnl = ?4
             WHERE id = ?1",
            params![
                position_id,
                closed_at.to_rfc3339(),
                proceeds.to_string(),
                realized_pnl.to_string(),
            ],
        )?;
        Self::upsert_daily_stats(
            &tx,
            closed_at.date_naive(),
            0,
            Decimal::ZERO,
            realized_pnl,
            0,
            1,
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn mark_position_abandoned(&self, position_id: &str, closed_at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE positions SET status = 'ABANDONED', closed_at = ?2 WHERE id = ?1",
            params![position_id, closed_at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settlement queue
    // ------------------------------------------------------------------

    fn enqueue_settlement(
        tx: &rusqlite::Transaction<'_>,
        position_id: &str,
        market_id: &ConditionId,
        condition_id: &ConditionId,
    ) -> StoreResult<()> {
        tx.execute(
            "INSERT OR IGNORE INTO settlement_queue
                 (position_id, market_id, condition_id, queued_at, attempts, status)
             VALUES (?1, ?2, ?3, ?4, 0, 'PENDING')",
            params![
                position_id,
                market_id.as_str(),
                condition_id.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Idempotent on position id: re-queuing an already queued position
    /// is a no-op.
    pub fn queue_for_settlement(
        &self,
        position_id: &str,
        market_id: &ConditionId,
        condition_id: &ConditionId,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::enqueue_settlement(&tx, position_id, market_id, condition_id)?;
        tx.commit()?;
        Ok(())
    }

    /// PENDING entries due for a claim attempt: retry time reached and
    /// attempt budget not exhausted.
    pub fn get_claimable_positions(
        &self,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ClaimableEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT q.id, q.condition_id, q.attempts, {}
             FROM settlement_queue q JOIN positions p ON p.id = q.position_id
             WHERE q.status = 'PENDING'
               AND q.attempts < ?1
               AND (q.next_retry_at IS NULL OR q.next_retry_at <= ?2)
             ORDER BY q.queued_at",
            // Position columns aliased under p.
            Self::POSITION_COLUMNS
                .split(", ")
                .map(|c| format!("p.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rows = stmt.query_map(params![max_attempts, now.to_rfc3339()], |row| {
            let queue_id: i64 = row.get(0)?;
            let condition_id: String = row.get(1)?;
            let attempts: u32 = row.get(2)?;
            // Shift the position columns by 3.
            let position = position_from_offset(row, 3)?;
            Ok((queue_id, condition_id, attempts, position))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (queue_id, condition_id, attempts, position) = row?;
            entries.push(ClaimableEntry {
                queue_id,
                condition_id: ConditionId::new(condition_id),
                attempts,
                position: position?,
            });
        }
        Ok(entries)
    }

    /// Record the outcome of a claim attempt.
    pub fn mark_settlement_attempt(
        &self,
        queue_id: i64,
        status: SettlementStatus,
        error: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE settlement_queue
             SET attempts = attempts + 1,
                 last_attempt_at = ?2,
                 status = ?3,
                 error = ?4,
                 next_retry_at = ?5
             WHERE id = ?1",
            params![
                queue_id,
                Utc::now().to_rfc3339(),
                status.to_string(),
                error,
                next_retry_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn settlement_queue_attempts(&self, queue_id: i64) -> StoreResult<u32> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT attempts FROM settlement_queue WHERE id = ?1",
            [queue_id],
            |r| r.get(0),
        )?)
    }

    // ------------------------------------------------------------------
    // Realized P&L ledger
    // ------------------------------------------------------------------

    /// Append a ledger row. Returns false (and writes nothing) when the
    /// `(trade_id, pnl_type)` key already exists.
    pub fn insert_realized_pnl(&self, entry: &RealizedPnlEntry) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO realized_pnl_ledger
                 (trade_id, trade_date, pnl_amount, pnl_type, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.trade_id,
                entry.trade_date.to_string(),
                entry.pnl_amount.to_string(),
                entry.pnl_type.to_string(),
                entry.notes,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn realized_pnl_for(&self, trade_id: &str, pnl_type: PnlType) -> StoreResult<Option<Decimal>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT pnl_amount FROM realized_pnl_ledger WHERE trade_id = ?1 AND pnl_type = ?2",
                params![trade_id, pnl_type.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        parse_opt_decimal(raw, "pnl_amount")
    }

    // ------------------------------------------------------------------
    // Daily stats
    // ------------------------------------------------------------------

    /// Money columns are fixed-point strings, so the additions happen in
    /// `Decimal` here rather than in SQL (SQLite would coerce to REAL).
    fn upsert_daily_stats(
        tx: &rusqlite::Transaction<'_>,
        date: NaiveDate,
        trades_delta: u32,
        volume_delta: Decimal,
        pnl_delta: Decimal,
        opened_delta: u32,
        closed_delta: u32,
    ) -> StoreResult<()> {
        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT total_volume, realized_pnl FROM daily_stats WHERE date = ?1",
                [date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                tx.execute(
                    "INSERT INTO daily_stats (date, total_trades, total_volume, realized_pnl,
                                              unrealized_pnl, positions_opened, positions_closed)
                     VALUES (?1, ?2, ?3, ?4, '0', ?5, ?6)",
                    params![
                        date.to_string(),
                        trades_delta,
                        volume_delta.to_string(),
                        pnl_delta.to_string(),
                        opened_delta,
                        closed_delta,
                    ],
                )?;
            }
            Some((volume, pnl)) => {
                let total_volume = parse_decimal(volume, "total_volume")? + volume_delta;
                let realized_pnl = parse_decimal(pnl, "realized_pnl")? + pnl_delta;
                tx.execute(
                    "UPDATE daily_stats SET
                         total_trades = total_trades + ?2,
                         total_volume = ?3,
                         realized_pnl = ?4,
                         positions_opened = positions_opened + ?5,
                         positions_closed = positions_closed + ?6
                     WHERE date = ?1",
                    params![
                        date.to_string(),
                        trades_delta,
                        total_volume.to_string(),
                        realized_pnl.to_string(),
                        opened_delta,
                        closed_delta,
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub fn get_daily_stats(&self, date: NaiveDate) -> StoreResult<DailyStats> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT date, total_trades, total_volume, realized_pnl, unrealized_pnl,
                        positions_opened, positions_closed
                 FROM daily_stats WHERE date = ?1",
                [date.to_string()],
                |row| {
                    let total_volume: String = row.get(2)?;
                    let realized_pnl: String = row.get(3)?;
                    let unrealized_pnl: String = row.get(4)?;
                    Ok((
                        row.get::<_, u32>(1)?,
                        total_volume,
                        realized_pnl,
                        unrealized_pnl,
                        row.get::<_, u32>(5)?,
                        row.get::<_, u32>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(DailyStats::empty(date)),
            Some((trades, volume, realized, unrealized, opened, closed)) => Ok(DailyStats {
                date,
                total_trades: trades,
                total_volume: parse_decimal(volume, "total_volume")?,
                realized_pnl: parse_decimal(realized, "realized_pnl")?,
                unrealized_pnl: parse_decimal(unrealized, "unrealized_pnl")?,
                positions_opened: opened,
                positions_closed: closed,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Circuit breaker persistence
    // ------------------------------------------------------------------

    pub fn save_circuit_breaker(&self, row: &CircuitBreakerRow) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO circuit_breaker_state
                 (id, date, realized_pnl, circuit_breaker_hit, hit_at, hit_reason,
                  total_trades_today, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 date = ?1, realized_pnl = ?2, circuit_breaker_hit = ?3,
                 hit_at = ?4, hit_reason = ?5, total_trades_today = ?6, updated_at = ?7",
            params![
                row.date.to_string(),
                row.realized_pnl.to_string(),
                row.circuit_breaker_hit as i64,
                row.hit_at.map(|t| t.to_rfc3339()),
                row.hit_reason,
                row.total_trades_today,
                row.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_circuit_breaker(&self) -> StoreResult<Option<CircuitBreakerRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT date, realized_pnl, circuit_breaker_hit, hit_at, hit_reason,
                        total_trades_today, updated_at
                 FROM circuit_breaker_state WHERE id = 1",
                [],
                |row| {
                    let date: String = row.get(0)?;
                    let realized: String = row.get(1)?;
                    let hit: i64 = row.get(2)?;
                    let hit_at: Option<String> = row.get(3)?;
                    let hit_reason: Option<String> = row.get(4)?;
                    let trades: u32 = row.get(5)?;
                    let updated_at: String = row.get(6)?;
                    Ok((date, realized, hit, hit_at, hit_reason, trades, updated_at))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((date, realized, hit, hit_at, hit_reason, trades, updated_at)) => {
                Ok(Some(CircuitBreakerRow {
                    date: date
                        .parse()
                        .map_err(|_| StoreError::CorruptRow(format!("date: {date}")))?,
                    realized_pnl: parse_decimal(realized, "realized_pnl")?,
                    circuit_breaker_hit: hit != 0,
                    hit_at: parse_opt_datetime(hit_at, "hit_at")?,
                    hit_reason,
                    total_trades_today: trades,
                    updated_at: parse_datetime(updated_at, "updated_at")?,
                }))
            }
        }
    }
}

/// Read a position whose columns start at `offset` in the row.
fn position_from_offset(row: &Row<'_>, offset: usize) -> rusqlite::Result<StoreResult<Position>> {
    let position_id: String = row.get(offset)?;
    let market_id: String = row.get(offset + 1)?;
    let trade_id: String = row.get(offset + 2)?;
    let yes_shares: String = row.get(offset + 3)?;
    let no_shares: String = row.get(offset + 4)?;
    let cost_basis: String = row.get(offset + 5)?;
    let status: String = row.get(offset + 6)?;
    let opened_at: String = row.get(offset + 7)?;
    let closed_at: Option<String> = row.get(offset + 8)?;
    let proceeds: Option<String> = row.get(offset + 9)?;
    let realized: Option<String> = row.get(offset + 10)?;

    Ok((|| {
        let status = match status.as_str() {
            "OPEN" => PositionStatus::Open,
            "CLAIMED" => PositionStatus::Claimed,
            "SETTLED" => PositionStatus::Settled,
            "ABANDONED" => PositionStatus::Abandoned,
            other => return Err(StoreError::CorruptRow(format!("status: {other}"))),
        };
        Ok(Position {
            position_id,
            market_id: ConditionId::new(market_id),
            trade_id,
            yes_shares: Size::new(parse_decimal(yes_shares, "yes_shares")?),
            no_shares: Size::new(parse_decimal(no_shares, "no_shares")?),
            cost_basis: parse_decimal(cost_basis, "cost_basis")?,
            status,
            opened_at: parse_datetime(opened_at, "opened_at")?,
            closed_at: parse_opt_datetime(closed_at, "closed_at")?,
            settlement_proceeds: parse_opt_decimal(proceeds, "settlement_proceeds")?,
            realized_pnl: parse_opt_decimal(realized, "realized_pnl")?,
        })
    })())
}
