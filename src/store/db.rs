//! SQLite-backed store.
//!
//! Key properties:
//! - WAL mode so long dashboard scans never block worker writes
//! - Prepared statement caching on every hot path
//! - Multi-row writes (prices fan-out, reset-all) run in one transaction
//! - Additive column migrations at boot; unknown extra columns are ignored

use crate::{
    models::{
        ControlRecord, ControlState, Death, EquityPoint, Event, Heartbeat, Pet, PricesSnapshot,
        Tick, Trade, TradeSide,
    },
    store::Stream,
};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS control (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    state TEXT NOT NULL,
    pause_reason TEXT NOT NULL DEFAULT '',
    pause_until TEXT NOT NULL DEFAULT '',
    cryo_reason TEXT NOT NULL DEFAULT '',
    cryo_until TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS heartbeat (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    at TEXT NOT NULL,
    at_epoch INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT '',
    survival_mode TEXT NOT NULL DEFAULT 'NORMAL',
    equity_usd REAL NOT NULL DEFAULT 0,
    open_positions INTEGER NOT NULL DEFAULT 0,
    prices_ok INTEGER NOT NULL DEFAULT 0,
    markets TEXT NOT NULL DEFAULT '[]',
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    total_trades INTEGER NOT NULL DEFAULT 0,
    total_pnl_usd REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_heartbeat_at_epoch ON heartbeat(at_epoch);

CREATE TABLE IF NOT EXISTS pet (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    at TEXT NOT NULL,
    stage TEXT NOT NULL DEFAULT 'egg',
    mood TEXT NOT NULL DEFAULT 'focused',
    health REAL NOT NULL DEFAULT 100,
    hunger REAL NOT NULL DEFAULT 50,
    growth REAL NOT NULL DEFAULT 0,
    fainted_until TEXT NOT NULL DEFAULT '',
    sex TEXT NOT NULL DEFAULT '',
    survival_mode TEXT NOT NULL DEFAULT 'NORMAL'
);

CREATE TABLE IF NOT EXISTS prices_snapshot (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    at TEXT NOT NULL,
    prices TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS equity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    at_epoch INTEGER NOT NULL,
    equity_usd REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_equity_at_epoch ON equity(at_epoch);

CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    at_epoch INTEGER NOT NULL,
    market TEXT NOT NULL,
    price REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticks_market_at_epoch ON ticks(market, at_epoch);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    at_epoch INTEGER NOT NULL,
    market TEXT NOT NULL,
    side TEXT NOT NULL,
    size_usd REAL NOT NULL DEFAULT 0,
    price REAL NOT NULL DEFAULT 0,
    pnl_usd REAL NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    reason TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_trades_market_at_epoch ON trades(market, at_epoch);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    at_epoch INTEGER NOT NULL,
    type TEXT NOT NULL DEFAULT 'info',
    message TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_events_at_epoch ON events(at_epoch);

CREATE TABLE IF NOT EXISTS deaths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    at_epoch INTEGER NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    reason TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_deaths_at_epoch ON deaths(at_epoch);
"#;

/// Columns added after the original schema shipped. Re-applied at every
/// boot; already-present columns are skipped.
const MIGRATIONS: &[(&str, &str, &str)] = &[
    ("trades", "confidence", "REAL NOT NULL DEFAULT 0"),
    ("trades", "reason", "TEXT NOT NULL DEFAULT ''"),
    ("heartbeat", "total_pnl_usd", "REAL NOT NULL DEFAULT 0"),
    ("heartbeat", "survival_mode", "TEXT NOT NULL DEFAULT 'NORMAL'"),
    ("pet", "sex", "TEXT NOT NULL DEFAULT ''"),
    ("pet", "survival_mode", "TEXT NOT NULL DEFAULT 'NORMAL'"),
    ("events", "details", "TEXT NOT NULL DEFAULT '{}'"),
    ("deaths", "details", "TEXT NOT NULL DEFAULT '{}'"),
];

/// Process-wide persistent store. All access serializes through one
/// connection; the mutex is held only for the duration of a statement or
/// transaction, never across an await.
pub struct TelemetryStore {
    conn: Mutex<Connection>,
}

impl TelemetryStore {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create db directory {:?}", parent))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        for (table, column, decl) in MIGRATIONS {
            ensure_column(&conn, table, column, decl)?;
        }

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_control_row()?;

        info!("📦 Telemetry store initialized at: {}", db_path);
        Ok(store)
    }

    fn ensure_control_row(&self) -> Result<()> {
        let initial = ControlRecord::initial(Utc::now());
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO control
                 (id, state, pause_reason, pause_until, cryo_reason, cryo_until, updated_at, updated_at_ms)
             VALUES (1, ?1, '', '', '', '', ?2, ?3)",
            params![
                initial.state.as_str(),
                initial.updated_at,
                initial.updated_at_ms
            ],
        )
        .context("seed control row")?;
        Ok(())
    }

    // ---- control -------------------------------------------------------

    pub fn load_control(&self) -> Result<ControlRecord> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT state, pause_reason, pause_until, cryo_reason, cryo_until, updated_at, updated_at_ms
             FROM control WHERE id = 1",
        )?;
        let record = stmt
            .query_row([], |row| {
                let state: String = row.get(0)?;
                Ok(ControlRecord {
                    state: ControlState::parse(&state).unwrap_or(ControlState::Active),
                    pause_reason: row.get(1)?,
                    pause_until: row.get(2)?,
                    cryo_reason: row.get(3)?,
                    cryo_until: row.get(4)?,
                    updated_at: row.get(5)?,
                    updated_at_ms: row.get(6)?,
                })
            })
            .context("load control row")?;
        Ok(record)
    }

    pub fn save_control(&self, record: &ControlRecord) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO control
                 (id, state, pause_reason, pause_until, cryo_reason, cryo_until, updated_at, updated_at_ms)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 state = excluded.state,
                 pause_reason = excluded.pause_reason,
                 pause_until = excluded.pause_until,
                 cryo_reason = excluded.cryo_reason,
                 cryo_until = excluded.cryo_until,
                 updated_at = excluded.updated_at,
                 updated_at_ms = excluded.updated_at_ms",
        )?;
        stmt.execute(params![
            record.state.as_str(),
            record.pause_reason,
            record.pause_until,
            record.cryo_reason,
            record.cryo_until,
            record.updated_at,
            record.updated_at_ms,
        ])
        .context("save control row")?;
        Ok(())
    }

    // ---- singletons ----------------------------------------------------

    pub fn upsert_heartbeat(&self, hb: &Heartbeat, at_epoch: i64) -> Result<()> {
        let markets =
            serde_json::to_string(&hb.markets).context("serialize heartbeat markets")?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO heartbeat
                 (id, at, at_epoch, status, survival_mode, equity_usd, open_positions,
                  prices_ok, markets, wins, losses, total_trades, total_pnl_usd)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                 at = excluded.at,
                 at_epoch = excluded.at_epoch,
                 status = excluded.status,
                 survival_mode = excluded.survival_mode,
                 equity_usd = excluded.equity_usd,
                 open_positions = excluded.open_positions,
                 prices_ok = excluded.prices_ok,
                 markets = excluded.markets,
                 wins = excluded.wins,
                 losses = excluded.losses,
                 total_trades = excluded.total_trades,
                 total_pnl_usd = excluded.total_pnl_usd",
        )?;
        stmt.execute(params![
            hb.at,
            at_epoch,
            hb.status,
            hb.survival_mode,
            hb.equity_usd,
            hb.open_positions,
            hb.prices_ok as i64,
            markets,
            hb.wins,
            hb.losses,
            hb.total_trades,
            hb.total_pnl_usd,
        ])
        .context("upsert heartbeat")?;
        Ok(())
    }

    pub fn latest_heartbeat(&self) -> Result<Option<Heartbeat>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT at, status, survival_mode, equity_usd, open_positions, prices_ok,
                    markets, wins, losses, total_trades, total_pnl_usd
             FROM heartbeat WHERE id = 1",
        )?;
        let row = stmt
            .query_row([], |row| {
                let markets_json: String = row.get(6)?;
                Ok(Heartbeat {
                    at: row.get(0)?,
                    status: row.get(1)?,
                    survival_mode: row.get(2)?,
                    equity_usd: row.get(3)?,
                    open_positions: row.get(4)?,
                    prices_ok: row.get::<_, i64>(5)? != 0,
                    markets: serde_json::from_str(&markets_json).unwrap_or_default(),
                    wins: row.get(7)?,
                    losses: row.get(8)?,
                    total_trades: row.get(9)?,
                    total_pnl_usd: row.get(10)?,
                })
            })
            .map(Some)
            .or_else(ignore_no_rows)
            .context("load heartbeat")?;
        Ok(row)
    }

    pub fn upsert_pet(&self, pet: &Pet) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO pet
                 (id, at, stage, mood, health, hunger, growth, fainted_until, sex, survival_mode)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 at = excluded.at,
                 stage = excluded.stage,
                 mood = excluded.mood,
                 health = excluded.health,
                 hunger = excluded.hunger,
                 growth = excluded.growth,
                 fainted_until = excluded.fainted_until,
                 sex = excluded.sex,
                 survival_mode = excluded.survival_mode",
        )?;
        stmt.execute(params![
            pet.at,
            pet.stage,
            pet.mood,
            pet.health,
            pet.hunger,
            pet.growth,
            pet.fainted_until,
            pet.sex,
            pet.survival_mode,
        ])
        .context("upsert pet")?;
        Ok(())
    }

    pub fn latest_pet(&self) -> Result<Option<Pet>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT at, stage, mood, health, hunger, growth, fainted_until, sex, survival_mode
             FROM pet WHERE id = 1",
        )?;
        let row = stmt
            .query_row([], |row| {
                Ok(Pet {
                    at: row.get(0)?,
                    stage: row.get(1)?,
                    mood: row.get(2)?,
                    health: row.get(3)?,
                    hunger: row.get(4)?,
                    growth: row.get(5)?,
                    fainted_until: row.get(6)?,
                    sex: row.get(7)?,
                    survival_mode: row.get(8)?,
                })
            })
            .map(Some)
            .or_else(ignore_no_rows)
            .context("load pet")?;
        Ok(row)
    }

    pub fn latest_prices(&self) -> Result<Option<PricesSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT at, prices FROM prices_snapshot WHERE id = 1")?;
        let row = stmt
            .query_row([], |row| {
                let at: String = row.get(0)?;
                let prices_json: String = row.get(1)?;
                Ok((at, prices_json))
            })
            .map(Some)
            .or_else(ignore_no_rows)
            .context("load prices snapshot")?;

        Ok(row.map(|(at, prices_json)| PricesSnapshot {
            at,
            prices: serde_json::from_str(&prices_json).unwrap_or_default(),
        }))
    }

    // ---- appends -------------------------------------------------------

    pub fn append_equity(&self, at: &str, at_epoch: i64, equity_usd: f64) -> Result<i64> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO equity (at, at_epoch, equity_usd) VALUES (?1, ?2, ?3)",
        )?;
        stmt.execute(params![at, at_epoch, equity_usd])
            .context("append equity point")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn append_trade(&self, trade: &Trade, at_epoch: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO trades (at, at_epoch, market, side, size_usd, price, pnl_usd, confidence, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        stmt.execute(params![
            trade.at,
            at_epoch,
            trade.market,
            trade.side.as_str(),
            trade.size_usd,
            trade.price,
            trade.pnl_usd,
            trade.confidence,
            trade.reason,
        ])
        .context("append trade")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn append_event(
        &self,
        at: &str,
        at_epoch: i64,
        event_type: &str,
        message: &str,
        details: &serde_json::Value,
    ) -> Result<i64> {
        let details_text =
            serde_json::to_string(details).context("serialize event details")?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO events (at, at_epoch, type, message, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![at, at_epoch, event_type, message, details_text])
            .context("append event")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn append_death(
        &self,
        at: &str,
        at_epoch: i64,
        source: &str,
        reason: &str,
        details: &serde_json::Value,
    ) -> Result<i64> {
        let details_text =
            serde_json::to_string(details).context("serialize death details")?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO deaths (at, at_epoch, source, reason, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![at, at_epoch, source, reason, details_text])
            .context("append death")?;
        Ok(conn.last_insert_rowid())
    }

    /// Prices fan-out: one tick per market plus the snapshot upsert, all in
    /// a single transaction so the appends and the snapshot succeed or fail
    /// together.
    pub fn append_price_ticks(
        &self,
        at: &str,
        at_epoch: i64,
        entries: &BTreeMap<String, f64>,
    ) -> Result<usize> {
        let snapshot_json =
            serde_json::to_string(entries).context("serialize prices snapshot")?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin prices transaction")?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO ticks (at, at_epoch, market, price) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (market, price) in entries {
                insert
                    .execute(params![at, at_epoch, market, price])
                    .with_context(|| format!("append tick for {}", market))?;
            }
            let mut upsert = tx.prepare_cached(
                "INSERT INTO prices_snapshot (id, at, prices) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET at = excluded.at, prices = excluded.prices",
            )?;
            upsert
                .execute(params![at, snapshot_json])
                .context("upsert prices snapshot")?;
        }
        tx.commit().context("commit prices transaction")?;
        Ok(entries.len())
    }

    // ---- reads ---------------------------------------------------------

    /// Most recent `limit` equity points, oldest first.
    pub fn tail_equity(&self, limit: usize) -> Result<Vec<EquityPoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, equity_usd FROM equity ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows: Vec<EquityPoint> = stmt
            .query_map(params![limit as i64], |row| {
                Ok(EquityPoint {
                    id: Some(row.get(0)?),
                    at: row.get(1)?,
                    equity_usd: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()
            .context("read equity tail")?;
        rows.reverse();
        Ok(rows)
    }

    /// Most recent `limit` ticks across all markets, oldest first.
    pub fn tail_ticks(&self, limit: usize) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, at_epoch, market, price FROM ticks ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows: Vec<Tick> = stmt
            .query_map(params![limit as i64], map_tick)?
            .collect::<std::result::Result<_, _>>()
            .context("read ticks tail")?;
        rows.reverse();
        Ok(rows)
    }

    /// Up to `limit` most recent ticks for one market, oldest first.
    /// Served by the (market, at_epoch) index; feeds the OHLC aggregator.
    pub fn recent_ticks(&self, market: &str, limit: usize) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, at_epoch, market, price FROM ticks
             WHERE market = ?1 ORDER BY at_epoch DESC, id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<Tick> = stmt
            .query_map(params![market, limit as i64], map_tick)?
            .collect::<std::result::Result<_, _>>()
            .context("read market ticks")?;
        rows.reverse();
        Ok(rows)
    }

    /// Ticks for one market with `at_epoch` in `[lo, hi]`, ascending.
    pub fn ticks_in_range(
        &self,
        market: &str,
        lo: i64,
        hi: i64,
        limit: usize,
    ) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, at_epoch, market, price FROM ticks
             WHERE market = ?1 AND at_epoch >= ?2 AND at_epoch <= ?3
             ORDER BY at_epoch ASC, id ASC LIMIT ?4",
        )?;
        let rows: Vec<Tick> = stmt
            .query_map(params![market, lo, hi, limit as i64], map_tick)?
            .collect::<std::result::Result<_, _>>()
            .context("read tick range")?;
        Ok(rows)
    }

    /// Most recent `limit` trades, newest first.
    pub fn tail_trades(&self, limit: usize) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, market, side, size_usd, price, pnl_usd, confidence, reason
             FROM trades ORDER BY id DESC LIMIT ?1",
        )?;
        let rows: Vec<Trade> = stmt
            .query_map(params![limit as i64], |row| {
                let side: String = row.get(3)?;
                Ok(Trade {
                    id: Some(row.get(0)?),
                    at: row.get(1)?,
                    market: row.get(2)?,
                    side: TradeSide::parse(&side).unwrap_or(TradeSide::Buy),
                    size_usd: row.get(4)?,
                    price: row.get(5)?,
                    pnl_usd: row.get(6)?,
                    confidence: row.get(7)?,
                    reason: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()
            .context("read trades tail")?;
        Ok(rows)
    }

    /// Most recent `limit` events, newest first, `details` parsed.
    pub fn tail_events(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, type, message, details FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows: Vec<Event> = stmt
            .query_map(params![limit as i64], |row| {
                let details_text: String = row.get(4)?;
                Ok(Event {
                    id: Some(row.get(0)?),
                    at: row.get(1)?,
                    event_type: row.get(2)?,
                    message: row.get(3)?,
                    details: parse_details(&details_text),
                })
            })?
            .collect::<std::result::Result<_, _>>()
            .context("read events tail")?;
        Ok(rows)
    }

    /// Most recent `limit` deaths, newest first, `details` parsed.
    pub fn tail_deaths(&self, limit: usize) -> Result<Vec<Death>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, source, reason, details FROM deaths ORDER BY id DESC LIMIT ?1",
        )?;
        let rows: Vec<Death> = stmt
            .query_map(params![limit as i64], |row| {
                let details_text: String = row.get(4)?;
                Ok(Death {
                    id: Some(row.get(0)?),
                    at: row.get(1)?,
                    source: row.get(2)?,
                    reason: row.get(3)?,
                    details: parse_details(&details_text),
                })
            })?
            .collect::<std::result::Result<_, _>>()
            .context("read deaths tail")?;
        Ok(rows)
    }

    pub fn count_trades(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))
            .context("count trades")?;
        Ok(count)
    }

    // ---- truncation ----------------------------------------------------

    pub fn truncate(&self, stream: Stream) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {}", stream.table()), [])
            .with_context(|| format!("truncate {}", stream.table()))?;
        Ok(())
    }

    /// Reset everything except control: all five streams plus the
    /// heartbeat/pet/prices singletons, in one transaction.
    pub fn truncate_all(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin reset-all transaction")?;
        for stream in Stream::ALL {
            tx.execute(&format!("DELETE FROM {}", stream.table()), [])
                .with_context(|| format!("truncate {}", stream.table()))?;
        }
        tx.execute("DELETE FROM heartbeat", [])?;
        tx.execute("DELETE FROM pet", [])?;
        tx.execute("DELETE FROM prices_snapshot", [])?;
        tx.commit().context("commit reset-all transaction")?;
        Ok(())
    }
}

fn map_tick(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tick> {
    Ok(Tick {
        id: Some(row.get(0)?),
        at: row.get(1)?,
        at_epoch: row.get(2)?,
        market: row.get(3)?,
        price: row.get(4)?,
    })
}

/// Stored details are JSON text; rows written before the column existed or
/// by older workers may hold bare strings.
fn parse_details(text: &str) -> serde_json::Value {
    if text.is_empty() {
        return serde_json::Value::Object(Default::default());
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> rusqlite::Result<Option<T>> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

/// Additive migration: add `column` to `table` if an older database file
/// predates it.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;

    if !existing.iter().any(|c| c == column) {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
            [],
        )
        .with_context(|| format!("add column {}.{}", table, column))?;
        info!("🧱 Schema migration: added {}.{}", table, column);
    }
    Ok(())
}
