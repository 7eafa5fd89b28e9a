//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Checkout code calls store methods; it never executes SQL directly.
//! Multi-statement writes go through `atomically`, which commits
//! everything or nothing.

use crate::{
    error::ShopResult,
    event::{EventLogEntry, ShopEvent},
    types::Timestamp,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, types::Type, Connection, Row};
use std::str::FromStr;

mod catalog;
mod fraud;
mod order;

pub use fraud::{DashboardCounts, ExportRow};

pub struct ShopStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ShopStore {
    pub fn open(path: &str) -> ShopResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ShopResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> ShopResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ShopResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_catalog.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_orders.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_fraud_detection.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_event_log.sql"))?;
        Ok(())
    }

    /// Run `f` inside one SQLite transaction. Any error rolls back every
    /// write `f` made. Calls must not nest.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> ShopResult<T>) -> ShopResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &ShopEvent, at: Timestamp) -> ShopResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (event_type, payload, created_at) VALUES (?1, ?2, ?3)",
            params![event.type_name(), serde_json::to_string(event)?, at.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn events_of_type(&self, event_type: &str) -> ShopResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, payload, created_at
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    event_type: row.get(1)?,
                    payload: row.get(2)?,
                    created_at: ts_col(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self) -> ShopResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
        Ok(n)
    }
}

// ── Column codecs ──────────────────────────────────────────────
// Money is stored as decimal text, time as UTC epoch milliseconds.

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let millis: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(millis) => DateTime::<Utc>::from_timestamp_millis(millis)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis)),
        None => Ok(None),
    }
}

pub(crate) fn dec_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
