use crate::errors::{DeskError, DeskResult};
use crate::payoff::{ContractQuote, ContractType, QuoteExtras};
use crate::state::{DbCommand, Session};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

pub fn init_db(data_dir: &Path) -> DeskResult<DbPool> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("payoff_desk.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
    apply_schema(&conn)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
pub fn init_memory_db() -> DeskResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    apply_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn apply_schema(conn: &Connection) -> DeskResult<()> {
    let schema = include_str!("../migrations/001_init.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

/// Dedicated DB writer task. The only task that writes; REST reads lock
/// the pool directly.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn execute_command(db: &DbPool, cmd: DbCommand) -> DeskResult<()> {
    match cmd {
        DbCommand::ArchiveChain(session) => {
            let id = archive_session(db, &session)?;
            tracing::debug!(snapshot_id = id, ticker = %session.ticker, "chain archived");
        }
    }
    Ok(())
}

/// Writes a session's chain in one transaction. Returns the snapshot id.
pub fn archive_session(db: &DbPool, session: &Session) -> DeskResult<i64> {
    let mut conn = db.lock().map_err(|e| DeskError::Database(format!("lock poisoned: {e}")))?;
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO chain_snapshots (session_id, ticker, expiration, last_price, source, captured_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            session.id,
            session.ticker,
            session.expiration.map(|d| d.to_string()),
            session.last_price,
            session.source.as_str(),
            session.loaded_at.to_rfc3339(),
        ],
    )?;
    let snapshot_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO chain_quotes (snapshot_id, row_index, contract_type, strike, bid, ask, contract_symbol, expiration, last_price, volume, open_interest, implied_volatility)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for (i, q) in session.quotes.iter().enumerate() {
            stmt.execute(rusqlite::params![
                snapshot_id,
                i as i64,
                q.contract_type.map(|t| t.as_str()),
                q.strike,
                q.bid,
                q.ask,
                q.extras.contract_symbol,
                q.extras.expiration.map(|d| d.to_string()),
                q.extras.last_price,
                q.extras.volume.map(|v| v as i64),
                q.extras.open_interest.map(|v| v as i64),
                q.extras.implied_volatility,
            ])?;
        }
    }

    tx.commit()?;
    Ok(snapshot_id)
}

// ── Query helpers (cold path, lock the pool) ──

const SNAPSHOT_COLUMNS: &str = "s.id, s.session_id, s.ticker, s.expiration, s.last_price, s.source, s.captured_at,
     (SELECT COUNT(*) FROM chain_quotes q WHERE q.snapshot_id = s.id)";

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        ticker: row.get(2)?,
        expiration: row.get(3)?,
        last_price: row.get(4)?,
        source: row.get(5)?,
        captured_at: row.get(6)?,
        contracts: row.get(7)?,
    })
}

pub fn list_snapshots(db: &DbPool, ticker: Option<&str>, limit: usize) -> DeskResult<Vec<SnapshotRow>> {
    let conn = db.lock().map_err(|e| DeskError::Database(format!("lock: {e}")))?;
    let (sql, params): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match ticker {
        Some(t) => (
            format!("SELECT {SNAPSHOT_COLUMNS} FROM chain_snapshots s WHERE s.ticker = ?1 ORDER BY s.id DESC LIMIT ?2"),
            vec![Box::new(t.to_string()), Box::new(limit as i64)],
        ),
        None => (
            format!("SELECT {SNAPSHOT_COLUMNS} FROM chain_snapshots s ORDER BY s.id DESC LIMIT ?1"),
            vec![Box::new(limit as i64)],
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), snapshot_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Snapshot header plus its contracts, or None for an unknown id.
pub fn load_snapshot(db: &DbPool, id: i64) -> DeskResult<Option<(SnapshotRow, Vec<ContractQuote>)>> {
    let conn = db.lock().map_err(|e| DeskError::Database(format!("lock: {e}")))?;
    let header = conn
        .query_row(
            &format!("SELECT {SNAPSHOT_COLUMNS} FROM chain_snapshots s WHERE s.id = ?1"),
            rusqlite::params![id],
            snapshot_from_row,
        )
        .optional()?;
    let Some(header) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT contract_type, strike, bid, ask, contract_symbol, expiration, last_price, volume, open_interest, implied_volatility
         FROM chain_quotes WHERE snapshot_id = ?1 ORDER BY row_index",
    )?;
    let rows = stmt.query_map(rusqlite::params![id], |row| {
        let contract_type: Option<String> = row.get(0)?;
        let expiration: Option<String> = row.get(5)?;
        let volume: Option<i64> = row.get(7)?;
        let open_interest: Option<i64> = row.get(8)?;
        Ok(ContractQuote {
            contract_type: contract_type.as_deref().and_then(ContractType::parse),
            strike: row.get(1)?,
            bid: row.get(2)?,
            ask: row.get(3)?,
            extras: QuoteExtras {
                contract_symbol: row.get(4)?,
                expiration: expiration.as_deref().and_then(parse_date),
                last_price: row.get(6)?,
                volume: volume.map(|v| v.max(0) as u64),
                open_interest: open_interest.map(|v| v.max(0) as u64),
                implied_volatility: row.get(9)?,
            },
        })
    })?;
    let quotes = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some((header, quotes)))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub session_id: String,
    pub ticker: String,
    pub expiration: Option<String>,
    pub last_price: Option<f64>,
    pub source: String,
    pub captured_at: String,
    pub contracts: i64,
}

impl SnapshotRow {
    pub fn expiration_date(&self) -> Option<NaiveDate> {
        self.expiration.as_deref().and_then(parse_date)
    }
}
