// database - SQLite storage: tokens, pairs (latest), snapshots (history),
// dump watchlist, strategy tables, app status. Only DB logic lives here;
// no API knowledge.

pub mod dump_watchlist;
pub mod schema;
pub mod store;
pub mod strategy;

use anyhow::{ Context, Result };
use rusqlite::Connection;
use std::sync::Mutex;

/// Main database wrapper. All access goes through one connection; callers
/// serialize via the inner mutex.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and provision the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests and the `check` smoke chain.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// Unit of the snapshot_ts column as currently stored.
    pub(crate) fn snapshot_unit_is_ms(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        snapshot_ts_is_ms(&conn)
    }

    /// Create tables and indexes if missing. Never drops anything.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(schema::SCHEMA_TOKENS).context("tokens schema")?;
        conn.execute_batch(schema::SCHEMA_PAIRS).context("pairs schema")?;
        conn.execute_batch(schema::SCHEMA_SNAPSHOTS).context("snapshots schema")?;
        conn.execute_batch(schema::IDX_CORE).context("core indexes")?;
        conn.execute_batch(schema::SCHEMA_DUMP_WATCHLIST).context("dump_watchlist schema")?;
        conn.execute_batch(schema::SCHEMA_STRATEGY).context("strategy schema")?;
        conn.execute_batch(schema::SCHEMA_APP_STATUS).context("app_status schema")?;
        Ok(())
    }
}

/// True if snapshot_ts holds milliseconds (MAX > 10^12). An empty table
/// reads as milliseconds, the unit this collector writes.
pub(crate) fn snapshot_ts_is_ms(conn: &Connection) -> Result<bool> {
    let max: Option<i64> = conn.query_row("SELECT MAX(snapshot_ts) FROM snapshots", [], |r| {
        r.get(0)
    })?;
    Ok(match max {
        Some(mx) => mx > 1_000_000_000_000,
        None => true,
    })
}

/// Convert a millisecond timestamp to the unit snapshot_ts uses.
/// pair_created_at_ms and signal timestamps are always written in ms.
pub(crate) fn normalize_since_ts(ts_ms: i64, snapshot_ts_is_ms: bool) -> i64 {
    if snapshot_ts_is_ms {
        ts_ms
    } else {
        ts_ms / 1000
    }
}

/// PRAGMA-based column probe so reads degrade gracefully on older or
/// externally extended schemas.
pub(crate) fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}
