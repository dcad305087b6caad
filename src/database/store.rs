// store.rs - Row-level operations for tokens, pairs and the snapshot history,
// plus pruning, invariant checks and the read projections the analytics
// layers run on.

use anyhow::{ Context, Result };
use rusqlite::types::{ Value as SqlValue, ValueRef };
use rusqlite::{ params, Connection, OptionalExtension, ToSql, TransactionBehavior };
use serde::Serialize;
use serde_json::{ Map, Value };
use std::collections::HashSet;

use super::{ dump_watchlist, normalize_since_ts, schema, snapshot_ts_is_ms, table_has_column, Database };
use crate::config;
use crate::models::{ PairSnapshot, TokenInfo };

/// ATH candidate and the latest observation for the same pair.
#[derive(Debug, Clone, Serialize)]
pub struct AthPoint {
    pub ath_price: f64,
    pub ath_ts: i64,
    pub current_price: f64,
    pub current_ts: i64,
}

/// Activity measured in a window of snapshots. Sums are absent when the
/// schema lacks the corresponding columns.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityWindow {
    pub snapshots_count: i64,
    pub txns_sum: Option<i64>,
    pub buys_sum: Option<i64>,
    pub sells_sum: Option<i64>,
    pub volume_sum: Option<f64>,
}

/// Market fields of one pairs-table row, as the strategy screener reads them.
#[derive(Debug, Clone)]
pub struct PairMarket {
    pub pair_address: String,
    pub url: String,
    pub pair_created_at_ms: Option<i64>,
    pub liquidity_usd: Option<f64>,
    pub volume_h24: Option<f64>,
    pub txns_h24_buys: Option<i64>,
    pub txns_h24_sells: Option<i64>,
}

fn pair_row_params<'a>(s: &'a PairSnapshot) -> [&'a dyn ToSql; 35] {
    [
        &s.pair_address,
        &s.chain_id,
        &s.dex_id,
        &s.url,
        &s.base_token.address,
        &s.base_token.symbol,
        &s.base_token.name,
        &s.quote_token.address,
        &s.quote_token.symbol,
        &s.quote_token.name,
        &s.price_usd,
        &s.price_native,
        &s.liquidity_usd,
        &s.liquidity_base,
        &s.liquidity_quote,
        &s.volume_m5,
        &s.volume_h1,
        &s.volume_h6,
        &s.volume_h24,
        &s.price_change_m5,
        &s.price_change_h1,
        &s.price_change_h6,
        &s.price_change_h24,
        &s.txns_m5_buys,
        &s.txns_m5_sells,
        &s.txns_h1_buys,
        &s.txns_h1_sells,
        &s.txns_h6_buys,
        &s.txns_h6_sells,
        &s.txns_h24_buys,
        &s.txns_h24_sells,
        &s.fdv,
        &s.market_cap,
        &s.pair_created_at_ms,
        &s.snapshot_ts,
    ]
}

pub(crate) fn value_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) =>
            serde_json::Number
                ::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).to_string()),
    }
}

/// Run a SELECT and return each row as a column-name -> JSON value map.
pub(crate) fn query_json_rows(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>
) -> Result<Vec<Map<String, Value>>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), value_to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

pub(crate) fn upsert_token_conn(conn: &Connection, token: &TokenInfo) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tokens (address, chain_id, symbol, name) VALUES (?1, ?2, ?3, ?4)",
        params![token.address, config::CHAIN_SOLANA, token.symbol, token.name]
    )?;
    Ok(())
}

pub(crate) fn upsert_pair_conn(conn: &Connection, snapshot: &PairSnapshot) -> Result<()> {
    let sql = schema::pair_row_insert_sql("INSERT OR REPLACE", "pairs");
    conn.execute(&sql, &pair_row_params(snapshot)[..])?;
    Ok(())
}

pub(crate) fn insert_snapshot_conn(conn: &Connection, snapshot: &PairSnapshot) -> Result<()> {
    let sql = schema::pair_row_insert_sql("INSERT", "snapshots");
    conn.execute(&sql, &pair_row_params(snapshot)[..])?;
    Ok(())
}

impl Database {
    /// Insert or replace a token by address.
    pub fn upsert_token(&self, token: &TokenInfo) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_token_conn(&conn, token)
    }

    /// Insert or replace the latest pair state by pair_address.
    pub fn upsert_pair(&self, snapshot: &PairSnapshot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_pair_conn(&conn, snapshot)
    }

    /// Append one snapshot row. Snapshots are never mutated afterwards.
    pub fn insert_snapshot(&self, snapshot: &PairSnapshot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_snapshot_conn(&conn, snapshot)
    }

    /// One logical persist step: both tokens, the pair, the snapshot and the
    /// dump-watchlist update, committed in a single transaction.
    pub fn persist_snapshot(&self, snapshot: &PairSnapshot, now_ms: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        upsert_token_conn(&tx, &snapshot.base_token)?;
        upsert_token_conn(&tx, &snapshot.quote_token)?;
        upsert_pair_conn(&tx, snapshot)?;
        insert_snapshot_conn(&tx, snapshot)?;
        dump_watchlist::update_for_snapshot_conn(&tx, &snapshot.pair_address, now_ms)?;
        tx.commit().context("persist snapshot commit")?;
        Ok(())
    }

    /// Snapshot rows as JSON maps, ascending by snapshot_ts. Bounds are in
    /// milliseconds and normalized to the detected snapshot_ts unit.
    pub fn iterate_snapshots(
        &self,
        pair_address: Option<&str>,
        since_ms: Option<i64>,
        until_ms: Option<i64>
    ) -> Result<Vec<Map<String, Value>>> {
        let conn = self.conn.lock().unwrap();
        let is_ms = snapshot_ts_is_ms(&conn)?;
        let mut sql = String::from("SELECT * FROM snapshots WHERE 1=1");
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(p) = pair_address {
            sql.push_str(" AND pair_address = ?");
            params.push(SqlValue::from(p.to_string()));
        }
        if let Some(since) = since_ms {
            sql.push_str(" AND snapshot_ts >= ?");
            params.push(SqlValue::from(normalize_since_ts(since, is_ms)));
        }
        if let Some(until) = until_ms {
            sql.push_str(" AND snapshot_ts <= ?");
            params.push(SqlValue::from(normalize_since_ts(until, is_ms)));
        }
        sql.push_str(" ORDER BY snapshot_ts ASC");
        query_json_rows(&conn, &sql, params)
    }

    /// All pairs as JSON maps.
    pub fn iterate_pairs(&self) -> Result<Vec<Map<String, Value>>> {
        let conn = self.conn.lock().unwrap();
        query_json_rows(&conn, "SELECT * FROM pairs", Vec::new())
    }

    /// All tokens as JSON maps.
    pub fn iterate_tokens(&self) -> Result<Vec<Map<String, Value>>> {
        let conn = self.conn.lock().unwrap();
        query_json_rows(&conn, "SELECT * FROM tokens", Vec::new())
    }

    /// Market fields of every pair, for the strategy screener scan.
    pub fn iterate_pair_markets(&self) -> Result<Vec<PairMarket>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pair_address, url, pair_created_at_ms, liquidity_usd, volume_h24,
                    txns_h24_buys, txns_h24_sells
             FROM pairs"
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PairMarket {
                pair_address: row.get(0)?,
                url: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                pair_created_at_ms: row.get(2)?,
                liquidity_usd: row.get(3)?,
                volume_h24: row.get(4)?,
                txns_h24_buys: row.get(5)?,
                txns_h24_sells: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The full set of pair_address values, used for deduplication.
    pub fn get_known_pair_addresses(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT pair_address FROM pairs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    /// Number of snapshots for a pair (bootstrap gate input).
    pub fn get_snapshot_count(&self, pair_address: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE pair_address = ?1",
            params![pair_address],
            |r| r.get(0)
        )?;
        Ok(count)
    }

    /// Latest price: last snapshot if any, else the pairs row, else None.
    pub fn fetch_latest_price(&self, pair_address: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let from_snapshots: Option<f64> = conn
            .query_row(
                "SELECT price_usd FROM snapshots
                 WHERE pair_address = ?1 AND price_usd IS NOT NULL AND price_usd > 0
                 ORDER BY snapshot_ts DESC LIMIT 1",
                params![pair_address],
                |r| r.get(0)
            )
            .optional()?;
        if from_snapshots.is_some() {
            return Ok(from_snapshots);
        }
        let from_pairs: Option<Option<f64>> = conn
            .query_row(
                "SELECT price_usd FROM pairs WHERE pair_address = ?1",
                params![pair_address],
                |r| r.get(0)
            )
            .optional()?;
        Ok(from_pairs.flatten())
    }

    /// (ts, price) series with price > 0, ascending, since_ms normalized to
    /// the snapshot_ts unit.
    pub fn fetch_price_history(
        &self,
        pair_address: &str,
        since_ms: Option<i64>
    ) -> Result<Vec<(i64, f64)>> {
        let conn = self.conn.lock().unwrap();
        let since = match since_ms {
            Some(ts) => Some(normalize_since_ts(ts, snapshot_ts_is_ms(&conn)?)),
            None => None,
        };
        fetch_price_points_conn(&conn, pair_address, since, None)
    }

    /// (ts, price) series with both bounds already in the snapshot_ts unit.
    pub(crate) fn fetch_price_points_in(
        &self,
        pair_address: &str,
        since_ts: i64,
        until_ts: i64
    ) -> Result<Vec<(i64, f64)>> {
        let conn = self.conn.lock().unwrap();
        fetch_price_points_conn(&conn, pair_address, Some(since_ts), Some(until_ts))
    }

    /// ATH point plus the latest point for the pair. Ties on price break
    /// toward the most recent snapshot.
    pub fn fetch_ath_point(
        &self,
        pair_address: &str,
        since_ms: Option<i64>
    ) -> Result<Option<AthPoint>> {
        let conn = self.conn.lock().unwrap();
        let since = match since_ms {
            Some(ts) => Some(normalize_since_ts(ts, snapshot_ts_is_ms(&conn)?)),
            None => None,
        };
        let (filter, params): (&str, Vec<SqlValue>) = match since {
            Some(s) =>
                (
                    " AND snapshot_ts >= ?2",
                    vec![SqlValue::from(pair_address.to_string()), SqlValue::from(s)],
                ),
            None => ("", vec![SqlValue::from(pair_address.to_string())]),
        };
        let base = format!(
            "FROM snapshots WHERE pair_address = ?1 AND price_usd IS NOT NULL AND price_usd > 0{}",
            filter
        );
        let ath: Option<(f64, i64)> = conn
            .query_row(
                &format!(
                    "SELECT price_usd, snapshot_ts {} ORDER BY price_usd DESC, snapshot_ts DESC LIMIT 1",
                    base
                ),
                rusqlite::params_from_iter(params.clone()),
                |r| Ok((r.get(0)?, r.get(1)?))
            )
            .optional()?;
        let current: Option<(f64, i64)> = conn
            .query_row(
                &format!("SELECT price_usd, snapshot_ts {} ORDER BY snapshot_ts DESC LIMIT 1", base),
                rusqlite::params_from_iter(params),
                |r| Ok((r.get(0)?, r.get(1)?))
            )
            .optional()?;
        Ok(match (ath, current) {
            (Some((ath_price, ath_ts)), Some((current_price, current_ts))) =>
                Some(AthPoint { ath_price, ath_ts, current_price, current_ts }),
            _ => None,
        })
    }

    /// Up to `limit` (price, ts) candidates ordered by price_usd DESC,
    /// snapshot_ts DESC. Used for the fallback ATH search.
    pub fn fetch_ath_candidates(
        &self,
        pair_address: &str,
        since_ms: Option<i64>,
        limit: usize
    ) -> Result<Vec<(f64, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT price_usd, snapshot_ts FROM snapshots
             WHERE pair_address = ? AND price_usd IS NOT NULL AND price_usd > 0"
        );
        let mut params: Vec<SqlValue> = vec![SqlValue::from(pair_address.to_string())];
        if let Some(ts) = since_ms {
            let is_ms = snapshot_ts_is_ms(&conn)?;
            sql.push_str(" AND snapshot_ts >= ?");
            params.push(SqlValue::from(normalize_since_ts(ts, is_ms)));
        }
        sql.push_str(" ORDER BY price_usd DESC, snapshot_ts DESC LIMIT ?");
        params.push(SqlValue::from(limit.max(1) as i64));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |r| {
            Ok((r.get::<_, f64>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Activity around center_ts: [center - window/2, center + window/2].
    /// center_ts must already be in the snapshot_ts unit. Tx and volume sums
    /// are included only when the schema has the columns.
    pub fn fetch_activity_window(
        &self,
        pair_address: &str,
        center_ts: i64,
        window_sec: f64
    ) -> Result<ActivityWindow> {
        let conn = self.conn.lock().unwrap();
        let is_ms = snapshot_ts_is_ms(&conn)?;
        let half = ((window_sec * (if is_ms { 1000.0 } else { 1.0 })) / 2.0) as i64;
        let ts_lo = center_ts - half;
        let ts_hi = center_ts + half;

        let snapshots_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots
             WHERE pair_address = ?1 AND snapshot_ts >= ?2 AND snapshot_ts <= ?3",
            params![pair_address, ts_lo, ts_hi],
            |r| r.get(0)
        )?;

        let mut out = ActivityWindow {
            snapshots_count,
            txns_sum: None,
            buys_sum: None,
            sells_sum: None,
            volume_sum: None,
        };

        let has_txns =
            table_has_column(&conn, "snapshots", "txns_m5_buys")? &&
            table_has_column(&conn, "snapshots", "txns_m5_sells")?;
        if has_txns {
            let (txns, buys, sells): (i64, i64, i64) = conn.query_row(
                "SELECT
                    COALESCE(SUM(COALESCE(txns_m5_buys, 0) + COALESCE(txns_m5_sells, 0)), 0),
                    COALESCE(SUM(COALESCE(txns_m5_buys, 0)), 0),
                    COALESCE(SUM(COALESCE(txns_m5_sells, 0)), 0)
                 FROM snapshots
                 WHERE pair_address = ?1 AND snapshot_ts >= ?2 AND snapshot_ts <= ?3",
                params![pair_address, ts_lo, ts_hi],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            )?;
            out.txns_sum = Some(txns);
            out.buys_sum = Some(buys);
            out.sells_sum = Some(sells);
        }

        if table_has_column(&conn, "snapshots", "volume_m5")? {
            let volume: f64 = conn.query_row(
                "SELECT COALESCE(SUM(COALESCE(volume_m5, 0)), 0)
                 FROM snapshots
                 WHERE pair_address = ?1 AND snapshot_ts >= ?2 AND snapshot_ts <= ?3",
                params![pair_address, ts_lo, ts_hi],
                |r| r.get(0)
            )?;
            out.volume_sum = Some(volume);
        }

        Ok(out)
    }

    /// Remove pairs older than max_age_hours (by pair_created_at_ms), their
    /// snapshots, and tokens no pair references anymore. Pairs with unknown
    /// age (NULL or 0) are never deleted. All three phases run in one write
    /// transaction; dry_run only counts.
    /// Returns (snapshots_deleted, pairs_deleted, tokens_deleted).
    pub fn prune_by_pair_age(
        &self,
        max_age_hours: f64,
        dry_run: bool,
        vacuum: bool
    ) -> Result<(u64, u64, u64)> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff_ms = now_ms - ((max_age_hours * 3600.0 * 1000.0) as i64);
        let mut conn = self.conn.lock().unwrap();

        const OLD_SNAPSHOTS: &str = "FROM snapshots
            WHERE EXISTS (
                SELECT 1 FROM pairs p
                WHERE p.pair_address = snapshots.pair_address
                  AND p.pair_created_at_ms < ?1
                  AND p.pair_created_at_ms IS NOT NULL
                  AND p.pair_created_at_ms != 0
            )";
        const OLD_PAIRS: &str = "FROM pairs
            WHERE pair_created_at_ms < ?1
              AND pair_created_at_ms IS NOT NULL
              AND pair_created_at_ms != 0";
        const ORPHAN_TOKENS: &str = "FROM tokens
            WHERE NOT EXISTS (
                SELECT 1 FROM pairs p
                WHERE p.base_address = tokens.address
                   OR p.quote_address = tokens.address
            )";

        if dry_run {
            let s_cnt: i64 = conn.query_row(
                &format!("SELECT COUNT(*) {}", OLD_SNAPSHOTS),
                params![cutoff_ms],
                |r| r.get(0)
            )?;
            let p_cnt: i64 = conn.query_row(
                &format!("SELECT COUNT(*) {}", OLD_PAIRS),
                params![cutoff_ms],
                |r| r.get(0)
            )?;
            let t_cnt: i64 = conn.query_row(&format!("SELECT COUNT(*) {}", ORPHAN_TOKENS), [], |r| {
                r.get(0)
            })?;
            return Ok((s_cnt as u64, p_cnt as u64, t_cnt as u64));
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let s_cnt = tx.execute(&format!("DELETE {}", OLD_SNAPSHOTS), params![cutoff_ms])?;
        let p_cnt = tx.execute(&format!("DELETE {}", OLD_PAIRS), params![cutoff_ms])?;
        let t_cnt = tx.execute(&format!("DELETE {}", ORPHAN_TOKENS), [])?;
        tx.commit().context("prune commit")?;

        if vacuum {
            conn.execute_batch("VACUUM")?;
        }
        Ok((s_cnt as u64, p_cnt as u64, t_cnt as u64))
    }

    /// Three invariant counters that must all be zero after a prune on a
    /// quiet store: old pairs, snapshots of old pairs, orphan tokens.
    pub fn self_check_invariants(&self) -> Result<(i64, i64, i64)> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff_ms = now_ms - ((config::SELF_CHECK_AGE_HOURS * 3600.0 * 1000.0) as i64);
        let conn = self.conn.lock().unwrap();
        let old_pairs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pairs
             WHERE pair_created_at_ms IS NOT NULL
               AND pair_created_at_ms > 0
               AND pair_created_at_ms < ?1",
            params![cutoff_ms],
            |r| r.get(0)
        )?;
        let old_pair_snapshots: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots s
             WHERE EXISTS (
               SELECT 1 FROM pairs p
               WHERE p.pair_address = s.pair_address
                 AND p.pair_created_at_ms IS NOT NULL
                 AND p.pair_created_at_ms > 0
                 AND p.pair_created_at_ms < ?1
             )",
            params![cutoff_ms],
            |r| r.get(0)
        )?;
        let orphan_tokens: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tokens t
             WHERE NOT EXISTS (
               SELECT 1 FROM pairs p
               WHERE p.base_address = t.address OR p.quote_address = t.address
             )",
            [],
            |r| r.get(0)
        )?;
        Ok((old_pairs, old_pair_snapshots, orphan_tokens))
    }
}

fn fetch_price_points_conn(
    conn: &Connection,
    pair_address: &str,
    since_ts: Option<i64>,
    until_ts: Option<i64>
) -> Result<Vec<(i64, f64)>> {
    let mut sql = String::from(
        "SELECT snapshot_ts, price_usd FROM snapshots
         WHERE pair_address = ? AND price_usd IS NOT NULL AND price_usd > 0"
    );
    let mut params: Vec<SqlValue> = vec![SqlValue::from(pair_address.to_string())];
    if let Some(s) = since_ts {
        sql.push_str(" AND snapshot_ts >= ?");
        params.push(SqlValue::from(s));
    }
    if let Some(u) = until_ts {
        sql.push_str(" AND snapshot_ts <= ?");
        params.push(SqlValue::from(u));
    }
    sql.push_str(" ORDER BY snapshot_ts ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::test_support::snapshot;
    use super::*;

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    #[test]
    fn upserts_are_idempotent_by_primary_key() {
        let db = Database::open_in_memory().unwrap();
        let snap = snapshot("PAIR1", now_ms(), Some(1.0));
        for _ in 0..3 {
            db.upsert_token(&snap.base_token).unwrap();
            db.upsert_token(&snap.quote_token).unwrap();
            db.upsert_pair(&snap).unwrap();
        }
        let tokens = db.iterate_tokens().unwrap();
        assert_eq!(tokens.len(), 2);
        let pairs = db.iterate_pairs().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(
            pairs[0].get("pair_address").and_then(|v| v.as_str()),
            Some("PAIR1")
        );
    }

    #[test]
    fn snapshots_append_and_order_ascending() {
        let db = Database::open_in_memory().unwrap();
        let t0 = now_ms();
        for (i, price) in [3.0, 1.0, 2.0].iter().enumerate() {
            db.insert_snapshot(&snapshot("PAIR1", t0 + (i as i64) * 1000, Some(*price))).unwrap();
        }
        let rows = db.iterate_snapshots(Some("PAIR1"), None, None).unwrap();
        assert_eq!(rows.len(), 3);
        let ts: Vec<i64> = rows
            .iter()
            .map(|r| r.get("snapshot_ts").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(db.get_snapshot_count("PAIR1").unwrap(), 3);
        assert_eq!(db.get_snapshot_count("NOPE").unwrap(), 0);
    }

    #[test]
    fn latest_price_prefers_snapshots_then_pairs() {
        let db = Database::open_in_memory().unwrap();
        let t0 = now_ms();
        let mut pair_only = snapshot("PAIR1", t0, Some(5.0));
        db.upsert_pair(&pair_only).unwrap();
        assert_eq!(db.fetch_latest_price("PAIR1").unwrap(), Some(5.0));

        pair_only.price_usd = Some(7.0);
        db.insert_snapshot(&pair_only).unwrap();
        assert_eq!(db.fetch_latest_price("PAIR1").unwrap(), Some(7.0));
        assert_eq!(db.fetch_latest_price("MISSING").unwrap(), None);
    }

    #[test]
    fn ath_point_breaks_price_ties_toward_recent() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        db.insert_snapshot(&snapshot("PAIR1", t0, Some(10.0))).unwrap();
        db.insert_snapshot(&snapshot("PAIR1", t0 + 1000, Some(10.0))).unwrap();
        db.insert_snapshot(&snapshot("PAIR1", t0 + 2000, Some(4.0))).unwrap();
        let ath = db.fetch_ath_point("PAIR1", None).unwrap().unwrap();
        assert_eq!(ath.ath_price, 10.0);
        assert_eq!(ath.ath_ts, t0 + 1000);
        assert_eq!(ath.current_price, 4.0);
        assert_eq!(ath.current_ts, t0 + 2000);

        let candidates = db.fetch_ath_candidates("PAIR1", None, 10).unwrap();
        assert_eq!(candidates[0], (10.0, t0 + 1000));
        assert_eq!(candidates[1], (10.0, t0));
        assert_eq!(candidates[2], (4.0, t0 + 2000));
    }

    #[test]
    fn ath_since_bound_is_normalized_for_second_unit_stores() {
        let db = Database::open_in_memory().unwrap();
        // Seconds-unit history: values far below 10^12.
        let t0 = 1_700_000_000i64;
        db.insert_snapshot(&snapshot("PAIR1", t0, Some(9.0))).unwrap();
        db.insert_snapshot(&snapshot("PAIR1", t0 + 60, Some(3.0))).unwrap();
        // since is handed over in ms and must shrink to seconds.
        let ath = db.fetch_ath_point("PAIR1", Some(t0 * 1000)).unwrap().unwrap();
        assert_eq!(ath.ath_price, 9.0);
        // A cutoff after the first point hides the ATH.
        let ath2 = db.fetch_ath_point("PAIR1", Some((t0 + 30) * 1000)).unwrap().unwrap();
        assert_eq!(ath2.ath_price, 3.0);
    }

    #[test]
    fn activity_window_counts_and_sums() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        for i in 0..3 {
            let mut s = snapshot("PAIR1", t0 + i * 60_000, Some(1.0));
            s.txns_m5_buys = Some(2);
            s.txns_m5_sells = Some(1);
            s.volume_m5 = Some(50.0);
            db.insert_snapshot(&s).unwrap();
        }
        // 300s window centered on the middle snapshot covers all three.
        let act = db.fetch_activity_window("PAIR1", t0 + 60_000, 300.0).unwrap();
        assert_eq!(act.snapshots_count, 3);
        assert_eq!(act.txns_sum, Some(9));
        assert_eq!(act.buys_sum, Some(6));
        assert_eq!(act.sells_sum, Some(3));
        assert_eq!(act.volume_sum, Some(150.0));

        // A tight window sees only the center point.
        let act1 = db.fetch_activity_window("PAIR1", t0 + 60_000, 10.0).unwrap();
        assert_eq!(act1.snapshots_count, 1);
    }

    #[test]
    fn prune_by_pair_age_keeps_unknown_age() {
        let db = Database::open_in_memory().unwrap();
        let now = now_ms();

        let mut fresh = snapshot("FRESH", now, Some(1.0));
        fresh.pair_created_at_ms = Some(now - 3_600_000);
        db.upsert_token(&fresh.base_token).unwrap();
        db.upsert_token(&fresh.quote_token).unwrap();
        db.upsert_pair(&fresh).unwrap();
        db.insert_snapshot(&fresh).unwrap();

        let mut old = snapshot("OLD", now, Some(1.0));
        old.pair_created_at_ms = Some(now - 25 * 3_600_000);
        db.upsert_token(&old.base_token).unwrap();
        db.upsert_pair(&old).unwrap();
        db.insert_snapshot(&old).unwrap();

        let mut unknown = snapshot("UNKNOWN", now, Some(1.0));
        unknown.pair_created_at_ms = None;
        db.upsert_pair(&unknown).unwrap();
        db.insert_snapshot(&unknown).unwrap();

        // Dry run only reports.
        let (s, p, _t) = db.prune_by_pair_age(24.0, true, false).unwrap();
        assert_eq!((s, p), (1, 1));
        assert_eq!(db.iterate_pairs().unwrap().len(), 3);

        let (s, p, t) = db.prune_by_pair_age(24.0, false, false).unwrap();
        assert_eq!((s, p), (1, 1));
        assert_eq!(t, 1, "token referenced only by the old pair goes");

        let left: Vec<String> = db
            .iterate_pairs()
            .unwrap()
            .iter()
            .map(|r| r.get("pair_address").and_then(|v| v.as_str()).unwrap().to_string())
            .collect();
        assert!(left.contains(&"FRESH".to_string()));
        assert!(left.contains(&"UNKNOWN".to_string()));
        assert!(!left.contains(&"OLD".to_string()));

        assert_eq!(db.self_check_invariants().unwrap(), (0, 0, 0));

        // Re-running deletes nothing further.
        assert_eq!(db.prune_by_pair_age(24.0, false, false).unwrap(), (0, 0, 0));
    }

    #[test]
    fn price_history_filters_null_and_zero_prices() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        db.insert_snapshot(&snapshot("PAIR1", t0, Some(1.0))).unwrap();
        db.insert_snapshot(&snapshot("PAIR1", t0 + 1000, None)).unwrap();
        db.insert_snapshot(&snapshot("PAIR1", t0 + 2000, Some(0.0))).unwrap();
        db.insert_snapshot(&snapshot("PAIR1", t0 + 3000, Some(2.0))).unwrap();

        let history = db.fetch_price_history("PAIR1", None).unwrap();
        assert_eq!(history, vec![(t0, 1.0), (t0 + 3000, 2.0)]);

        let bounded = db.fetch_price_history("PAIR1", Some(t0 + 1000)).unwrap();
        assert_eq!(bounded, vec![(t0 + 3000, 2.0)]);
    }

    #[test]
    fn known_pair_addresses_for_dedup() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_pair(&snapshot("A", now_ms(), Some(1.0))).unwrap();
        db.upsert_pair(&snapshot("B", now_ms(), Some(1.0))).unwrap();
        let known = db.get_known_pair_addresses().unwrap();
        assert!(known.contains("A") && known.contains("B"));
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn snapshot_rows_always_carry_a_pair_address() {
        let db = Database::open_in_memory().unwrap();
        db.insert_snapshot(&snapshot("PAIR1", now_ms(), Some(1.0))).unwrap();
        for row in db.iterate_snapshots(None, None, None).unwrap() {
            let addr = row.get("pair_address").and_then(|v| v.as_str()).unwrap();
            assert!(!addr.is_empty());
        }
    }
}
