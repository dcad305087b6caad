// dump_watchlist.rs - Persistence glue for the dump/reversal state machine
//
// Loads the machine's inputs from snapshots/pairs, runs the pure
// transitions in crate::dump, and writes the entry back. Row lifecycle
// (TTL and orphan cleanup) also lives here.

use anyhow::{ anyhow, Result };
use rusqlite::types::Value as SqlValue;
use rusqlite::{ params, Connection, OptionalExtension };
use serde_json::{ Map, Value };

use super::Database;
use crate::dump::{ self, DumpEntry, DumpObservation, DumpPeak, DumpState };

fn load_observation(
    conn: &Connection,
    pair_address: &str,
    offset: u32
) -> Result<Option<(Option<f64>, i64, Option<f64>, Option<i64>, Option<i64>)>> {
    let row = conn
        .query_row(
            "SELECT price_usd, snapshot_ts, volume_m5, txns_m5_buys, txns_m5_sells
             FROM snapshots WHERE pair_address = ?1
             ORDER BY snapshot_ts DESC LIMIT 1 OFFSET ?2",
            params![pair_address, offset],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        )
        .optional()?;
    Ok(row)
}

fn load_entry(conn: &Connection, pair_address: &str) -> Result<Option<DumpEntry>> {
    let row = conn
        .query_row(
            "SELECT pair_address, added_at_ms, updated_at_ms, state,
                    peak_price, peak_ts, low_price, low_ts, last_price, last_ts,
                    drop_pct, volume_m5, buys_m5, sells_m5, signal_ts, signal_price
             FROM dump_watchlist WHERE pair_address = ?1",
            params![pair_address],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, f64>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, f64>(8)?,
                    r.get::<_, i64>(9)?,
                    r.get::<_, f64>(10)?,
                    r.get::<_, Option<f64>>(11)?,
                    r.get::<_, Option<i64>>(12)?,
                    r.get::<_, Option<i64>>(13)?,
                    r.get::<_, Option<i64>>(14)?,
                    r.get::<_, Option<f64>>(15)?,
                ))
            }
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };
    let state = DumpState::parse(&row.3).ok_or_else(||
        anyhow!("unknown dump_watchlist state '{}' for {}", row.3, row.0)
    )?;
    Ok(
        Some(DumpEntry {
            pair_address: row.0,
            added_at_ms: row.1,
            updated_at_ms: row.2,
            state,
            peak_price: row.4,
            peak_ts: row.5,
            low_price: row.6,
            low_ts: row.7,
            last_price: row.8,
            last_ts: row.9,
            drop_pct: row.10,
            volume_m5: row.11,
            buys_m5: row.12,
            sells_m5: row.13,
            signal_ts: row.14,
            signal_price: row.15,
        })
    )
}

fn save_entry(conn: &Connection, entry: &DumpEntry) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dump_watchlist (
            pair_address, added_at_ms, updated_at_ms, state,
            peak_price, peak_ts, low_price, low_ts, last_price, last_ts,
            drop_pct, volume_m5, buys_m5, sells_m5, signal_ts, signal_price
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        params![
            entry.pair_address,
            entry.added_at_ms,
            entry.updated_at_ms,
            entry.state.as_str(),
            entry.peak_price,
            entry.peak_ts,
            entry.low_price,
            entry.low_ts,
            entry.last_price,
            entry.last_ts,
            entry.drop_pct,
            entry.volume_m5,
            entry.buys_m5,
            entry.sells_m5,
            entry.signal_ts,
            entry.signal_price
        ]
    )?;
    Ok(())
}

/// Run the state machine for one pair against its latest persisted
/// snapshot. A missing or non-positive price makes this a no-op.
pub(crate) fn update_for_snapshot_conn(
    conn: &Connection,
    pair_address: &str,
    now_ms: i64
) -> Result<()> {
    let Some((price_opt, last_ts, volume_m5, buys_m5, sells_m5)) = load_observation(
        conn,
        pair_address,
        0
    )? else {
        return Ok(());
    };
    let Some(last_price) = price_opt.filter(|p| *p > 0.0) else {
        return Ok(());
    };
    let obs = DumpObservation {
        price: last_price,
        ts: last_ts,
        volume_m5,
        buys_m5,
        sells_m5,
    };

    let peak_row: Option<(f64, i64)> = conn
        .query_row(
            "SELECT price_usd, snapshot_ts FROM snapshots
             WHERE pair_address = ?1 AND price_usd IS NOT NULL AND price_usd > 0
             ORDER BY price_usd DESC, snapshot_ts DESC LIMIT 1",
            params![pair_address],
            |r| Ok((r.get(0)?, r.get(1)?))
        )
        .optional()?;
    let Some((peak_price, peak_ts)) = peak_row else {
        return Ok(());
    };
    let peak = DumpPeak { price: peak_price, ts: peak_ts };

    let prev = load_observation(conn, pair_address, 1)?.map(
        |(price, ts, volume_m5, buys_m5, sells_m5)| DumpObservation {
            price: price.unwrap_or(0.0),
            ts,
            volume_m5,
            buys_m5,
            sells_m5,
        }
    );

    let entry = match load_entry(conn, pair_address)? {
        Some(existing) => dump::step(existing, now_ms, &obs, &peak, prev.as_ref()),
        None => {
            let liquidity: f64 = conn
                .query_row(
                    "SELECT liquidity_usd FROM pairs WHERE pair_address = ?1",
                    params![pair_address],
                    |r| r.get::<_, Option<f64>>(0)
                )
                .optional()?
                .flatten()
                .unwrap_or(0.0);
            match dump::admit(pair_address, now_ms, &obs, &peak, liquidity) {
                Some(entry) => entry,
                None => {
                    return Ok(());
                }
            }
        }
    };

    save_entry(conn, &entry)
}

impl Database {
    /// State-machine update for one pair, outside the ingestion transaction.
    pub fn update_dump_watchlist_for_snapshot(&self, pair_address: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        update_for_snapshot_conn(&conn, pair_address, now_ms)
    }

    /// Remove entries past the TTL on updated_at_ms and entries whose pair
    /// no longer exists. Returns rows deleted.
    pub fn prune_dump_watchlist(&self, ttl_hours: f64) -> Result<u64> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff_ms = now_ms - ((ttl_hours * 3600.0 * 1000.0) as i64);
        let conn = self.conn.lock().unwrap();
        let ttl_cnt = conn.execute(
            "DELETE FROM dump_watchlist WHERE updated_at_ms < ?1",
            params![cutoff_ms]
        )?;
        let orphan_cnt = conn.execute(
            "DELETE FROM dump_watchlist
             WHERE NOT EXISTS (
               SELECT 1 FROM pairs p WHERE p.pair_address = dump_watchlist.pair_address
             )",
            []
        )?;
        Ok((ttl_cnt + orphan_cnt) as u64)
    }

    /// Watchlist rows as JSON maps, newest first, optional state filter.
    pub fn iterate_dump_watchlist(
        &self,
        state: Option<&str>,
        limit: Option<u32>
    ) -> Result<Vec<Map<String, Value>>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from("SELECT * FROM dump_watchlist WHERE 1=1");
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(s) = state {
            sql.push_str(" AND state = ?");
            params.push(SqlValue::from(s.to_string()));
        }
        sql.push_str(" ORDER BY updated_at_ms DESC");
        if let Some(l) = limit {
            if l > 0 {
                sql.push_str(" LIMIT ?");
                params.push(SqlValue::from(l as i64));
            }
        }
        super::store::query_json_rows(&conn, &sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::test_support::snapshot;

    fn dumped_snapshot(pair: &str, ts: i64, price: f64, vol: f64, buys: i64, sells: i64) -> crate::models::PairSnapshot {
        let mut s = snapshot(pair, ts, Some(price));
        s.volume_m5 = Some(vol);
        s.txns_m5_buys = Some(buys);
        s.txns_m5_sells = Some(sells);
        s
    }

    #[test]
    fn deep_dump_enters_watchlist_and_signals_on_reversal() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;

        // Peak print, then a 70% dump with heavy selling.
        db.upsert_pair(&dumped_snapshot("P", t0, 100.0, 600.0, 5, 5)).unwrap();
        db.insert_snapshot(&dumped_snapshot("P", t0, 100.0, 600.0, 5, 5)).unwrap();
        db.update_dump_watchlist_for_snapshot("P", t0).unwrap();
        assert!(db.iterate_dump_watchlist(None, None).unwrap().is_empty());

        db.insert_snapshot(&dumped_snapshot("P", t0 + 60_000, 30.0, 700.0, 2, 9)).unwrap();
        db.update_dump_watchlist_for_snapshot("P", t0 + 60_000).unwrap();
        let rows = db.iterate_dump_watchlist(None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("state").and_then(|v| v.as_str()), Some("DUMPING"));
        assert_eq!(rows[0].get("low_price").and_then(|v| v.as_f64()), Some(30.0));

        // Reversal: bounce over the low, buyers in control, rising volume.
        db.insert_snapshot(&dumped_snapshot("P", t0 + 120_000, 31.0, 900.0, 9, 4)).unwrap();
        db.update_dump_watchlist_for_snapshot("P", t0 + 120_000).unwrap();
        let rows = db.iterate_dump_watchlist(Some("SIGNAL"), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("signal_price").and_then(|v| v.as_f64()), Some(31.0));
        let stamped = rows[0].get("signal_ts").and_then(|v| v.as_i64()).unwrap();
        assert_eq!(stamped, t0 + 120_000);

        // Further prints keep tracking but never restamp.
        db.insert_snapshot(&dumped_snapshot("P", t0 + 180_000, 50.0, 1200.0, 9, 2)).unwrap();
        db.update_dump_watchlist_for_snapshot("P", t0 + 180_000).unwrap();
        let rows = db.iterate_dump_watchlist(Some("SIGNAL"), None).unwrap();
        assert_eq!(rows[0].get("signal_ts").and_then(|v| v.as_i64()), Some(stamped));
        assert_eq!(rows[0].get("last_price").and_then(|v| v.as_f64()), Some(50.0));
    }

    #[test]
    fn shallow_dump_or_thin_market_never_enters() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        db.upsert_pair(&dumped_snapshot("P", t0, 100.0, 600.0, 5, 5)).unwrap();
        db.insert_snapshot(&dumped_snapshot("P", t0, 100.0, 600.0, 5, 5)).unwrap();
        // Only a 30% drop.
        db.insert_snapshot(&dumped_snapshot("P", t0 + 60_000, 70.0, 700.0, 2, 9)).unwrap();
        db.update_dump_watchlist_for_snapshot("P", t0 + 60_000).unwrap();
        assert!(db.iterate_dump_watchlist(None, None).unwrap().is_empty());
    }

    #[test]
    fn null_price_update_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        db.insert_snapshot(&snapshot("P", t0, None)).unwrap();
        db.update_dump_watchlist_for_snapshot("P", t0).unwrap();
        assert!(db.iterate_dump_watchlist(None, None).unwrap().is_empty());
    }

    #[test]
    fn ttl_and_orphan_prune() {
        let db = Database::open_in_memory().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        db.upsert_pair(&dumped_snapshot("LIVE", now, 100.0, 600.0, 5, 5)).unwrap();
        db.insert_snapshot(&dumped_snapshot("LIVE", now - 120_000, 100.0, 600.0, 5, 5)).unwrap();
        db.insert_snapshot(&dumped_snapshot("LIVE", now - 60_000, 30.0, 700.0, 2, 9)).unwrap();
        db.update_dump_watchlist_for_snapshot("LIVE", now).unwrap();

        // Orphan entry: pair row is gone.
        db.upsert_pair(&dumped_snapshot("GONE", now, 100.0, 600.0, 5, 5)).unwrap();
        db.insert_snapshot(&dumped_snapshot("GONE", now - 120_000, 100.0, 600.0, 5, 5)).unwrap();
        db.insert_snapshot(&dumped_snapshot("GONE", now - 60_000, 30.0, 700.0, 2, 9)).unwrap();
        db.update_dump_watchlist_for_snapshot("GONE", now).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute("DELETE FROM pairs WHERE pair_address = 'GONE'", []).unwrap();
            // Age one entry past the TTL.
            conn
                .execute(
                    "UPDATE dump_watchlist SET updated_at_ms = ?1 WHERE pair_address = 'LIVE'",
                    params![now - 4 * 3_600_000]
                )
                .unwrap();
        }

        let removed = db.prune_dump_watchlist(3.0).unwrap();
        assert_eq!(removed, 2);
        assert!(db.iterate_dump_watchlist(None, None).unwrap().is_empty());
    }
}
