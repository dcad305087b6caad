// strategy.rs - Store operations for the strategy layer: decision audit,
// signal cooldowns, signal events and their horizon/trigger evaluations,
// plus the app_status heartbeat row.

use anyhow::{ Context, Result };
use rusqlite::{ params, OptionalExtension, TransactionBehavior };
use serde::Serialize;

use super::Database;

/// A horizon evaluation that is due for processing.
#[derive(Debug, Clone)]
pub struct PendingEvaluation {
    pub eval_id: i64,
    pub signal_id: i64,
    pub horizon_sec: i64,
    pub pair_address: String,
    pub signal_ts: i64,
    pub entry_price: f64,
}

/// A trigger evaluation still waiting for its verdict.
#[derive(Debug, Clone)]
pub struct PendingTriggerEval {
    pub signal_id: i64,
    pub pair_address: String,
    pub signal_ts: i64,
    pub entry_price: f64,
}

/// Window metrics for a DONE horizon evaluation.
#[derive(Debug, Clone)]
pub struct HorizonMetrics {
    pub price_end: f64,
    pub max_price: f64,
    pub min_price: f64,
    pub return_end_pct: f64,
    pub max_return_pct: f64,
    pub min_return_pct: f64,
}

/// First-trigger verdict for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Tp1First,
    SlFirst,
    Neither,
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOutcome::Tp1First => "TP1_FIRST",
            TriggerOutcome::SlFirst => "SL_FIRST",
            TriggerOutcome::Neither => "NEITHER",
        }
    }
}

/// Full payload for a DONE trigger evaluation.
#[derive(Debug, Clone)]
pub struct TriggerEvalResult {
    pub outcome: TriggerOutcome,
    pub tp1_hit_ts: Option<i64>,
    pub sl_hit_ts: Option<i64>,
    pub tp1_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub mfe_pct: Option<f64>,
    pub mae_pct: Option<f64>,
    pub max_price: Option<f64>,
    pub min_price: Option<f64>,
    pub bu_hit_after_tp1: Option<i64>,
    pub post_tp1_max_pct: Option<f64>,
    pub post_tp1_max_price: Option<f64>,
}

/// Partial update for the singleton heartbeat row; None leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct AppStatusUpdate {
    pub last_cycle_started_at_ms: Option<i64>,
    pub last_cycle_finished_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_at_ms: Option<i64>,
    pub counters_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppStatus {
    pub updated_at_ms: i64,
    pub last_cycle_started_at_ms: Option<i64>,
    pub last_cycle_finished_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_at_ms: Option<i64>,
    pub counters_json: Option<String>,
}

/// Aggregate view over finished trigger evaluations.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerSummary {
    pub total_signals: i64,
    pub trigger_done: i64,
    pub trigger_no_data: i64,
    pub trigger_pending: i64,
    pub outcome_tp1_first: i64,
    pub outcome_sl_first: i64,
    pub outcome_neither: i64,
    pub tp1_hit_rate: f64,
    pub sl_first_rate: f64,
    pub bu_after_tp1_rate: f64,
    pub post_tp1_max_pct_avg: Option<f64>,
    pub post_tp1_max_pct_median: Option<f64>,
    pub top_post_tp1: Vec<TriggerTopEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerTopEntry {
    pub pair_address: String,
    pub entry_price: f64,
    pub post_tp1_max_pct: f64,
    pub url: String,
}

impl Database {
    /// Append one decision row and mirror it into strategy_latest.
    pub fn insert_strategy_decision(
        &self,
        pair_address: &str,
        decision: &str,
        current_price: Option<f64>,
        ath_price: Option<f64>,
        drop_from_ath: Option<f64>,
        reasons_json: Option<&str>,
        decided_at_ms: i64
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO strategy_decisions
             (pair_address, decided_at, decision, current_price, ath_price, drop_from_ath, reasons_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                pair_address,
                decided_at_ms,
                decision,
                current_price,
                ath_price,
                drop_from_ath,
                reasons_json
            ]
        )?;
        tx.execute(
            "INSERT INTO strategy_latest
             (pair_address, last_decision, last_score, last_drop_from_ath, last_current_price,
              last_ath_price, last_decided_at, last_reasons_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(pair_address) DO UPDATE SET
                 last_decision = excluded.last_decision,
                 last_score = excluded.last_score,
                 last_drop_from_ath = excluded.last_drop_from_ath,
                 last_current_price = excluded.last_current_price,
                 last_ath_price = excluded.last_ath_price,
                 last_decided_at = excluded.last_decided_at,
                 last_reasons_json = excluded.last_reasons_json",
            params![
                pair_address,
                decision,
                drop_from_ath,
                drop_from_ath,
                current_price,
                ath_price,
                decided_at_ms,
                reasons_json
            ]
        )?;
        tx.commit().context("strategy decision commit")?;
        Ok(())
    }

    /// The mirrored most-recent decision for a pair, if any.
    pub fn get_strategy_latest(&self, pair_address: &str) -> Result<Option<(String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT last_decision, last_decided_at FROM strategy_latest WHERE pair_address = ?1",
                params![pair_address],
                |r| Ok((r.get(0)?, r.get(1)?))
            )
            .optional()?;
        Ok(row)
    }

    /// last_signal_at (unix ms) from signal_cooldowns, or None.
    pub fn get_last_signal_at(&self, pair_address: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT last_signal_at FROM signal_cooldowns WHERE pair_address = ?1",
                params![pair_address],
                |r| r.get(0)
            )
            .optional()?;
        Ok(row)
    }

    /// Stamp the cooldown gate for a pair.
    pub fn set_signal_cooldown(&self, pair_address: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO signal_cooldowns (pair_address, last_signal_at) VALUES (?1, ?2)",
            params![pair_address, now_ms]
        )?;
        Ok(())
    }

    /// Insert a signal event row, returning its id.
    pub fn insert_signal_event(
        &self,
        pair_address: &str,
        signal_ts: i64,
        entry_price: f64,
        ath_price: f64,
        drop_from_ath: f64,
        score: f64,
        features_json: Option<&str>
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signal_events
             (pair_address, signal_ts, entry_price, ath_price, drop_from_ath, score, features_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![pair_address, signal_ts, entry_price, ath_price, drop_from_ath, score, features_json]
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Enqueue a PENDING horizon evaluation for a signal.
    pub fn insert_signal_evaluation(&self, signal_id: i64, horizon_sec: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signal_evaluations (signal_id, horizon_sec, status) VALUES (?1, ?2, 'PENDING')",
            params![signal_id, horizon_sec]
        )?;
        Ok(())
    }

    /// Enqueue a PENDING trigger evaluation; at most one per signal.
    pub fn insert_trigger_eval_pending(&self, signal_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signal_trigger_evaluations (signal_id, status)
             VALUES (?1, 'PENDING')
             ON CONFLICT(signal_id) DO NOTHING",
            params![signal_id]
        )?;
        Ok(())
    }

    /// Create a signal event and enqueue all of its pending evaluations
    /// (one trigger eval plus one horizon eval per entry in `horizons`)
    /// as a single transaction. Returns the signal id.
    pub fn record_signal_event(
        &self,
        pair_address: &str,
        signal_ts: i64,
        entry_price: f64,
        ath_price: f64,
        drop_from_ath: f64,
        score: f64,
        features_json: Option<&str>,
        horizons: &[i64]
    ) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO signal_events
             (pair_address, signal_ts, entry_price, ath_price, drop_from_ath, score, features_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![pair_address, signal_ts, entry_price, ath_price, drop_from_ath, score, features_json]
        )?;
        let signal_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO signal_trigger_evaluations (signal_id, status)
             VALUES (?1, 'PENDING')
             ON CONFLICT(signal_id) DO NOTHING",
            params![signal_id]
        )?;
        for horizon in horizons {
            tx.execute(
                "INSERT INTO signal_evaluations (signal_id, horizon_sec, status) VALUES (?1, ?2, 'PENDING')",
                params![signal_id, horizon]
            )?;
        }
        tx.commit().context("signal event commit")?;
        Ok(signal_id)
    }

    /// PENDING horizon evaluations whose horizon has elapsed at now_ts.
    /// The horizon is interpreted in the unit signal_ts was written in.
    pub fn iter_pending_evaluations(&self, now_ts: i64) -> Result<Vec<PendingEvaluation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.signal_id, e.horizon_sec, s.pair_address, s.signal_ts, s.entry_price
             FROM signal_evaluations e
             JOIN signal_events s ON s.id = e.signal_id
             WHERE e.status = 'PENDING'"
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(PendingEvaluation {
                eval_id: r.get(0)?,
                signal_id: r.get(1)?,
                horizon_sec: r.get(2)?,
                pair_address: r.get(3)?,
                signal_ts: r.get(4)?,
                entry_price: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            let ev = row?;
            let ts_is_ms = ev.signal_ts > 1_000_000_000_000;
            let horizon_unit = if ts_is_ms { ev.horizon_sec * 1000 } else { ev.horizon_sec };
            if now_ts >= ev.signal_ts + horizon_unit {
                out.push(ev);
            }
        }
        Ok(out)
    }

    pub fn update_evaluation_done(
        &self,
        eval_id: i64,
        evaluated_at: i64,
        metrics: &HorizonMetrics
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE signal_evaluations SET
                 evaluated_at = ?1, price_end = ?2, max_price = ?3, min_price = ?4,
                 return_end_pct = ?5, max_return_pct = ?6, min_return_pct = ?7,
                 status = 'DONE'
             WHERE id = ?8",
            params![
                evaluated_at,
                metrics.price_end,
                metrics.max_price,
                metrics.min_price,
                metrics.return_end_pct,
                metrics.max_return_pct,
                metrics.min_return_pct,
                eval_id
            ]
        )?;
        Ok(())
    }

    pub fn update_evaluation_no_data(&self, eval_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE signal_evaluations SET status = 'NO_DATA' WHERE id = ?1", params![eval_id])?;
        Ok(())
    }

    /// Oldest PENDING trigger evaluations joined with their signal fields.
    pub fn iter_pending_trigger_evals(&self, limit: u32) -> Result<Vec<PendingTriggerEval>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.signal_id, s.pair_address, s.signal_ts, s.entry_price
             FROM signal_trigger_evaluations t
             JOIN signal_events s ON s.id = t.signal_id
             WHERE t.status = 'PENDING'
             ORDER BY t.signal_id ASC
             LIMIT ?1"
        )?;
        let rows = stmt.query_map(params![limit.max(1)], |r| {
            Ok(PendingTriggerEval {
                signal_id: r.get(0)?,
                pair_address: r.get(1)?,
                signal_ts: r.get(2)?,
                entry_price: r.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn update_trigger_eval_done(
        &self,
        signal_id: i64,
        evaluated_at: i64,
        result: &TriggerEvalResult
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE signal_trigger_evaluations SET
                 evaluated_at = ?1, status = 'DONE', outcome = ?2,
                 tp1_hit_ts = ?3, sl_hit_ts = ?4, tp1_price = ?5, sl_price = ?6,
                 mfe_pct = ?7, mae_pct = ?8, max_price = ?9, min_price = ?10,
                 bu_hit_after_tp1 = ?11, post_tp1_max_pct = ?12, post_tp1_max_price = ?13
             WHERE signal_id = ?14",
            params![
                evaluated_at,
                result.outcome.as_str(),
                result.tp1_hit_ts,
                result.sl_hit_ts,
                result.tp1_price,
                result.sl_price,
                result.mfe_pct,
                result.mae_pct,
                result.max_price,
                result.min_price,
                result.bu_hit_after_tp1,
                result.post_tp1_max_pct,
                result.post_tp1_max_price,
                signal_id
            ]
        )?;
        Ok(())
    }

    pub fn update_trigger_eval_no_data(&self, signal_id: i64, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE signal_trigger_evaluations SET status = 'NO_DATA', evaluated_at = ?1 WHERE signal_id = ?2",
            params![now_ms, signal_id]
        )?;
        Ok(())
    }

    /// (signal_events, pending, done, no_data) over horizon evaluations.
    pub fn get_signal_event_counts(&self) -> Result<(i64, i64, i64, i64)> {
        let conn = self.conn.lock().unwrap();
        let events: i64 = conn.query_row("SELECT COUNT(*) FROM signal_events", [], |r| r.get(0))?;
        let count_for = |status: &str| -> Result<i64> {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM signal_evaluations WHERE status = ?1",
                params![status],
                |r| r.get(0)
            )?;
            Ok(n)
        };
        Ok((events, count_for("PENDING")?, count_for("DONE")?, count_for("NO_DATA")?))
    }

    /// Aggregate trigger-evaluation outcomes for reporting.
    pub fn trigger_summary(&self) -> Result<TriggerSummary> {
        let conn = self.conn.lock().unwrap();
        let total_signals: i64 = conn.query_row("SELECT COUNT(*) FROM signal_events", [], |r| r.get(0))?;
        let status_count = |status: &str| -> Result<i64> {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM signal_trigger_evaluations WHERE status = ?1",
                params![status],
                |r| r.get(0)
            )?;
            Ok(n)
        };
        let outcome_count = |outcome: &str| -> Result<i64> {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM signal_trigger_evaluations WHERE status = 'DONE' AND outcome = ?1",
                params![outcome],
                |r| r.get(0)
            )?;
            Ok(n)
        };
        let trigger_done = status_count("DONE")?;
        let trigger_no_data = status_count("NO_DATA")?;
        let trigger_pending = status_count("PENDING")?;
        let outcome_tp1_first = outcome_count("TP1_FIRST")?;
        let outcome_sl_first = outcome_count("SL_FIRST")?;
        let outcome_neither = outcome_count("NEITHER")?;

        let bu_hits: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signal_trigger_evaluations
             WHERE status = 'DONE' AND outcome = 'TP1_FIRST' AND bu_hit_after_tp1 = 1",
            [],
            |r| r.get(0)
        )?;

        let mut pcts: Vec<f64> = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT post_tp1_max_pct FROM signal_trigger_evaluations
                 WHERE status = 'DONE' AND outcome = 'TP1_FIRST' AND post_tp1_max_pct IS NOT NULL"
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, f64>(0))?;
            for row in rows {
                pcts.push(row?);
            }
        }
        let (avg, median) = if pcts.is_empty() {
            (None, None)
        } else {
            let avg = pcts.iter().sum::<f64>() / (pcts.len() as f64);
            let mut sorted = pcts.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            let median = if sorted.len() % 2 == 0 {
                (sorted[mid] + sorted[mid - 1]) / 2.0
            } else {
                sorted[mid]
            };
            (Some(avg), Some(median))
        };

        let mut top_post_tp1 = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT s.pair_address, s.entry_price, t.post_tp1_max_pct, p.url
                 FROM signal_trigger_evaluations t
                 JOIN signal_events s ON s.id = t.signal_id
                 LEFT JOIN pairs p ON p.pair_address = s.pair_address
                 WHERE t.status = 'DONE' AND t.outcome = 'TP1_FIRST' AND t.post_tp1_max_pct IS NOT NULL
                 ORDER BY t.post_tp1_max_pct DESC
                 LIMIT 10"
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(TriggerTopEntry {
                    pair_address: r.get(0)?,
                    entry_price: r.get(1)?,
                    post_tp1_max_pct: r.get(2)?,
                    url: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })?;
            for row in rows {
                top_post_tp1.push(row?);
            }
        }

        let rate = |num: i64, den: i64| if den > 0 { (num as f64) / (den as f64) } else { 0.0 };
        Ok(TriggerSummary {
            total_signals,
            trigger_done,
            trigger_no_data,
            trigger_pending,
            outcome_tp1_first,
            outcome_sl_first,
            outcome_neither,
            tp1_hit_rate: rate(outcome_tp1_first, trigger_done),
            sl_first_rate: rate(outcome_sl_first, trigger_done),
            bu_after_tp1_rate: rate(bu_hits, outcome_tp1_first),
            post_tp1_max_pct_avg: avg,
            post_tp1_max_pct_median: median,
            top_post_tp1,
        })
    }

    /// Upsert the singleton heartbeat row (id=1). Only the fields set in
    /// `update` change; an empty-string last_error clears last_error_at_ms.
    pub fn update_app_status(&self, update: &AppStatusUpdate) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM app_status WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            conn.execute(
                "INSERT INTO app_status
                 (id, updated_at_ms, last_cycle_started_at_ms, last_cycle_finished_at_ms,
                  last_error, last_error_at_ms, counters_json)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    now_ms,
                    update.last_cycle_started_at_ms.unwrap_or(now_ms),
                    update.last_cycle_finished_at_ms,
                    update.last_error,
                    update.last_error_at_ms,
                    update.counters_json
                ]
            )?;
            return Ok(());
        }

        let mut sets = vec!["updated_at_ms = ?".to_string()];
        let mut params_vec: Vec<rusqlite::types::Value> = vec![now_ms.into()];
        if let Some(v) = update.last_cycle_started_at_ms {
            sets.push("last_cycle_started_at_ms = ?".to_string());
            params_vec.push(v.into());
        }
        if let Some(v) = update.last_cycle_finished_at_ms {
            sets.push("last_cycle_finished_at_ms = ?".to_string());
            params_vec.push(v.into());
        }
        if let Some(ref v) = update.last_error {
            sets.push("last_error = ?".to_string());
            params_vec.push(v.clone().into());
            if v.is_empty() {
                sets.push("last_error_at_ms = NULL".to_string());
            }
        }
        if let Some(v) = update.last_error_at_ms {
            sets.push("last_error_at_ms = ?".to_string());
            params_vec.push(v.into());
        }
        if let Some(ref v) = update.counters_json {
            sets.push("counters_json = ?".to_string());
            params_vec.push(v.clone().into());
        }
        let sql = format!("UPDATE app_status SET {} WHERE id = 1", sets.join(", "));
        conn.execute(&sql, rusqlite::params_from_iter(params_vec))?;
        Ok(())
    }

    pub fn get_app_status(&self) -> Result<Option<AppStatus>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT updated_at_ms, last_cycle_started_at_ms, last_cycle_finished_at_ms,
                        last_error, last_error_at_ms, counters_json
                 FROM app_status WHERE id = 1",
                [],
                |r| {
                    Ok(AppStatus {
                        updated_at_ms: r.get(0)?,
                        last_cycle_started_at_ms: r.get(1)?,
                        last_cycle_finished_at_ms: r.get(2)?,
                        last_error: r.get(3)?,
                        last_error_at_ms: r.get(4)?,
                        counters_json: r.get(5)?,
                    })
                }
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_signal_event_enqueues_everything_atomically() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .record_signal_event("PAIR1", 1_700_000_000_000, 1.0, 2.5, 55.0, 55.0, None, &[
                1800, 3600, 7200,
            ])
            .unwrap();
        assert!(id > 0);
        let (events, pending, done, no_data) = db.get_signal_event_counts().unwrap();
        assert_eq!((events, pending, done, no_data), (1, 3, 0, 0));
        let trig = db.iter_pending_trigger_evals(10).unwrap();
        assert_eq!(trig.len(), 1);
        assert_eq!(trig[0].signal_id, id);
        assert_eq!(trig[0].entry_price, 1.0);
    }

    #[test]
    fn pending_evaluations_become_due_by_horizon() {
        let db = Database::open_in_memory().unwrap();
        let signal_ts = 1_700_000_000_000i64;
        db.record_signal_event("PAIR1", signal_ts, 1.0, 2.0, 50.0, 50.0, None, &[1800, 3600]).unwrap();

        let due = db.iter_pending_evaluations(signal_ts + 1799 * 1000).unwrap();
        assert!(due.is_empty());
        let due = db.iter_pending_evaluations(signal_ts + 1800 * 1000).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].horizon_sec, 1800);
        let due = db.iter_pending_evaluations(signal_ts + 3600 * 1000).unwrap();
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn evaluation_updates_select_only_pending() {
        let db = Database::open_in_memory().unwrap();
        let signal_ts = 1_700_000_000_000i64;
        db.record_signal_event("PAIR1", signal_ts, 1.0, 2.0, 50.0, 50.0, None, &[1800]).unwrap();
        let due = db.iter_pending_evaluations(signal_ts + 1_800_000).unwrap();
        let metrics = HorizonMetrics {
            price_end: 1.2,
            max_price: 1.5,
            min_price: 0.9,
            return_end_pct: 20.0,
            max_return_pct: 50.0,
            min_return_pct: -10.0,
        };
        db.update_evaluation_done(due[0].eval_id, signal_ts + 1_800_000, &metrics).unwrap();
        assert!(db.iter_pending_evaluations(signal_ts + 10_000_000).unwrap().is_empty());
        let (_, pending, done, _) = db.get_signal_event_counts().unwrap();
        assert_eq!((pending, done), (0, 1));
    }

    #[test]
    fn trigger_eval_done_and_summary() {
        let db = Database::open_in_memory().unwrap();
        let signal_ts = 1_700_000_000_000i64;
        let id = db.record_signal_event("PAIR1", signal_ts, 100.0, 250.0, 60.0, 60.0, None, &[]).unwrap();
        let result = TriggerEvalResult {
            outcome: TriggerOutcome::Tp1First,
            tp1_hit_ts: Some(signal_ts + 1000),
            sl_hit_ts: None,
            tp1_price: Some(140.0),
            sl_price: None,
            mfe_pct: Some(100.0),
            mae_pct: Some(0.0),
            max_price: Some(200.0),
            min_price: Some(100.0),
            bu_hit_after_tp1: Some(1),
            post_tp1_max_pct: Some(100.0),
            post_tp1_max_price: Some(200.0),
        };
        db.update_trigger_eval_done(id, signal_ts + 10_000, &result).unwrap();
        assert!(db.iter_pending_trigger_evals(10).unwrap().is_empty());

        let summary = db.trigger_summary().unwrap();
        assert_eq!(summary.total_signals, 1);
        assert_eq!(summary.outcome_tp1_first, 1);
        assert_eq!(summary.tp1_hit_rate, 1.0);
        assert_eq!(summary.bu_after_tp1_rate, 1.0);
        assert_eq!(summary.post_tp1_max_pct_avg, Some(100.0));
        assert_eq!(summary.top_post_tp1.len(), 1);
    }

    #[test]
    fn cooldown_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_last_signal_at("P").unwrap(), None);
        db.set_signal_cooldown("P", 42).unwrap();
        assert_eq!(db.get_last_signal_at("P").unwrap(), Some(42));
        db.set_signal_cooldown("P", 43).unwrap();
        assert_eq!(db.get_last_signal_at("P").unwrap(), Some(43));
    }

    #[test]
    fn strategy_decision_mirrors_latest() {
        let db = Database::open_in_memory().unwrap();
        db
            .insert_strategy_decision("P", "WATCHLIST_L2", Some(1.0), Some(2.0), Some(40.0), None, 100)
            .unwrap();
        db
            .insert_strategy_decision("P", "SIGNAL", Some(0.9), Some(2.0), Some(55.0), Some("{}"), 200)
            .unwrap();
        let latest = db.get_strategy_latest("P").unwrap().unwrap();
        assert_eq!(latest.0, "SIGNAL");
        assert_eq!(latest.1, 200);
    }

    #[test]
    fn app_status_partial_updates() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_app_status().unwrap().is_none());

        db
            .update_app_status(
                &(AppStatusUpdate {
                    last_cycle_started_at_ms: Some(1000),
                    ..Default::default()
                })
            )
            .unwrap();
        let status = db.get_app_status().unwrap().unwrap();
        assert_eq!(status.last_cycle_started_at_ms, Some(1000));
        assert_eq!(status.last_cycle_finished_at_ms, None);

        db
            .update_app_status(
                &(AppStatusUpdate {
                    last_error: Some("boom".to_string()),
                    last_error_at_ms: Some(2000),
                    ..Default::default()
                })
            )
            .unwrap();
        let status = db.get_app_status().unwrap().unwrap();
        assert_eq!(status.last_cycle_started_at_ms, Some(1000));
        assert_eq!(status.last_error.as_deref(), Some("boom"));

        // Clearing the error also clears its timestamp.
        db
            .update_app_status(
                &(AppStatusUpdate {
                    last_error: Some(String::new()),
                    ..Default::default()
                })
            )
            .unwrap();
        let status = db.get_app_status().unwrap().unwrap();
        assert_eq!(status.last_error.as_deref(), Some(""));
        assert_eq!(status.last_error_at_ms, None);
    }
}
