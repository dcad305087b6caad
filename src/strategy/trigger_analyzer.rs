// trigger_analyzer.rs - Trigger-based signal outcome evaluation
//
// For each PENDING trigger evaluation, walk the pair's price series in
// [signal_ts, signal_ts + 24h] once and decide which of TP1 (+40%) and SL
// (-50%) was hit first, plus excursion and break-even-after-TP1 metrics.

use anyhow::Result;

use crate::config;
use crate::database::strategy::{ TriggerEvalResult, TriggerOutcome };
use crate::database::{ normalize_since_ts, Database };
use crate::logger::{ log, LogTag };

/// Counters for one analyzer run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerRunStats {
    pub processed: u64,
    pub no_data: u64,
}

/// Process up to `limit` PENDING trigger evaluations at now_ms.
pub fn run_trigger_analysis(db: &Database, now_ms: i64, limit: u32) -> Result<TriggerRunStats> {
    let snapshot_is_ms = db.snapshot_unit_is_ms()?;
    let mut stats = TriggerRunStats::default();

    for ev in db.iter_pending_trigger_evals(limit)? {
        if ev.entry_price <= 0.0 {
            db.update_trigger_eval_no_data(ev.signal_id, now_ms)?;
            stats.no_data += 1;
            continue;
        }

        let since = normalize_since_ts(ev.signal_ts, snapshot_is_ms);
        let until = if snapshot_is_ms {
            ev.signal_ts + config::TRIGGER_EVAL_MAX_AGE_SEC * 1000
        } else {
            let base = if ev.signal_ts > 1_000_000_000_000 {
                ev.signal_ts / 1000
            } else {
                ev.signal_ts
            };
            base + config::TRIGGER_EVAL_MAX_AGE_SEC
        };

        let points = db.fetch_price_points_in(&ev.pair_address, since, until)?;
        if points.len() < config::TRIGGER_EVAL_MIN_SNAPSHOTS {
            db.update_trigger_eval_no_data(ev.signal_id, now_ms)?;
            stats.no_data += 1;
            continue;
        }

        let result = evaluate_triggers(ev.entry_price, &points);
        db.update_trigger_eval_done(ev.signal_id, now_ms, &result)?;
        stats.processed += 1;
    }

    if stats.processed + stats.no_data > 0 {
        log(
            LogTag::Analyzer,
            "INFO",
            &format!("trigger-analysis: done={} no_data={}", stats.processed, stats.no_data)
        );
    }
    Ok(stats)
}

/// Single pass over an ascending (ts, price) series.
pub fn evaluate_triggers(entry_price: f64, points: &[(i64, f64)]) -> TriggerEvalResult {
    let mut tp1_hit_ts: Option<i64> = None;
    let mut sl_hit_ts: Option<i64> = None;
    let mut tp1_price: Option<f64> = None;
    let mut sl_price: Option<f64> = None;

    let pct = |price: f64| ((price - entry_price) / entry_price) * 100.0;

    let mut mfe_pct = f64::MIN;
    let mut mae_pct = f64::MAX;
    let mut max_price = f64::MIN;
    let mut min_price = f64::MAX;

    for (ts, price) in points {
        let p = pct(*price);
        mfe_pct = mfe_pct.max(p);
        mae_pct = mae_pct.min(p);
        max_price = max_price.max(*price);
        min_price = min_price.min(*price);
        if tp1_hit_ts.is_none() && p >= config::TP1_PCT {
            tp1_hit_ts = Some(*ts);
            tp1_price = Some(*price);
        }
        if sl_hit_ts.is_none() && p <= config::SL_PCT {
            sl_hit_ts = Some(*ts);
            sl_price = Some(*price);
        }
    }

    let outcome = match (tp1_hit_ts, sl_hit_ts) {
        (Some(tp1), Some(sl)) => {
            if tp1 < sl {
                TriggerOutcome::Tp1First
            } else if sl < tp1 {
                TriggerOutcome::SlFirst
            } else {
                // Same timestamp for both triggers is undecidable.
                TriggerOutcome::Neither
            }
        }
        (Some(_), None) => TriggerOutcome::Tp1First,
        (None, Some(_)) => TriggerOutcome::SlFirst,
        (None, None) => TriggerOutcome::Neither,
    };

    let mut bu_hit_after_tp1: Option<i64> = None;
    let mut post_tp1_max_pct: Option<f64> = None;
    let mut post_tp1_max_price: Option<f64> = None;

    if outcome == TriggerOutcome::Tp1First {
        if let Some(tp1_ts) = tp1_hit_ts {
            let after: Vec<&(i64, f64)> = points
                .iter()
                .filter(|(ts, _)| *ts >= tp1_ts)
                .collect();
            if after.is_empty() {
                bu_hit_after_tp1 = Some(0);
                post_tp1_max_pct = tp1_price.map(pct);
                post_tp1_max_price = tp1_price;
            } else {
                bu_hit_after_tp1 = Some(
                    if after.iter().any(|(_, price)| *price <= entry_price) { 1 } else { 0 }
                );
                let best = after
                    .iter()
                    .map(|(_, price)| *price)
                    .fold(f64::MIN, f64::max);
                post_tp1_max_pct = Some(pct(best));
                post_tp1_max_price = Some(best);
            }
        }
    }

    TriggerEvalResult {
        outcome,
        tp1_hit_ts,
        sl_hit_ts,
        tp1_price,
        sl_price,
        mfe_pct: Some(mfe_pct),
        mae_pct: Some(mae_pct),
        max_price: Some(max_price),
        min_price: Some(min_price),
        bu_hit_after_tp1,
        post_tp1_max_pct,
        post_tp1_max_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::test_support::snapshot;

    fn print_at(db: &Database, pair: &str, ts: i64, price: f64) {
        db.insert_snapshot(&snapshot(pair, ts, Some(price))).unwrap();
    }

    fn trigger_row(db: &Database, signal_id: i64) -> (String, Option<String>, Option<i64>, Option<f64>) {
        let conn = db.conn.lock().unwrap();
        conn
            .query_row(
                "SELECT status, outcome, bu_hit_after_tp1, post_tp1_max_pct
                 FROM signal_trigger_evaluations WHERE signal_id = ?1",
                rusqlite::params![signal_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            )
            .unwrap()
    }

    #[test]
    fn tp1_first_with_break_even_and_post_max() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        let id = db.record_signal_event("P", t0, 100.0, 250.0, 55.0, 55.0, None, &[]).unwrap();
        for (i, price) in [100.0, 120.0, 140.0, 100.0, 200.0].iter().enumerate() {
            print_at(&db, "P", t0 + (i as i64) * 1000, *price);
        }

        let stats = run_trigger_analysis(&db, t0 + 10_000, 100).unwrap();
        assert_eq!(stats.processed, 1);

        let conn = db.conn.lock().unwrap();
        let (outcome, tp1_ts, tp1_price, bu, post_max, mfe, mae): (
            String,
            i64,
            f64,
            i64,
            f64,
            f64,
            f64,
        ) = conn
            .query_row(
                "SELECT outcome, tp1_hit_ts, tp1_price, bu_hit_after_tp1, post_tp1_max_pct, mfe_pct, mae_pct
                 FROM signal_trigger_evaluations WHERE signal_id = ?1",
                rusqlite::params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?))
            )
            .unwrap();
        assert_eq!(outcome, "TP1_FIRST");
        assert_eq!(tp1_ts, t0 + 2000);
        assert_eq!(tp1_price, 140.0);
        assert_eq!(bu, 1);
        assert!((post_max - 100.0).abs() < 1e-9);
        assert!((mfe - 100.0).abs() < 1e-9);
        assert!((mae - 0.0).abs() < 1e-9);
    }

    #[test]
    fn sl_first_on_a_straight_dump() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        let id = db.record_signal_event("P", t0, 100.0, 250.0, 55.0, 55.0, None, &[]).unwrap();
        for (i, price) in [100.0, 70.0, 49.0].iter().enumerate() {
            print_at(&db, "P", t0 + (i as i64) * 1000, *price);
        }

        run_trigger_analysis(&db, t0 + 10_000, 100).unwrap();
        let (status, outcome, _, _) = trigger_row(&db, id);
        assert_eq!(status, "DONE");
        assert_eq!(outcome.as_deref(), Some("SL_FIRST"));
    }

    #[test]
    fn single_point_is_no_data() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        let id = db.record_signal_event("P", t0, 100.0, 250.0, 55.0, 55.0, None, &[]).unwrap();
        print_at(&db, "P", t0, 100.0);

        let stats = run_trigger_analysis(&db, t0 + 10_000, 100).unwrap();
        assert_eq!(stats.no_data, 1);
        let (status, outcome, _, _) = trigger_row(&db, id);
        assert_eq!(status, "NO_DATA");
        assert_eq!(outcome, None);
    }

    #[test]
    fn neither_when_no_trigger_hits() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        let id = db.record_signal_event("P", t0, 100.0, 250.0, 55.0, 55.0, None, &[]).unwrap();
        for (i, price) in [100.0, 110.0, 95.0, 105.0].iter().enumerate() {
            print_at(&db, "P", t0 + (i as i64) * 1000, *price);
        }

        run_trigger_analysis(&db, t0 + 10_000, 100).unwrap();
        let (_, outcome, bu, _) = trigger_row(&db, id);
        assert_eq!(outcome.as_deref(), Some("NEITHER"));
        assert_eq!(bu, None);
    }

    #[test]
    fn tp1_before_sl_even_when_both_hit() {
        let entry = 100.0;
        let points = vec![(0i64, 100.0), (1, 145.0), (2, 40.0)];
        let result = evaluate_triggers(entry, &points);
        assert_eq!(result.outcome, TriggerOutcome::Tp1First);
        assert_eq!(result.tp1_hit_ts, Some(1));
        assert_eq!(result.sl_hit_ts, Some(2));
        assert!(result.tp1_hit_ts.unwrap() < result.sl_hit_ts.unwrap());
        // After TP1 the price fell through entry: break-even hit.
        assert_eq!(result.bu_hit_after_tp1, Some(1));
    }

    #[test]
    fn sl_then_late_tp1_is_sl_first() {
        let entry = 100.0;
        let points = vec![(0i64, 100.0), (1, 45.0), (2, 150.0)];
        let result = evaluate_triggers(entry, &points);
        assert_eq!(result.outcome, TriggerOutcome::SlFirst);
        assert_eq!(result.bu_hit_after_tp1, None);
        assert_eq!(result.mfe_pct, Some(50.0));
        assert_eq!(result.mae_pct, Some(-55.0));
    }

    #[test]
    fn window_excludes_points_past_one_day() {
        let db = Database::open_in_memory().unwrap();
        let t0 = 1_700_000_000_000i64;
        let id = db.record_signal_event("P", t0, 100.0, 250.0, 55.0, 55.0, None, &[]).unwrap();
        print_at(&db, "P", t0, 100.0);
        print_at(&db, "P", t0 + 1000, 110.0);
        // +40% print lands after the 24h evaluation window.
        print_at(&db, "P", t0 + (config::TRIGGER_EVAL_MAX_AGE_SEC + 10) * 1000, 150.0);

        run_trigger_analysis(&db, t0 + 10_000, 100).unwrap();
        let (_, outcome, _, _) = trigger_row(&db, id);
        assert_eq!(outcome.as_deref(), Some("NEITHER"));
    }
}
