// post_analyzer.rs - Horizon-based signal outcome evaluation
//
// Walks PENDING signal_evaluations whose horizon has elapsed and grades
// them from the snapshot history inside the strict window
// [signal_ts, signal_ts + horizon]. Re-runs are harmless: only PENDING
// rows are selected.

use anyhow::Result;

use crate::database::strategy::HorizonMetrics;
use crate::database::{ normalize_since_ts, Database };
use crate::logger::{ log, LogTag };

/// Process all due PENDING evaluations at now_ms.
/// Returns (done_count, no_data_count).
pub fn run_post_analysis(db: &Database, now_ms: i64) -> Result<(u64, u64)> {
    let snapshot_is_ms = db.snapshot_unit_is_ms()?;
    let mut done: u64 = 0;
    let mut no_data: u64 = 0;

    for ev in db.iter_pending_evaluations(now_ms)? {
        let ts_is_ms = ev.signal_ts > 1_000_000_000_000;
        let horizon_unit = if ts_is_ms { ev.horizon_sec * 1000 } else { ev.horizon_sec };
        let since = normalize_since_ts(ev.signal_ts, snapshot_is_ms);
        let until = normalize_since_ts(ev.signal_ts + horizon_unit, snapshot_is_ms);

        let points = db.fetch_price_points_in(&ev.pair_address, since, until)?;
        if points.is_empty() || ev.entry_price <= 0.0 {
            db.update_evaluation_no_data(ev.eval_id)?;
            no_data += 1;
            continue;
        }

        // One point or more: end = last, and a single point collapses
        // max = min = end.
        let price_end = points[points.len() - 1].1;
        let max_price = points.iter().map(|(_, p)| *p).fold(f64::MIN, f64::max);
        let min_price = points.iter().map(|(_, p)| *p).fold(f64::MAX, f64::min);
        let pct = |p: f64| ((p - ev.entry_price) / ev.entry_price) * 100.0;

        db.update_evaluation_done(ev.eval_id, now_ms, &(HorizonMetrics {
            price_end,
            max_price,
            min_price,
            return_end_pct: pct(price_end),
            max_return_pct: pct(max_price),
            min_return_pct: pct(min_price),
        }))?;
        done += 1;
    }

    if done + no_data > 0 {
        log(
            LogTag::Analyzer,
            "INFO",
            &format!("post-analysis: done={} no_data={}", done, no_data)
        );
    }
    Ok((done, no_data))
}
