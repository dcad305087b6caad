// poller.rs - Continuous collection loop (collect-new)
//
// Each cycle: token profiles -> pairs by token -> dedup -> persist ->
// auto-prune, with the app_status heartbeat stamped around it. A first
// Ctrl+C lets the current cycle finish; a second one kills the process.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::{ Duration, Instant };

use crate::client::DexScreenerClient;
use crate::collector::Collector;
use crate::config;
use crate::database::strategy::AppStatusUpdate;
use crate::database::Database;
use crate::logger::{ log, LogTag };

/// Set by the first Ctrl+C: finish the current cycle, then exit.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Loop knobs, filled from CLI flags.
pub struct PollerOptions {
    pub interval_sec: f64,
    pub limit_per_cycle: Option<usize>,
    pub auto_prune: bool,
    pub prune_max_age_hours: f64,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval_sec: config::COLLECT_NEW_INTERVAL_SEC,
            limit_per_cycle: None,
            auto_prune: true,
            prune_max_age_hours: config::DEFAULT_PRUNE_MAX_AGE_HOURS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleCounters {
    pub cycles: u64,
    pub candidates_tokens: u64,
    pub candidates_pairs: u64,
    pub new: u64,
    pub skipped: u64,
    pub processed: u64,
    pub snapshots: u64,
    pub errors: u64,
}

impl CycleCounters {
    fn absorb(&mut self, other: &CycleCounters) {
        self.cycles += other.cycles;
        self.candidates_tokens += other.candidates_tokens;
        self.candidates_pairs += other.candidates_pairs;
        self.new += other.new;
        self.skipped += other.skipped;
        self.processed += other.processed;
        self.snapshots += other.snapshots;
        self.errors += other.errors;
    }
}

/// Spawn the two-stage Ctrl+C listener: flag first, hard exit second.
pub fn install_shutdown_handler() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log(
                LogTag::System,
                "WARN",
                "Shutdown signal received, finishing current cycle. Press Ctrl+C again to force kill."
            );
            SHUTDOWN.store(true, Ordering::SeqCst);
            if tokio::signal::ctrl_c().await.is_ok() {
                log(LogTag::System, "ERROR", "Second Ctrl+C detected, forcing immediate exit.");
                std::process::exit(130);
            }
        }
    });
}

/// Sleep in short slices so a shutdown request cuts the wait short.
pub async fn sleep_with_shutdown(seconds: f64) {
    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline && !SHUTDOWN.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(remaining.min(Duration::from_millis(250))).await;
    }
}

async fn run_cycle(
    client: &DexScreenerClient,
    db: &Database,
    collector: &Collector<'_>,
    opts: &PollerOptions,
    cycle_num: u64
) -> Result<CycleCounters> {
    let mut counters = CycleCounters { cycles: 1, ..Default::default() };

    let mut token_addresses = client.get_latest_token_profiles().await?;
    counters.candidates_tokens = token_addresses.len() as u64;
    if let Some(limit) = opts.limit_per_cycle {
        if limit > 0 {
            token_addresses.truncate(limit);
        }
    }

    if token_addresses.is_empty() {
        log(
            LogTag::Collector,
            "INFO",
            &format!("collect-new cycle {}: no token candidates from API", cycle_num)
        );
        return Ok(counters);
    }

    let raw_pairs = client.get_pairs_by_token_addresses_batched(&token_addresses).await;
    counters.candidates_pairs = raw_pairs.len() as u64;
    let known = db.get_known_pair_addresses()?;
    let (processed, errors, skipped) = collector.collect_from_raw_pairs(&raw_pairs, &known);
    counters.processed = processed;
    counters.snapshots = processed;
    counters.skipped = skipped;
    counters.new = (raw_pairs.len() as u64) - skipped;
    counters.errors = errors;
    Ok(counters)
}

fn log_counters(label: &str, c: &CycleCounters) {
    log(
        LogTag::Collector,
        "INFO",
        &format!(
            "{} | cycles={} candidates_tokens={} candidates_pairs={} new={} skipped={} processed={} snapshots={} errors={}",
            label,
            c.cycles,
            c.candidates_tokens,
            c.candidates_pairs,
            c.new,
            c.skipped,
            c.processed,
            c.snapshots,
            c.errors
        )
    );
}

/// The collect-new loop. Returns when a shutdown has been requested.
pub async fn run_collect_new(
    client: &DexScreenerClient,
    db: &Database,
    opts: &PollerOptions
) -> Result<()> {
    let collector = Collector::new(client, db);
    let mut totals = CycleCounters::default();
    let mut cycle_num: u64 = 0;

    while !SHUTDOWN.load(Ordering::SeqCst) {
        cycle_num += 1;
        let cycle_started = chrono::Utc::now().timestamp_millis();
        let _ = db.update_app_status(
            &(AppStatusUpdate {
                last_cycle_started_at_ms: Some(cycle_started),
                ..Default::default()
            })
        );

        match run_cycle(client, db, &collector, opts, cycle_num).await {
            Ok(counters) => {
                totals.absorb(&counters);
                log_counters(&format!("collect-new cycle {}", cycle_num), &counters);
                log_counters("collect-new totals", &totals);

                if opts.auto_prune {
                    match db.prune_by_pair_age(opts.prune_max_age_hours, false, false) {
                        Ok((s_cnt, p_cnt, t_cnt)) => {
                            log(
                                LogTag::Store,
                                "INFO",
                                &format!("auto-prune: snapshots={} pairs={} tokens={}", s_cnt, p_cnt, t_cnt)
                            );
                        }
                        Err(e) => {
                            log(LogTag::Store, "WARN", &format!("auto-prune skipped: {}", e));
                        }
                    }
                    match db.prune_dump_watchlist(config::DUMP_WATCHLIST_TTL_HOURS) {
                        Ok(removed) if removed > 0 => {
                            log(
                                LogTag::Store,
                                "INFO",
                                &format!("dump-watchlist prune: removed {}", removed)
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log(LogTag::Store, "WARN", &format!("dump-watchlist prune skipped: {}", e));
                        }
                    }
                }

                let counters_json = serde_json::to_string(&totals).unwrap_or_default();
                let _ = db.update_app_status(
                    &(AppStatusUpdate {
                        last_cycle_finished_at_ms: Some(chrono::Utc::now().timestamp_millis()),
                        last_error: Some(String::new()),
                        counters_json: Some(counters_json),
                        ..Default::default()
                    })
                );
            }
            Err(e) => {
                totals.errors += 1;
                log(LogTag::Collector, "ERROR", &format!("collect-new cycle {} failed: {}", cycle_num, e));
                let _ = db.update_app_status(
                    &(AppStatusUpdate {
                        last_error: Some(e.to_string()),
                        last_error_at_ms: Some(chrono::Utc::now().timestamp_millis()),
                        ..Default::default()
                    })
                );
            }
        }

        if SHUTDOWN.load(Ordering::SeqCst) {
            break;
        }
        sleep_with_shutdown(opts.interval_sec).await;
    }

    log(
        LogTag::Collector,
        "INFO",
        &format!(
            "collect-new stopped | total_cycles={} total_processed={} total_snapshots={} total_errors={}",
            totals.cycles,
            totals.processed,
            totals.snapshots,
            totals.errors
        )
    );
    Ok(())
}
