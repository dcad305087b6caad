// main.rs - CLI front-end: collect, collect-new, prune, export,
// dump-watchlist, dump-watchlist-export, self-check, check, strategy.
// Exit codes: 0 OK, 1 operational failure, 2 invariant failure.

use clap::{ Parser, Subcommand };
use std::path::Path;
use std::sync::atomic::Ordering;

use solscreener::client::DexScreenerClient;
use solscreener::collector::{ parse_addresses_input, Collector };
use solscreener::config;
use solscreener::database::Database;
use solscreener::export;
use solscreener::logger::{ log, LogTag };
use solscreener::models::from_api_pair;
use solscreener::poller::{ self, PollerOptions, SHUTDOWN };
use solscreener::process_lock;
use solscreener::strategy::engine::{ ScreenEntry, ScreenerReport, StrategyEngine };
use solscreener::strategy::post_analyzer::run_post_analysis;
use solscreener::strategy::trigger_analyzer::run_trigger_analysis;

#[derive(Parser)]
#[command(
    name = "solscreener",
    version,
    about = "Collect Solana pair data from DexScreener and screen for drawdown reversals"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect pairs once by token or pair addresses
    Collect {
        /// SQLite database path
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        /// Token addresses file or comma-separated list
        #[arg(long)]
        tokens: Option<String>,
        /// Pair addresses file or comma-separated list
        #[arg(long)]
        pairs: Option<String>,
        /// HTTP timeout seconds
        #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SEC)]
        timeout: f64,
        /// Max HTTP retries
        #[arg(long, default_value_t = config::DEFAULT_MAX_RETRIES)]
        max_retries: u32,
        /// Max requests per second
        #[arg(long, default_value_t = config::DEFAULT_RATE_LIMIT_RPS)]
        rate_limit_rps: f64,
        /// Disable auto-prune after a successful collect
        #[arg(long)]
        no_prune: bool,
        /// Max age in hours for auto-prune
        #[arg(long, default_value_t = config::DEFAULT_PRUNE_MAX_AGE_HOURS)]
        prune_max_age_hours: f64,
    },
    /// Continuously collect new pairs from token profiles; exit with Ctrl+C
    CollectNew {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        /// Seconds between cycles (token-profiles rate limit is 60/min)
        #[arg(long, default_value_t = config::COLLECT_NEW_INTERVAL_SEC)]
        interval_sec: f64,
        /// Max token candidates per cycle
        #[arg(long)]
        limit_per_cycle: Option<usize>,
        #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SEC)]
        timeout: f64,
        #[arg(long, default_value_t = config::DEFAULT_MAX_RETRIES)]
        max_retries: u32,
        #[arg(long, default_value_t = config::DEFAULT_RATE_LIMIT_RPS)]
        rate_limit_rps: f64,
        /// Disable auto-prune after each cycle
        #[arg(long)]
        no_prune: bool,
        #[arg(long, default_value_t = config::DEFAULT_PRUNE_MAX_AGE_HOURS)]
        prune_max_age_hours: f64,
    },
    /// Remove pairs older than N hours (by creation time) and orphan tokens
    Prune {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        #[arg(long, default_value_t = config::DEFAULT_PRUNE_MAX_AGE_HOURS)]
        max_age_hours: f64,
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
        /// Run VACUUM after pruning
        #[arg(long)]
        vacuum: bool,
    },
    /// Export a table to JSON or CSV
    Export {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        #[arg(long, value_parser = ["json", "csv"])]
        format: String,
        #[arg(long)]
        out: String,
        #[arg(long, default_value = "snapshots", value_parser = ["snapshots", "pairs", "tokens"])]
        table: String,
    },
    /// View dump watchlist entries
    DumpWatchlist {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        #[arg(long, value_parser = ["DUMPING", "BOTTOMING", "SIGNAL"])]
        state: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Export the dump watchlist to JSON or CSV
    DumpWatchlistExport {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        #[arg(long, value_parser = ["json", "csv"])]
        format: String,
        #[arg(long)]
        out: String,
        #[arg(long, value_parser = ["DUMPING", "BOTTOMING", "SIGNAL"])]
        state: Option<String>,
    },
    /// Check store invariants; exit 0=OK, 2=FAIL
    SelfCheck {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        /// If FAIL, prune by pair age and re-check
        #[arg(long)]
        fix: bool,
    },
    /// Smoke the full chain: API -> normalize -> SQLite -> read -> serialize
    Check {
        #[arg(long, default_value_t = config::CHECK_TIMEOUT_SEC)]
        timeout: f64,
        #[arg(long, default_value_t = config::CHECK_MAX_RETRIES)]
        max_retries: u32,
        #[arg(long, default_value_t = config::CHECK_RATE_LIMIT_RPS)]
        rate_limit_rps: f64,
    },
    /// Run the drawdown screener and the outcome analyzers
    Strategy {
        #[arg(long, default_value = config::DEFAULT_DB)]
        db: String,
        /// Run once and exit (default)
        #[arg(long)]
        once: bool,
        /// Run every N seconds until Ctrl+C
        #[arg(long = "loop", value_name = "SEC")]
        loop_sec: Option<f64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Collect {
            db,
            tokens,
            pairs,
            timeout,
            max_retries,
            rate_limit_rps,
            no_prune,
            prune_max_age_hours,
        } =>
            cmd_collect(
                &db,
                tokens,
                pairs,
                timeout,
                max_retries,
                rate_limit_rps,
                no_prune,
                prune_max_age_hours
            ).await,
        Commands::CollectNew {
            db,
            interval_sec,
            limit_per_cycle,
            timeout,
            max_retries,
            rate_limit_rps,
            no_prune,
            prune_max_age_hours,
        } =>
            cmd_collect_new(
                &db,
                interval_sec,
                limit_per_cycle,
                timeout,
                max_retries,
                rate_limit_rps,
                no_prune,
                prune_max_age_hours
            ).await,
        Commands::Prune { db, max_age_hours, dry_run, vacuum } =>
            cmd_prune(&db, max_age_hours, dry_run, vacuum),
        Commands::Export { db, format, out, table } => cmd_export(&db, &format, &out, &table),
        Commands::DumpWatchlist { db, state, limit } =>
            cmd_dump_watchlist(&db, state.as_deref(), limit),
        Commands::DumpWatchlistExport { db, format, out, state } =>
            cmd_dump_watchlist_export(&db, &format, &out, state.as_deref()),
        Commands::SelfCheck { db, fix } => cmd_self_check(&db, fix),
        Commands::Check { timeout, max_retries, rate_limit_rps } =>
            cmd_check(timeout, max_retries, rate_limit_rps).await,
        Commands::Strategy { db, once: _, loop_sec } => cmd_strategy(&db, loop_sec).await,
    };
    std::process::exit(code);
}

fn open_existing_db(db_path: &str) -> Option<Database> {
    if !Path::new(db_path).exists() {
        log(LogTag::System, "ERROR", &format!("Database not found: {}", db_path));
        return None;
    }
    match Database::open(db_path) {
        Ok(db) => Some(db),
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Failed to open database: {}", e));
            None
        }
    }
}

fn auto_prune(db: &Database, max_age_hours: f64) {
    match db.prune_by_pair_age(max_age_hours, false, false) {
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
            log(LogTag::Store, "INFO", &format!("dump-watchlist prune: removed {}", removed));
        }
        Ok(_) => {}
        Err(e) => {
            log(LogTag::Store, "WARN", &format!("dump-watchlist prune skipped: {}", e));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_collect(
    db_path: &str,
    tokens: Option<String>,
    pairs: Option<String>,
    timeout: f64,
    max_retries: u32,
    rate_limit_rps: f64,
    no_prune: bool,
    prune_max_age_hours: f64
) -> i32 {
    let db = match Database::open(db_path) {
        Ok(db) => db,
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Failed to open database: {}", e));
            return 1;
        }
    };
    let client = match
        DexScreenerClient::new(timeout, max_retries, config::DEFAULT_BACKOFF_BASE, rate_limit_rps)
    {
        Ok(client) => client,
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Failed to build HTTP client: {}", e));
            return 1;
        }
    };
    let collector = Collector::new(&client, &db);

    let (processed, errors) = if let Some(tokens) = tokens {
        let addresses = parse_addresses_input(&tokens);
        if addresses.is_empty() {
            log(LogTag::Collector, "ERROR", &format!("No token addresses parsed from: {}", tokens));
            return 1;
        }
        collector.collect_for_tokens(&addresses).await
    } else if let Some(pairs) = pairs {
        let addresses = parse_addresses_input(&pairs);
        if addresses.is_empty() {
            log(LogTag::Collector, "ERROR", &format!("No pair addresses parsed from: {}", pairs));
            return 1;
        }
        collector.collect_for_pairs(&addresses).await
    } else {
        log(LogTag::Collector, "ERROR", "Specify either --tokens or --pairs");
        return 1;
    };

    if !no_prune {
        auto_prune(&db, prune_max_age_hours);
    }

    log(
        LogTag::Collector,
        "INFO",
        &format!("Done: {} pair(s) written, {} error(s)", processed, errors)
    );
    // Item-level errors live in the counters, not in the exit code.
    0
}

#[allow(clippy::too_many_arguments)]
async fn cmd_collect_new(
    db_path: &str,
    interval_sec: f64,
    limit_per_cycle: Option<usize>,
    timeout: f64,
    max_retries: u32,
    rate_limit_rps: f64,
    no_prune: bool,
    prune_max_age_hours: f64
) -> i32 {
    if interval_sec < 1.0 {
        log(LogTag::System, "ERROR", "--interval-sec must be >= 1");
        return 1;
    }
    if !process_lock::try_acquire_db_lock(db_path) {
        log(
            LogTag::System,
            "ERROR",
            &format!(
                "Another process already holds {}; refusing to start",
                process_lock::lock_path(db_path).display()
            )
        );
        return 1;
    }

    let code = (async {
        let db = match Database::open(db_path) {
            Ok(db) => db,
            Err(e) => {
                log(LogTag::System, "ERROR", &format!("Failed to open database: {}", e));
                return 1;
            }
        };
        let client = match
            DexScreenerClient::new(timeout, max_retries, config::DEFAULT_BACKOFF_BASE, rate_limit_rps)
        {
            Ok(client) => client,
            Err(e) => {
                log(LogTag::System, "ERROR", &format!("Failed to build HTTP client: {}", e));
                return 1;
            }
        };

        poller::install_shutdown_handler();
        let opts = PollerOptions {
            interval_sec,
            limit_per_cycle,
            auto_prune: !no_prune,
            prune_max_age_hours,
        };
        match poller::run_collect_new(&client, &db, &opts).await {
            Ok(()) => 0,
            Err(e) => {
                log(LogTag::System, "ERROR", &format!("collect-new failed: {}", e));
                1
            }
        }
    }).await;

    process_lock::release_db_lock(db_path);
    code
}

fn cmd_prune(db_path: &str, max_age_hours: f64, dry_run: bool, vacuum: bool) -> i32 {
    let Some(db) = open_existing_db(db_path) else {
        return 1;
    };
    match db.prune_by_pair_age(max_age_hours, dry_run, vacuum) {
        Ok((s_cnt, p_cnt, t_cnt)) => {
            let label = if dry_run { "prune (dry-run): would delete" } else { "prune: deleted" };
            log(
                LogTag::Store,
                "INFO",
                &format!("{} snapshots={} pairs={} tokens={}", label, s_cnt, p_cnt, t_cnt)
            );
            0
        }
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("Prune failed: {}", e));
            1
        }
    }
}

fn cmd_export(db_path: &str, format: &str, out: &str, table: &str) -> i32 {
    let Some(db) = open_existing_db(db_path) else {
        return 1;
    };
    let rows = match table {
        "pairs" => db.iterate_pairs(),
        "tokens" => db.iterate_tokens(),
        _ => db.iterate_snapshots(None, None, None),
    };
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("Export read failed: {}", e));
            return 1;
        }
    };
    match export::write_rows(&rows, format, Path::new(out)) {
        Ok(written) => {
            log(
                LogTag::Store,
                "INFO",
                &format!("Exported {} row(s) to {} ({})", written, out, format)
            );
            0
        }
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("Export failed: {}", e));
            1
        }
    }
}

fn cmd_dump_watchlist(db_path: &str, state: Option<&str>, limit: u32) -> i32 {
    let Some(db) = open_existing_db(db_path) else {
        return 1;
    };
    let rows = match db.iterate_dump_watchlist(state, Some(limit)) {
        Ok(rows) => rows,
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("dump-watchlist read failed: {}", e));
            return 1;
        }
    };
    if rows.is_empty() {
        println!("No dump watchlist entries");
        return 0;
    }
    println!(
        "{:<44} {:<9} {:>7} {:>12} {:>12} {:>12} {:>14} {:>12}",
        "pair_address",
        "state",
        "drop%",
        "peak",
        "low",
        "last",
        "updated_at_ms",
        "signal"
    );
    for row in &rows {
        let text = |key: &str| {
            row.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let num = |key: &str| row.get(key).and_then(|v| v.as_f64());
        let pair: String = text("pair_address").chars().take(44).collect();
        println!(
            "{:<44} {:<9} {:>7.1} {:>12} {:>12} {:>12} {:>14} {:>12}",
            pair,
            text("state"),
            num("drop_pct").unwrap_or(0.0),
            num("peak_price").map(|v| v.to_string()).unwrap_or_default(),
            num("low_price").map(|v| v.to_string()).unwrap_or_default(),
            num("last_price").map(|v| v.to_string()).unwrap_or_default(),
            row.get("updated_at_ms").and_then(|v| v.as_i64()).unwrap_or(0),
            num("signal_price").map(|v| v.to_string()).unwrap_or_default()
        );
    }
    0
}

fn cmd_dump_watchlist_export(db_path: &str, format: &str, out: &str, state: Option<&str>) -> i32 {
    let Some(db) = open_existing_db(db_path) else {
        return 1;
    };
    let rows = match db.iterate_dump_watchlist(state, None) {
        Ok(rows) => rows,
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("dump-watchlist read failed: {}", e));
            return 1;
        }
    };
    match export::write_rows(&rows, format, Path::new(out)) {
        Ok(written) => {
            log(
                LogTag::Store,
                "INFO",
                &format!("Exported {} dump_watchlist row(s) to {} ({})", written, out, format)
            );
            0
        }
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("Export failed: {}", e));
            1
        }
    }
}

fn cmd_self_check(db_path: &str, fix: bool) -> i32 {
    if !Path::new(db_path).exists() {
        log(LogTag::System, "ERROR", &format!("Database not found: {}", db_path));
        return 2;
    }
    let db = match Database::open(db_path) {
        Ok(db) => db,
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Failed to open database: {}", e));
            return 2;
        }
    };
    let report = |old_pairs: i64, old_snapshots: i64, orphan_tokens: i64| {
        println!(
            "counts: old_pairs={}, old_pairs_snapshots={}, orphan_tokens={}",
            old_pairs,
            old_snapshots,
            orphan_tokens
        );
    };
    match db.self_check_invariants() {
        Ok((old_pairs, old_snapshots, orphan_tokens)) => {
            let mut ok = old_pairs == 0 && old_snapshots == 0 && orphan_tokens == 0;
            println!("{}", if ok { "SELF-CHECK OK" } else { "SELF-CHECK FAIL" });
            report(old_pairs, old_snapshots, orphan_tokens);

            if !ok && fix {
                match db.prune_by_pair_age(config::SELF_CHECK_AGE_HOURS, false, false) {
                    Ok((s_cnt, p_cnt, t_cnt)) => {
                        println!(
                            "FIX APPLIED: prune by pair age => snapshots={} pairs={} tokens={}",
                            s_cnt,
                            p_cnt,
                            t_cnt
                        );
                        match db.self_check_invariants() {
                            Ok((a, b, c)) => {
                                report(a, b, c);
                                ok = a == 0 && b == 0 && c == 0;
                            }
                            Err(e) => {
                                log(LogTag::Store, "ERROR", &format!("re-check failed: {}", e));
                                return 2;
                            }
                        }
                    }
                    Err(e) => {
                        log(LogTag::Store, "ERROR", &format!("fix prune failed: {}", e));
                        return 2;
                    }
                }
            }
            if ok { 0 } else { 2 }
        }
        Err(e) => {
            log(LogTag::Store, "ERROR", &format!("self-check failed: {}", e));
            2
        }
    }
}

async fn cmd_check(timeout: f64, max_retries: u32, rate_limit_rps: f64) -> i32 {
    log(
        LogTag::System,
        "INFO",
        "Check: starting full-cycle smoke (API -> normalize -> SQLite -> read -> serialize)"
    );
    let client = match
        DexScreenerClient::new(timeout, max_retries, config::DEFAULT_BACKOFF_BASE, rate_limit_rps)
    {
        Ok(client) => client,
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Check: client build failed: {}", e));
            return 1;
        }
    };

    let raw_pairs = client
        .get_pairs_by_pair_addresses(&[config::CHECK_PAIR_ADDRESS.to_string()]).await;
    let Some(pair_dict) = raw_pairs.first() else {
        log(LogTag::System, "ERROR", "Check: API returned no pairs");
        return 1;
    };
    if pair_dict.get("pairAddress").and_then(|v| v.as_str()).unwrap_or("").is_empty() ||
        pair_dict.get("baseToken").is_none()
    {
        log(LogTag::System, "ERROR", "Check: API response missing pairAddress or baseToken");
        return 1;
    }
    log(LogTag::System, "INFO", "Check: API OK");

    let snapshot_ts = chrono::Utc::now().timestamp_millis();
    let snapshot = from_api_pair(pair_dict, snapshot_ts);
    if snapshot.pair_address.is_empty() {
        log(LogTag::System, "ERROR", "Check: invalid snapshot after normalization");
        return 1;
    }
    log(LogTag::System, "INFO", "Check: normalization OK");

    let db = match Database::open_in_memory() {
        Ok(db) => db,
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Check: SQLite open failed: {}", e));
            return 1;
        }
    };
    let write = (|| -> anyhow::Result<()> {
        db.upsert_token(&snapshot.base_token)?;
        db.upsert_token(&snapshot.quote_token)?;
        db.upsert_pair(&snapshot)?;
        db.insert_snapshot(&snapshot)?;
        Ok(())
    })();
    if let Err(e) = write {
        log(LogTag::System, "ERROR", &format!("Check: SQLite write failed: {}", e));
        return 1;
    }
    log(LogTag::System, "INFO", "Check: SQLite write OK");

    let rows = match db.iterate_snapshots(None, None, None) {
        Ok(rows) if !rows.is_empty() => rows,
        Ok(_) => {
            log(LogTag::System, "ERROR", "Check: no rows read from snapshots");
            return 1;
        }
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Check: SQLite read failed: {}", e));
            return 1;
        }
    };
    log(LogTag::System, "INFO", &format!("Check: read OK, {} row(s)", rows.len()));

    match serde_json::to_string(&rows[0]) {
        Ok(payload) if payload.contains("pair_address") => {
            log(
                LogTag::System,
                "INFO",
                &format!("Check: serialization OK, {} bytes", payload.len())
            );
        }
        Ok(_) => {
            log(LogTag::System, "ERROR", "Check: serialized payload invalid");
            return 1;
        }
        Err(e) => {
            log(LogTag::System, "ERROR", &format!("Check: serialization failed: {}", e));
            return 1;
        }
    }

    log(LogTag::System, "INFO", "Check: all steps passed");
    0
}

fn print_watch_table(title: &str, entries: &[ScreenEntry]) {
    println!("--- {} ---", title);
    if entries.is_empty() {
        println!("(none)");
        return;
    }
    println!("{:<44} {:>7} {:>12} {:>12} {:>6}", "pair", "drop%", "liq", "vol", "txns");
    for e in entries {
        let pair: String = e.pair_address.chars().take(44).collect();
        println!(
            "{:<44} {:>7.1} {:>12.0} {:>12.0} {:>6}",
            pair,
            e.drop_from_ath.unwrap_or(0.0),
            e.liquidity_usd,
            e.volume_h24,
            e.txns_h24
        );
    }
}

fn print_strategy_report(report: &ScreenerReport) {
    println!("--- SIGNAL ---");
    if report.signals.is_empty() {
        println!("(none)");
    } else {
        for e in &report.signals {
            let pair: String = e.pair_address.chars().take(44).collect();
            println!(
                "pair={} drop_from_ath={:.1}% ath_price={} current_price={} {}",
                pair,
                e.drop_from_ath.unwrap_or(0.0),
                e.ath_price.unwrap_or(0.0),
                e.current_price,
                e.url
            );
        }
    }
    print_watch_table("WATCHLIST L3", &report.wl3);
    print_watch_table("WATCHLIST L2", &report.wl2);
    print_watch_table("WATCHLIST L1", &report.wl1);
    print_watch_table("BOOTSTRAP", &report.bootstrap);
    println!("---");
}

async fn cmd_strategy(db_path: &str, loop_sec: Option<f64>) -> i32 {
    let Some(db) = open_existing_db(db_path) else {
        return 1;
    };

    let run_once = |db: &Database| -> i32 {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let report = match StrategyEngine::new(db).run(now_ms) {
            Ok(report) => report,
            Err(e) => {
                log(LogTag::Strategy, "ERROR", &format!("strategy run failed: {}", e));
                return 1;
            }
        };
        print_strategy_report(&report);

        if let Err(e) = run_post_analysis(db, now_ms) {
            log(LogTag::Analyzer, "WARN", &format!("post-analysis skipped: {}", e));
        }
        if let Err(e) = run_trigger_analysis(db, now_ms, config::TRIGGER_EVAL_BATCH_LIMIT) {
            log(LogTag::Analyzer, "WARN", &format!("trigger-analysis skipped: {}", e));
        }
        match db.get_signal_event_counts() {
            Ok((events, pending, done, no_data)) => {
                println!(
                    "signals: events={} horizon_pending={} horizon_done={} horizon_no_data={}",
                    events,
                    pending,
                    done,
                    no_data
                );
            }
            Err(e) => {
                log(LogTag::Analyzer, "WARN", &format!("signal counts unavailable: {}", e));
            }
        }
        0
    };

    match loop_sec {
        Some(interval) => {
            let interval = interval.max(1.0);
            poller::install_shutdown_handler();
            while !SHUTDOWN.load(Ordering::SeqCst) {
                let code = run_once(&db);
                if code != 0 {
                    return code;
                }
                if SHUTDOWN.load(Ordering::SeqCst) {
                    break;
                }
                poller::sleep_with_shutdown(interval).await;
            }
            0
        }
        None => run_once(&db),
    }
}
