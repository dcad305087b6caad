/// Central constants for the collector, dump watchlist and strategy screener.
/// Everything tunable lives here; CLI flags override the runtime knobs only.

// --- DexScreener API ---
pub const BASE_URL: &str = "https://api.dexscreener.com";
pub const CHAIN_SOLANA: &str = "solana";
/// Max token addresses per /tokens/v1 request (API limit).
pub const TOKENS_CHUNK_SIZE: usize = 30;

// --- HTTP client defaults ---
pub const DEFAULT_TIMEOUT_SEC: f64 = 10.0;
pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_BACKOFF_BASE: f64 = 0.5;
pub const DEFAULT_RATE_LIMIT_RPS: f64 = 3.0;
/// Uniform jitter added on top of exponential backoff, seconds.
pub const BACKOFF_JITTER_MAX: f64 = 0.2;

// --- `check` command (smoke profile) ---
pub const CHECK_TIMEOUT_SEC: f64 = 15.0;
pub const CHECK_MAX_RETRIES: u32 = 2;
pub const CHECK_RATE_LIMIT_RPS: f64 = 2.0;
pub const CHECK_PAIR_ADDRESS: &str = "3nMFwZXwY1s1M5s8vYAHqd4wGs4iSxXE4LRoUMMYqEgF";

// --- Database ---
pub const DEFAULT_DB: &str = "solscreener.sqlite";

// --- Prune / age ---
pub const DEFAULT_PRUNE_MAX_AGE_HOURS: f64 = 24.0;
pub const SELF_CHECK_AGE_HOURS: f64 = 24.0;

// --- Dump watchlist (dump/reversal state machine) ---
pub const DUMP_WATCHLIST_TTL_HOURS: f64 = 3.0;
pub const DUMP_DROP_THRESHOLD: f64 = 50.0;
pub const DUMP_LIQ_MIN: f64 = 10_000.0;
pub const DUMP_VOL_M5_MIN: f64 = 500.0;
pub const DUMP_SELLS_MIN: i64 = 5;
/// Last two prices must sit at least this factor above the low to call a bottom.
pub const BOTTOMING_PRICE_FACTOR: f64 = 1.003;
/// Buys may lag sells by this ratio and still count as absorption.
pub const BOTTOMING_BUY_RATIO: f64 = 0.8;
/// Bounce above the low required for a reversal signal.
pub const SIGNAL_BOUNCE_FACTOR: f64 = 1.01;
/// Reversal needs at least this much 5-minute volume regardless of history.
pub const SIGNAL_VOL_M5_FLOOR: f64 = 300.0;

// --- Collect-new loop ---
pub const COLLECT_NEW_INTERVAL_SEC: f64 = 60.0;

// --- Strategy screener: ATH-based drawdown ---
pub const STRATEGY_MAX_AGE_HOURS: f64 = 24.0;
pub const STRATEGY_MIN_LIQ: f64 = 10_000.0;
pub const STRATEGY_MIN_VOL: f64 = 500.0;
pub const STRATEGY_MIN_TXNS: i64 = 5;

// --- ATH validation (reject single-trade spikes) ---
/// Window around the ATH timestamp, half before and half after.
pub const ATH_VALIDATE_WINDOW_SEC: f64 = 300.0;
pub const ATH_MIN_SNAPSHOTS_IN_WINDOW: i64 = 2;
pub const ATH_MIN_TXNS_IN_WINDOW: i64 = 1;
pub const ATH_MIN_VOLUME_IN_WINDOW: f64 = 0.0;
/// Max candidate peaks to try when the raw ATH fails validation.
pub const ATH_FALLBACK_MAX_ATTEMPTS: usize = 10;

// --- Bootstrap (history too thin for an ATH verdict) ---
pub const BOOTSTRAP_MIN_SNAPSHOTS: i64 = ATH_MIN_SNAPSHOTS_IN_WINDOW;
pub const BOOTSTRAP_MIN_LIQ: f64 = 10_000.0;
pub const BOOTSTRAP_MIN_TXNS: i64 = 5;

// --- 3-tier watchlist drop thresholds ---
pub const WL1_MIN_DROP: f64 = 25.0;
pub const WL2_MIN_DROP: f64 = 35.0;
pub const WL3_MIN_DROP: f64 = 45.0;
pub const SIGNAL_MIN_DROP: f64 = 50.0;
pub const SIGNAL_MAX_DROP: f64 = 60.0;

// --- Market quality per watchlist level (downgrade if below) ---
pub const WL1_MIN_TXNS: i64 = 5;
pub const WL2_MIN_TXNS: i64 = 7;
pub const WL3_MIN_TXNS: i64 = 10;
pub const WL1_MIN_LIQ: f64 = 10_000.0;
pub const WL2_MIN_LIQ: f64 = 15_000.0;
pub const WL3_MIN_LIQ: f64 = 20_000.0;

// --- Signal gating ---
pub const SIGNAL_MIN_TXNS: i64 = 10;
pub const SIGNAL_MIN_BUYS: i64 = 5;
pub const SIGNAL_MIN_LIQ: f64 = 5_000.0;
pub const SIGNAL_COOLDOWN_SEC: i64 = 3_600;

// --- Post-analysis horizons (30/60/120 min) ---
pub const POST_HORIZONS_SEC: [i64; 3] = [1_800, 3_600, 7_200];

// --- Trigger-based post-analysis (TP1/SL/break-even) ---
pub const TP1_PCT: f64 = 40.0;
pub const SL_PCT: f64 = -50.0;
/// Evaluate only within the token's first day of life.
pub const TRIGGER_EVAL_MAX_AGE_SEC: i64 = 86_400;
pub const TRIGGER_EVAL_MIN_SNAPSHOTS: usize = 2;
pub const TRIGGER_EVAL_BATCH_LIMIT: u32 = 100;
