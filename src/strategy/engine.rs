// engine.rs - ATH drawdown screener
//
// For each live pair: find a validated ATH from real price history (no
// %change fields), compute the drawdown, run hard filters and the tier
// ladder, and emit WATCHLIST / SIGNAL decisions. Signals are gated by a
// per-pair cooldown and enrolled for outcome evaluation on emission.

use anyhow::Result;
use serde_json::json;

use crate::config;
use crate::database::store::{ ActivityWindow, PairMarket };
use crate::database::Database;
use crate::logger::{ log, LogTag };

/// Watchlist tier; L3 is the deepest drawdown short of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchLevel {
    L1,
    L2,
    L3,
}

impl WatchLevel {
    pub fn decision_str(&self) -> &'static str {
        match self {
            WatchLevel::L1 => "WATCHLIST_L1",
            WatchLevel::L2 => "WATCHLIST_L2",
            WatchLevel::L3 => "WATCHLIST_L3",
        }
    }
}

/// Initial classification by drawdown depth alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropClass {
    Reject,
    Watch(WatchLevel),
    SignalCandidate,
}

/// One screener output row. ath/drop are absent on the bootstrap list.
#[derive(Debug, Clone)]
pub struct ScreenEntry {
    pub pair_address: String,
    pub url: String,
    pub current_price: f64,
    pub ath_price: Option<f64>,
    pub drop_from_ath: Option<f64>,
    pub liquidity_usd: f64,
    pub volume_h24: f64,
    pub txns_h24: i64,
    pub buys_h24: i64,
    pub score: f64,
}

/// Ordered screener output, strongest signals first within each list.
#[derive(Debug, Default)]
pub struct ScreenerReport {
    pub signals: Vec<ScreenEntry>,
    pub wl3: Vec<ScreenEntry>,
    pub wl2: Vec<ScreenEntry>,
    pub wl1: Vec<ScreenEntry>,
    pub bootstrap: Vec<ScreenEntry>,
}

/// Result of the valid-ATH search for one pair.
enum AthSearch {
    Valid {
        price: f64,
        source: &'static str,
        metrics: ActivityWindow,
    },
    /// Raw candidate failed only on snapshot count: history too thin.
    ThinHistory,
    NotFound,
}

/// drop_from_ath = (ath - current) / ath * 100.
pub fn compute_drop_from_ath(ath_price: f64, current_price: f64) -> f64 {
    if ath_price <= 0.0 {
        return 0.0;
    }
    let current = current_price.max(0.0);
    ((ath_price - current) / ath_price) * 100.0
}

pub fn classify_drop(drop: f64) -> DropClass {
    if drop < config::WL1_MIN_DROP {
        DropClass::Reject
    } else if drop < config::WL2_MIN_DROP {
        DropClass::Watch(WatchLevel::L1)
    } else if drop < config::WL3_MIN_DROP {
        DropClass::Watch(WatchLevel::L2)
    } else if drop < config::SIGNAL_MIN_DROP {
        DropClass::Watch(WatchLevel::L3)
    } else if drop <= config::SIGNAL_MAX_DROP {
        DropClass::SignalCandidate
    } else {
        DropClass::Reject
    }
}

/// Market-quality ladder: a level that misses its minima drops one step,
/// re-checked at each level; missing L1 minima drops out entirely.
pub fn apply_quality_ladder(level: WatchLevel, txns_h24: i64, liquidity_usd: f64) -> Option<WatchLevel> {
    let mut level = level;
    if level == WatchLevel::L3 && (txns_h24 < config::WL3_MIN_TXNS || liquidity_usd < config::WL3_MIN_LIQ) {
        level = WatchLevel::L2;
    }
    if level == WatchLevel::L2 && (txns_h24 < config::WL2_MIN_TXNS || liquidity_usd < config::WL2_MIN_LIQ) {
        level = WatchLevel::L1;
    }
    if level == WatchLevel::L1 && (txns_h24 < config::WL1_MIN_TXNS || liquidity_usd < config::WL1_MIN_LIQ) {
        return None;
    }
    Some(level)
}

/// An ATH window is trustworthy when it holds at least two snapshots and,
/// where the schema can tell, at least one transaction and non-negative
/// volume.
pub fn activity_is_valid(act: &ActivityWindow) -> bool {
    if act.snapshots_count < config::ATH_MIN_SNAPSHOTS_IN_WINDOW {
        return false;
    }
    if let Some(txns) = act.txns_sum {
        if txns < config::ATH_MIN_TXNS_IN_WINDOW {
            return false;
        }
    }
    if let Some(volume) = act.volume_sum {
        if volume < config::ATH_MIN_VOLUME_IN_WINDOW {
            return false;
        }
    }
    true
}

pub struct StrategyEngine<'a> {
    db: &'a Database,
}

impl<'a> StrategyEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn find_valid_ath(&self, pair_address: &str, since_ms: Option<i64>) -> Result<AthSearch> {
        let Some(raw) = self.db.fetch_ath_point(pair_address, since_ms)? else {
            return Ok(AthSearch::NotFound);
        };
        // The ATH being the current point means no drawdown to measure.
        if raw.ath_ts == raw.current_ts && raw.ath_price == raw.current_price {
            return Ok(AthSearch::NotFound);
        }

        let raw_act = self.db.fetch_activity_window(
            pair_address,
            raw.ath_ts,
            config::ATH_VALIDATE_WINDOW_SEC
        )?;
        if activity_is_valid(&raw_act) {
            return Ok(AthSearch::Valid {
                price: raw.ath_price,
                source: "raw",
                metrics: raw_act,
            });
        }

        let candidates = self.db.fetch_ath_candidates(
            pair_address,
            since_ms,
            config::ATH_FALLBACK_MAX_ATTEMPTS
        )?;
        for (price, ts) in candidates.iter().skip(1) {
            if *price <= raw.current_price {
                continue;
            }
            let act = self.db.fetch_activity_window(pair_address, *ts, config::ATH_VALIDATE_WINDOW_SEC)?;
            if activity_is_valid(&act) {
                return Ok(AthSearch::Valid {
                    price: *price,
                    source: "fallback",
                    metrics: act,
                });
            }
        }

        // The raw peak failed only because the window was thin, so the pair
        // belongs on the bootstrap path rather than a hard reject.
        let txns_ok = raw_act.txns_sum.map_or(true, |t| t >= config::ATH_MIN_TXNS_IN_WINDOW);
        let vol_ok = raw_act.volume_sum.map_or(true, |v| v >= config::ATH_MIN_VOLUME_IN_WINDOW);
        if raw_act.snapshots_count < config::ATH_MIN_SNAPSHOTS_IN_WINDOW && txns_ok && vol_ok {
            return Ok(AthSearch::ThinHistory);
        }
        Ok(AthSearch::NotFound)
    }

    fn record_bootstrap(
        &self,
        pair: &PairMarket,
        current_price: f64,
        snapshot_count: i64,
        market: &MarketNumbers,
        now_ms: i64,
        report: &mut ScreenerReport
    ) -> Result<()> {
        let reasons = json!({
            "reason": "insufficient_price_history",
            "ath_valid": false,
            "drop_from_ath": Option::<f64>::None,
            "snapshots_count": snapshot_count,
            "liq": market.liquidity_usd,
            "vol": market.volume_h24,
            "txns": market.txns_h24,
        });
        self.db.insert_strategy_decision(
            &pair.pair_address,
            "WATCHLIST_BOOTSTRAP",
            Some(current_price),
            None,
            None,
            Some(&reasons.to_string()),
            now_ms
        )?;
        report.bootstrap.push(ScreenEntry {
            pair_address: pair.pair_address.clone(),
            url: pair.url.clone(),
            current_price,
            ath_price: None,
            drop_from_ath: None,
            liquidity_usd: market.liquidity_usd,
            volume_h24: market.volume_h24,
            txns_h24: market.txns_h24,
            buys_h24: market.buys_h24,
            score: 0.0,
        });
        Ok(())
    }

    /// Run the screener once over all pairs. now_ms is injected so cycles
    /// are reproducible under test.
    pub fn run(&self, now_ms: i64) -> Result<ScreenerReport> {
        let mut report = ScreenerReport::default();
        let max_age_ms = (config::STRATEGY_MAX_AGE_HOURS * 3600.0 * 1000.0) as i64;

        for pair in self.db.iterate_pair_markets()? {
            if pair.pair_address.is_empty() {
                continue;
            }

            // Age gate: only pairs inside their first day are screened.
            let created = pair.pair_created_at_ms.unwrap_or(0);
            if created > 0 && now_ms - created > max_age_ms {
                continue;
            }

            let Some(current_price) = self.db.fetch_latest_price(&pair.pair_address)? else {
                continue;
            };
            if current_price <= 0.0 {
                continue;
            }

            let market = MarketNumbers::from_pair(&pair);

            let snapshot_count = self.db.get_snapshot_count(&pair.pair_address)?;
            if snapshot_count < config::BOOTSTRAP_MIN_SNAPSHOTS {
                if market.passes_hard_filters() {
                    self.record_bootstrap(&pair, current_price, snapshot_count, &market, now_ms, &mut report)?;
                }
                continue;
            }

            let since_ms = pair.pair_created_at_ms.filter(|c| *c > 0);
            let (ath_price, ath_source, ath_metrics) = match
                self.find_valid_ath(&pair.pair_address, since_ms)?
            {
                AthSearch::Valid { price, source, metrics } => (price, source, metrics),
                AthSearch::ThinHistory => {
                    if market.passes_hard_filters() {
                        self.record_bootstrap(
                            &pair,
                            current_price,
                            snapshot_count,
                            &market,
                            now_ms,
                            &mut report
                        )?;
                    }
                    continue;
                }
                AthSearch::NotFound => {
                    let reasons = json!({
                        "reason": "valid_ath_not_found",
                        "ath_valid": false,
                        "drop_from_ath": Option::<f64>::None,
                    });
                    self.db.insert_strategy_decision(
                        &pair.pair_address,
                        "REJECT",
                        Some(current_price),
                        None,
                        None,
                        Some(&reasons.to_string()),
                        now_ms
                    )?;
                    continue;
                }
            };

            let drop_from_ath = compute_drop_from_ath(ath_price, current_price);

            if !market.passes_hard_filters() {
                continue;
            }

            let mut reasons = json!({
                "drop_from_ath": drop_from_ath,
                "ath_valid": true,
                "ath_source": ath_source,
                "ath_validation_metrics": ath_metrics,
                "liq": market.liquidity_usd,
                "vol": market.volume_h24,
                "txns": market.txns_h24,
                "buys": market.buys_h24,
            });

            let entry = ScreenEntry {
                pair_address: pair.pair_address.clone(),
                url: pair.url.clone(),
                current_price,
                ath_price: Some(ath_price),
                drop_from_ath: Some(drop_from_ath),
                liquidity_usd: market.liquidity_usd,
                volume_h24: market.volume_h24,
                txns_h24: market.txns_h24,
                buys_h24: market.buys_h24,
                score: drop_from_ath,
            };

            match classify_drop(drop_from_ath) {
                DropClass::Reject => {
                    reasons["reason"] = json!("drop_outside_bands");
                    self.db.insert_strategy_decision(
                        &pair.pair_address,
                        "REJECT",
                        Some(current_price),
                        Some(ath_price),
                        Some(drop_from_ath),
                        Some(&reasons.to_string()),
                        now_ms
                    )?;
                }
                DropClass::Watch(level) => {
                    match apply_quality_ladder(level, market.txns_h24, market.liquidity_usd) {
                        Some(final_level) => {
                            self.db.insert_strategy_decision(
                                &pair.pair_address,
                                final_level.decision_str(),
                                Some(current_price),
                                Some(ath_price),
                                Some(drop_from_ath),
                                Some(&reasons.to_string()),
                                now_ms
                            )?;
                            match final_level {
                                WatchLevel::L3 => report.wl3.push(entry),
                                WatchLevel::L2 => report.wl2.push(entry),
                                WatchLevel::L1 => report.wl1.push(entry),
                            }
                        }
                        None => {
                            reasons["reason"] = json!("watchlist_quality_below_minimum");
                            self.db.insert_strategy_decision(
                                &pair.pair_address,
                                "REJECT",
                                Some(current_price),
                                Some(ath_price),
                                Some(drop_from_ath),
                                Some(&reasons.to_string()),
                                now_ms
                            )?;
                        }
                    }
                }
                DropClass::SignalCandidate => {
                    let quality_ok =
                        market.txns_h24 >= config::SIGNAL_MIN_TXNS &&
                        market.buys_h24 >= config::SIGNAL_MIN_BUYS &&
                        market.liquidity_usd >= config::SIGNAL_MIN_LIQ;
                    if !quality_ok {
                        reasons["reason"] = json!("signal_gate_failed");
                        self.db.insert_strategy_decision(
                            &pair.pair_address,
                            "REJECT",
                            Some(current_price),
                            Some(ath_price),
                            Some(drop_from_ath),
                            Some(&reasons.to_string()),
                            now_ms
                        )?;
                        continue;
                    }
                    let on_cooldown = match self.db.get_last_signal_at(&pair.pair_address)? {
                        Some(last) => (now_ms - last) / 1000 < config::SIGNAL_COOLDOWN_SEC,
                        None => false,
                    };
                    if on_cooldown {
                        reasons["reason"] = json!("cooldown_active");
                        self.db.insert_strategy_decision(
                            &pair.pair_address,
                            "REJECT",
                            Some(current_price),
                            Some(ath_price),
                            Some(drop_from_ath),
                            Some(&reasons.to_string()),
                            now_ms
                        )?;
                        continue;
                    }

                    self.db.insert_strategy_decision(
                        &pair.pair_address,
                        "SIGNAL",
                        Some(current_price),
                        Some(ath_price),
                        Some(drop_from_ath),
                        Some(&reasons.to_string()),
                        now_ms
                    )?;
                    self.db.set_signal_cooldown(&pair.pair_address, now_ms)?;
                    self.db.record_signal_event(
                        &pair.pair_address,
                        now_ms,
                        current_price,
                        ath_price,
                        drop_from_ath,
                        drop_from_ath,
                        Some(&reasons.to_string()),
                        &config::POST_HORIZONS_SEC
                    )?;
                    report.signals.push(entry);
                }
            }
        }

        let by_score_desc = |a: &ScreenEntry, b: &ScreenEntry|
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal);
        report.signals.sort_by(by_score_desc);
        report.wl3.sort_by(by_score_desc);
        report.wl2.sort_by(by_score_desc);
        report.wl1.sort_by(by_score_desc);

        log(
            LogTag::Strategy,
            "INFO",
            &format!(
                "screener: signals={} wl3={} wl2={} wl1={} bootstrap={}",
                report.signals.len(),
                report.wl3.len(),
                report.wl2.len(),
                report.wl1.len(),
                report.bootstrap.len()
            )
        );
        Ok(report)
    }
}

/// Pair market fields with nulls coerced to zero for threshold checks.
struct MarketNumbers {
    liquidity_usd: f64,
    volume_h24: f64,
    txns_h24: i64,
    buys_h24: i64,
}

impl MarketNumbers {
    fn from_pair(pair: &PairMarket) -> Self {
        let buys = pair.txns_h24_buys.unwrap_or(0);
        let sells = pair.txns_h24_sells.unwrap_or(0);
        Self {
            liquidity_usd: pair.liquidity_usd.unwrap_or(0.0),
            volume_h24: pair.volume_h24.unwrap_or(0.0),
            txns_h24: buys + sells,
            buys_h24: buys,
        }
    }

    fn passes_hard_filters(&self) -> bool {
        self.liquidity_usd >= config::STRATEGY_MIN_LIQ &&
            self.volume_h24 >= config::STRATEGY_MIN_VOL &&
            self.txns_h24 >= config::STRATEGY_MIN_TXNS
    }
}
