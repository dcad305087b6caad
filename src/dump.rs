// dump.rs - Dump/reversal state machine over pair snapshots
//
// Pure transition logic only. The store loads the latest observations,
// calls admit/step, and persists whatever comes back; that keeps the
// transition rules unit-testable without a database.

use crate::config;

/// Lifecycle of a watched dump. SIGNAL is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    Dumping,
    Bottoming,
    Signal,
}

impl DumpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpState::Dumping => "DUMPING",
            DumpState::Bottoming => "BOTTOMING",
            DumpState::Signal => "SIGNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DUMPING" => Some(DumpState::Dumping),
            "BOTTOMING" => Some(DumpState::Bottoming),
            "SIGNAL" => Some(DumpState::Signal),
            _ => None,
        }
    }
}

/// One watchlist row: peak/low/last tracking plus the state.
#[derive(Debug, Clone)]
pub struct DumpEntry {
    pub pair_address: String,
    pub added_at_ms: i64,
    pub updated_at_ms: i64,
    pub state: DumpState,
    pub peak_price: f64,
    pub peak_ts: i64,
    pub low_price: f64,
    pub low_ts: i64,
    pub last_price: f64,
    pub last_ts: i64,
    pub drop_pct: f64,
    pub volume_m5: Option<f64>,
    pub buys_m5: Option<i64>,
    pub sells_m5: Option<i64>,
    pub signal_ts: Option<i64>,
    pub signal_price: Option<f64>,
}

/// The latest snapshot, reduced to what the machine needs.
#[derive(Debug, Clone)]
pub struct DumpObservation {
    pub price: f64,
    pub ts: i64,
    pub volume_m5: Option<f64>,
    pub buys_m5: Option<i64>,
    pub sells_m5: Option<i64>,
}

/// Highest observed price for the pair (ties broken toward recent).
#[derive(Debug, Clone, Copy)]
pub struct DumpPeak {
    pub price: f64,
    pub ts: i64,
}

/// drop_pct = (peak - last) / peak * 100.
pub fn drop_pct(peak_price: f64, last_price: f64) -> f64 {
    if peak_price <= 0.0 {
        return 0.0;
    }
    ((peak_price - last_price) / peak_price) * 100.0
}

/// Admission check for a pair with no watchlist row yet. Only deep dumps on
/// liquid, actively sold pairs enter; everything else returns None.
pub fn admit(
    pair_address: &str,
    now_ms: i64,
    obs: &DumpObservation,
    peak: &DumpPeak,
    liquidity_usd: f64
) -> Option<DumpEntry> {
    let drop = drop_pct(peak.price, obs.price);
    let vol = obs.volume_m5.unwrap_or(0.0);
    let sells = obs.sells_m5.unwrap_or(0);
    if
        drop < config::DUMP_DROP_THRESHOLD ||
        liquidity_usd < config::DUMP_LIQ_MIN ||
        vol < config::DUMP_VOL_M5_MIN ||
        sells < config::DUMP_SELLS_MIN
    {
        return None;
    }
    Some(DumpEntry {
        pair_address: pair_address.to_string(),
        added_at_ms: now_ms,
        updated_at_ms: now_ms,
        state: DumpState::Dumping,
        peak_price: peak.price,
        peak_ts: peak.ts,
        low_price: obs.price,
        low_ts: obs.ts,
        last_price: obs.price,
        last_ts: obs.ts,
        drop_pct: drop,
        volume_m5: obs.volume_m5,
        buys_m5: obs.buys_m5,
        sells_m5: obs.sells_m5,
        signal_ts: None,
        signal_price: None,
    })
}

/// Apply one new snapshot to an existing entry: refresh tracking fields,
/// then run the state transitions. `prev` is the snapshot before `obs`.
/// Once in SIGNAL the stamped fields never change.
pub fn step(
    mut entry: DumpEntry,
    now_ms: i64,
    obs: &DumpObservation,
    peak: &DumpPeak,
    prev: Option<&DumpObservation>
) -> DumpEntry {
    entry.updated_at_ms = now_ms;
    entry.last_price = obs.price;
    entry.last_ts = obs.ts;
    entry.volume_m5 = obs.volume_m5;
    entry.buys_m5 = obs.buys_m5;
    entry.sells_m5 = obs.sells_m5;

    if peak.price > entry.peak_price {
        entry.peak_price = peak.price;
        entry.peak_ts = peak.ts;
    }
    if obs.price < entry.low_price {
        entry.low_price = obs.price;
        entry.low_ts = obs.ts;
    }
    entry.drop_pct = drop_pct(entry.peak_price, entry.last_price);

    if entry.state == DumpState::Signal {
        return entry;
    }

    let buys = obs.buys_m5.unwrap_or(0) as f64;
    let sells = obs.sells_m5.unwrap_or(0) as f64;

    if entry.state == DumpState::Dumping {
        if let Some(prev_obs) = prev {
            let threshold = entry.low_price * config::BOTTOMING_PRICE_FACTOR;
            if
                obs.price >= threshold &&
                prev_obs.price >= threshold &&
                buys >= sells * config::BOTTOMING_BUY_RATIO
            {
                entry.state = DumpState::Bottoming;
            }
        }
    }

    let prev_vol = prev.and_then(|p| p.volume_m5).unwrap_or(0.0);
    let vol_min = prev_vol.max(config::SIGNAL_VOL_M5_FLOOR);
    let bounce_ok = obs.price >= entry.low_price * config::SIGNAL_BOUNCE_FACTOR;
    let vol_ok = obs.volume_m5.unwrap_or(0.0) >= vol_min;

    if bounce_ok && buys > sells && vol_ok {
        entry.state = DumpState::Signal;
        entry.signal_ts = Some(obs.ts);
        entry.signal_price = Some(obs.price);
    }

    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(price: f64, ts: i64, vol: f64, buys: i64, sells: i64) -> DumpObservation {
        DumpObservation {
            price,
            ts,
            volume_m5: Some(vol),
            buys_m5: Some(buys),
            sells_m5: Some(sells),
        }
    }

    const PEAK: DumpPeak = DumpPeak { price: 100.0, ts: 1000 };

    #[test]
    fn admission_needs_all_thresholds() {
        let deep = obs(40.0, 2000, 600.0, 2, 8);
        assert!(admit("P", 1, &deep, &PEAK, 20_000.0).is_some());

        // 40% drop is not enough.
        assert!(admit("P", 1, &obs(60.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).is_none());
        // Thin liquidity.
        assert!(admit("P", 1, &deep, &PEAK, 9_999.0).is_none());
        // Dead volume.
        assert!(admit("P", 1, &obs(40.0, 2000, 100.0, 2, 8), &PEAK, 20_000.0).is_none());
        // Too few sells.
        assert!(admit("P", 1, &obs(40.0, 2000, 600.0, 2, 4), &PEAK, 20_000.0).is_none());
    }

    #[test]
    fn admitted_entry_starts_dumping_with_low_at_last() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        assert_eq!(entry.state, DumpState::Dumping);
        assert_eq!(entry.low_price, 30.0);
        assert_eq!(entry.last_price, 30.0);
        assert_eq!(entry.peak_price, 100.0);
        assert_eq!(entry.drop_pct, 70.0);
        assert!(entry.signal_ts.is_none());
    }

    #[test]
    fn low_tracks_down_and_peak_ratchets_up() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        let lower = obs(20.0, 3000, 600.0, 1, 9);
        let entry = step(entry, 6, &lower, &PEAK, None);
        assert_eq!(entry.low_price, 20.0);
        assert_eq!(entry.low_ts, 3000);

        let higher_peak = DumpPeak { price: 120.0, ts: 3500 };
        let entry = step(entry, 7, &obs(21.0, 4000, 600.0, 1, 9), &higher_peak, Some(&lower));
        assert_eq!(entry.peak_price, 120.0);
        assert_eq!(entry.peak_ts, 3500);
        assert!((entry.drop_pct - ((120.0 - 21.0) / 120.0) * 100.0).abs() < 1e-9);
    }

    #[test]
    fn drop_recovery_does_not_evict() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        // Price recovers to 10% below peak; the entry just keeps tracking.
        let prev = obs(30.0, 2000, 600.0, 2, 8);
        let entry = step(entry, 6, &obs(90.0, 3000, 100.0, 1, 9), &PEAK, Some(&prev));
        assert!(entry.drop_pct < config::DUMP_DROP_THRESHOLD);
        assert_eq!(entry.pair_address, "P");
    }

    #[test]
    fn two_stable_prints_with_buyers_mark_bottoming() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        let prev = obs(30.2, 3000, 100.0, 4, 5);
        // Both prints above low*1.003, buys >= sells*0.8, but no bounce yet.
        let entry = step(entry, 6, &obs(30.2, 4000, 100.0, 4, 5), &PEAK, Some(&prev));
        assert_eq!(entry.state, DumpState::Bottoming);
        assert!(entry.signal_ts.is_none());
    }

    #[test]
    fn bounce_with_buyers_and_volume_signals() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        let prev = obs(30.1, 3000, 200.0, 4, 5);
        let entry = step(entry, 6, &obs(30.5, 4000, 400.0, 7, 5), &PEAK, Some(&prev));
        assert_eq!(entry.state, DumpState::Signal);
        assert_eq!(entry.signal_ts, Some(4000));
        assert_eq!(entry.signal_price, Some(30.5));
    }

    #[test]
    fn signal_needs_volume_above_floor_and_previous() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        // Bounce and buyers, but volume under the 300 floor.
        let prev = obs(30.1, 3000, 100.0, 4, 5);
        let entry = step(entry, 6, &obs(30.5, 4000, 250.0, 7, 5), &PEAK, Some(&prev));
        assert_ne!(entry.state, DumpState::Signal);

        // Volume above the floor but below the previous print.
        let prev_big = obs(30.1, 5000, 900.0, 4, 5);
        let entry = step(entry, 7, &obs(30.6, 6000, 500.0, 7, 5), &PEAK, Some(&prev_big));
        assert_ne!(entry.state, DumpState::Signal);
    }

    #[test]
    fn signal_is_terminal_and_stamps_once() {
        let entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        let prev = obs(30.1, 3000, 200.0, 4, 5);
        let entry = step(entry, 6, &obs(30.5, 4000, 400.0, 7, 5), &PEAK, Some(&prev));
        assert_eq!(entry.state, DumpState::Signal);
        let stamped_ts = entry.signal_ts;
        let stamped_price = entry.signal_price;

        // Another strong print must not restamp the signal.
        let prev2 = obs(30.5, 4000, 400.0, 7, 5);
        let entry = step(entry, 7, &obs(40.0, 5000, 900.0, 9, 2), &PEAK, Some(&prev2));
        assert_eq!(entry.state, DumpState::Signal);
        assert_eq!(entry.signal_ts, stamped_ts);
        assert_eq!(entry.signal_price, stamped_price);
        // Tracking fields keep moving.
        assert_eq!(entry.last_price, 40.0);
    }

    #[test]
    fn tracking_invariants_hold() {
        let mut entry = admit("P", 5, &obs(30.0, 2000, 600.0, 2, 8), &PEAK, 20_000.0).unwrap();
        let mut prev = obs(30.0, 2000, 600.0, 2, 8);
        for (i, price) in [25.0, 22.0, 27.0, 26.0, 35.0].iter().enumerate() {
            let o = obs(*price, 3000 + (i as i64) * 1000, 400.0, 3, 4);
            entry = step(entry, 10 + (i as i64), &o, &PEAK, Some(&prev));
            prev = o;
            assert!(entry.drop_pct >= 0.0 && entry.drop_pct <= 100.0);
            assert!(entry.peak_price >= entry.low_price);
            assert!(entry.peak_price >= entry.last_price);
        }
    }
}
