// models.rs - Unified data model for DexScreener pair snapshots
//
// All normalization of raw API payloads happens here: every field is either
// a typed value or None, never a sentinel zero.

use serde::{ Deserialize, Serialize };
use serde_json::Value;

use crate::config;

/// Token identity (base or quote side of a pair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub name: String,
}

/// One observation of a DEX pair, as returned by any DexScreener endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub snapshot_ts: i64,
    pub chain_id: String,
    pub dex_id: String,
    pub pair_address: String,
    pub url: String,
    pub base_token: TokenInfo,
    pub quote_token: TokenInfo,
    pub price_usd: Option<f64>,
    pub price_native: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub liquidity_base: Option<f64>,
    pub liquidity_quote: Option<f64>,
    pub volume_m5: Option<f64>,
    pub volume_h1: Option<f64>,
    pub volume_h6: Option<f64>,
    pub volume_h24: Option<f64>,
    pub price_change_m5: Option<f64>,
    pub price_change_h1: Option<f64>,
    pub price_change_h6: Option<f64>,
    pub price_change_h24: Option<f64>,
    pub txns_m5_buys: Option<i64>,
    pub txns_m5_sells: Option<i64>,
    pub txns_h1_buys: Option<i64>,
    pub txns_h1_sells: Option<i64>,
    pub txns_h6_buys: Option<i64>,
    pub txns_h6_sells: Option<i64>,
    pub txns_h24_buys: Option<i64>,
    pub txns_h24_sells: Option<i64>,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    pub pair_created_at_ms: Option<i64>,
    pub age_seconds: Option<f64>,
}

/// Parse any JSON scalar as f64. Strings are trimmed; anything unparsable is None.
pub fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parse any JSON scalar as i64. Strings go through f64 first ("5.0" -> 5).
pub fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

fn period_f64(obj: &Value, period: &str) -> Option<f64> {
    parse_f64(obj.get(period).unwrap_or(&Value::Null))
}

fn tx_count(txns: &Value, period: &str, side: &str) -> Option<i64> {
    txns.get(period)
        .and_then(|p| p.get(side))
        .and_then(parse_i64)
}

fn token_from_value(v: Option<&Value>) -> TokenInfo {
    let obj = v.and_then(|x| x.as_object());
    let field = |key: &str| -> String {
        obj.and_then(|o| o.get(key))
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .trim()
            .to_string()
    };
    TokenInfo {
        address: field("address"),
        symbol: field("symbol"),
        name: field("name"),
    }
}

fn str_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Build a PairSnapshot from a raw pair object returned by any DexScreener
/// endpoint (/latest/dex/pairs, /tokens/v1). Missing or unparsable fields
/// map to None.
pub fn from_api_pair(raw: &Value, snapshot_ts: i64) -> PairSnapshot {
    let base_token = token_from_value(raw.get("baseToken"));
    let quote_token = token_from_value(raw.get("quoteToken"));

    let chain_id = {
        let c = str_field(raw, "chainId");
        if c.is_empty() { config::CHAIN_SOLANA.to_string() } else { c }
    };

    let null = Value::Null;
    let liq = raw.get("liquidity").unwrap_or(&null);
    let vol = raw.get("volume").unwrap_or(&null);
    let pc = raw.get("priceChange").unwrap_or(&null);
    let txns = raw.get("txns").unwrap_or(&null);

    let pair_created_at_ms = parse_i64(raw.get("pairCreatedAt").unwrap_or(&null));
    let age_seconds = pair_created_at_ms.map(|c| ((snapshot_ts - c) as f64) / 1000.0);

    PairSnapshot {
        snapshot_ts,
        chain_id,
        dex_id: str_field(raw, "dexId"),
        pair_address: str_field(raw, "pairAddress"),
        url: str_field(raw, "url"),
        base_token,
        quote_token,
        price_usd: parse_f64(raw.get("priceUsd").unwrap_or(&null)),
        price_native: parse_f64(raw.get("priceNative").unwrap_or(&null)),
        liquidity_usd: period_f64(liq, "usd"),
        liquidity_base: period_f64(liq, "base"),
        liquidity_quote: period_f64(liq, "quote"),
        volume_m5: period_f64(vol, "m5"),
        volume_h1: period_f64(vol, "h1"),
        volume_h6: period_f64(vol, "h6"),
        volume_h24: period_f64(vol, "h24"),
        price_change_m5: period_f64(pc, "m5"),
        price_change_h1: period_f64(pc, "h1"),
        price_change_h6: period_f64(pc, "h6"),
        price_change_h24: period_f64(pc, "h24"),
        txns_m5_buys: tx_count(txns, "m5", "buys"),
        txns_m5_sells: tx_count(txns, "m5", "sells"),
        txns_h1_buys: tx_count(txns, "h1", "buys"),
        txns_h1_sells: tx_count(txns, "h1", "sells"),
        txns_h6_buys: tx_count(txns, "h6", "buys"),
        txns_h6_sells: tx_count(txns, "h6", "sells"),
        txns_h24_buys: tx_count(txns, "h24", "buys"),
        txns_h24_sells: tx_count(txns, "h24", "sells"),
        fdv: parse_f64(raw.get("fdv").unwrap_or(&null)),
        market_cap: parse_f64(raw.get("marketCap").unwrap_or(&null)),
        pair_created_at_ms,
        age_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_f64_handles_strings_and_junk() {
        assert_eq!(parse_f64(&json!("1.25")), Some(1.25));
        assert_eq!(parse_f64(&json!(" 3 ")), Some(3.0));
        assert_eq!(parse_f64(&json!(2)), Some(2.0));
        assert_eq!(parse_f64(&json!("abc")), None);
        assert_eq!(parse_f64(&json!(null)), None);
        assert_eq!(parse_f64(&json!([1])), None);
    }

    #[test]
    fn parse_i64_goes_through_float() {
        assert_eq!(parse_i64(&json!("5.0")), Some(5));
        assert_eq!(parse_i64(&json!(7)), Some(7));
        assert_eq!(parse_i64(&json!("x")), None);
    }

    #[test]
    fn full_pair_object_normalizes() {
        let raw = json!({
            "chainId": "solana",
            "dexId": "raydium",
            "pairAddress": "PAIR1",
            "url": "https://dexscreener.com/solana/PAIR1",
            "baseToken": {"address": "BASE", "symbol": "B", "name": "Base"},
            "quoteToken": {"address": "QUOTE", "symbol": "Q", "name": "Quote"},
            "priceUsd": "0.0123",
            "priceNative": "0.0001",
            "liquidity": {"usd": 15000.0, "base": 10.0, "quote": 20.0},
            "volume": {"m5": 100.0, "h24": 5000.0},
            "priceChange": {"h1": -12.5},
            "txns": {"m5": {"buys": 3, "sells": 4}, "h24": {"buys": 50, "sells": 60}},
            "fdv": 1_000_000.0,
            "marketCap": 900_000.0,
            "pairCreatedAt": 1_700_000_000_000i64,
        });
        let snap = from_api_pair(&raw, 1_700_000_060_000);
        assert_eq!(snap.pair_address, "PAIR1");
        assert_eq!(snap.base_token.address, "BASE");
        assert_eq!(snap.price_usd, Some(0.0123));
        assert_eq!(snap.liquidity_usd, Some(15000.0));
        assert_eq!(snap.volume_m5, Some(100.0));
        assert_eq!(snap.volume_h1, None);
        assert_eq!(snap.txns_m5_buys, Some(3));
        assert_eq!(snap.txns_h24_sells, Some(60));
        assert_eq!(snap.pair_created_at_ms, Some(1_700_000_000_000));
        assert_eq!(snap.age_seconds, Some(60.0));
    }

    #[test]
    fn missing_fields_become_none_not_zero() {
        let raw = json!({"pairAddress": "PAIR2"});
        let snap = from_api_pair(&raw, 1_700_000_000_000);
        assert_eq!(snap.price_usd, None);
        assert_eq!(snap.liquidity_usd, None);
        assert_eq!(snap.txns_h24_buys, None);
        assert_eq!(snap.pair_created_at_ms, None);
        assert_eq!(snap.age_seconds, None);
        assert_eq!(snap.chain_id, "solana");
    }

    #[test]
    fn empty_pair_address_survives_as_empty_string() {
        let raw = json!({"priceUsd": "1.0"});
        let snap = from_api_pair(&raw, 1);
        assert!(snap.pair_address.is_empty());
    }

    #[test]
    fn normalization_is_a_projection() {
        // Re-normalizing the serialized snapshot of an already-normalized
        // object changes nothing.
        let raw = json!({
            "pairAddress": "PAIR3",
            "priceUsd": " 2.5 ",
            "volume": {"h24": "100"},
        });
        let first = from_api_pair(&raw, 42);
        let round = json!({
            "pairAddress": first.pair_address,
            "priceUsd": first.price_usd,
            "volume": {"h24": first.volume_h24},
        });
        let second = from_api_pair(&round, 42);
        assert_eq!(second.pair_address, first.pair_address);
        assert_eq!(second.price_usd, first.price_usd);
        assert_eq!(second.volume_h24, first.volume_h24);
    }
}
