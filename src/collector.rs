// collector.rs - Ingestion pipeline: fetch via client, normalize via models,
// persist via database. Per-item failures become error counts, never cycle
// aborts.

use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::client::DexScreenerClient;
use crate::database::Database;
use crate::logger::{ log, LogTag };
use crate::models::from_api_pair;

/// Parse an input as a file path (first CSV column per row) or as a
/// comma-separated list. Returns non-empty trimmed addresses.
pub fn parse_addresses_input(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() {
        return Vec::new();
    }
    let path = Path::new(value);
    if path.is_file() {
        let mut addresses = Vec::new();
        match std::fs::read(path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                for line in text.lines() {
                    let first = line.split(',').next().unwrap_or("").trim();
                    // Strip a UTF-8 BOM that survives from spreadsheet exports.
                    let first = first.trim_start_matches('\u{feff}');
                    if !first.is_empty() {
                        addresses.push(first.to_string());
                    }
                }
            }
            Err(e) => {
                log(LogTag::Collector, "WARN", &format!("Failed to read file {}: {}", value, e));
            }
        }
        return addresses;
    }
    value
        .split(',')
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|a| a.to_string())
        .collect()
}

/// Orchestrates fetch -> normalize -> persist.
pub struct Collector<'a> {
    client: &'a DexScreenerClient,
    db: &'a Database,
}

impl<'a> Collector<'a> {
    pub fn new(client: &'a DexScreenerClient, db: &'a Database) -> Self {
        Self { client, db }
    }

    /// Mode A: fetch pairs by token addresses, normalize, persist.
    /// Returns (pairs_processed, errors).
    pub async fn collect_for_tokens(&self, token_addresses: &[String]) -> (u64, u64) {
        if token_addresses.is_empty() {
            log(LogTag::Collector, "INFO", "collect_for_tokens: no token addresses provided");
            return (0, 0);
        }
        log(
            LogTag::Collector,
            "INFO",
            &format!("collect_for_tokens: starting for {} token address(es)", token_addresses.len())
        );
        let raw_pairs = self.client.get_pairs_by_token_addresses_batched(token_addresses).await;
        self.persist_pairs(&raw_pairs)
    }

    /// Mode B: fetch pairs by pair addresses, normalize, persist.
    /// Returns (pairs_processed, errors).
    pub async fn collect_for_pairs(&self, pair_addresses: &[String]) -> (u64, u64) {
        if pair_addresses.is_empty() {
            log(LogTag::Collector, "INFO", "collect_for_pairs: no pair addresses provided");
            return (0, 0);
        }
        log(
            LogTag::Collector,
            "INFO",
            &format!("collect_for_pairs: starting for {} pair address(es)", pair_addresses.len())
        );
        let raw_pairs = self.client.get_pairs_by_pair_addresses(pair_addresses).await;
        self.persist_pairs(&raw_pairs)
    }

    /// Keep only raw pairs whose address is non-empty and not already known,
    /// then persist. Returns (processed, errors, skipped).
    pub fn collect_from_raw_pairs(
        &self,
        raw_pairs: &[Value],
        known_pair_addresses: &HashSet<String>
    ) -> (u64, u64, u64) {
        let filtered: Vec<Value> = raw_pairs
            .iter()
            .filter(|raw| {
                let addr = raw
                    .get("pairAddress")
                    .or_else(|| raw.get("pair_address"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim();
                !addr.is_empty() && !known_pair_addresses.contains(addr)
            })
            .cloned()
            .collect();
        let skipped = (raw_pairs.len() - filtered.len()) as u64;
        let (processed, errors) = self.persist_pairs(&filtered);
        (processed, errors, skipped)
    }

    /// Normalize raw API pairs and write each through the store's single
    /// persist step (tokens, pair, snapshot, dump-watchlist update). One
    /// snapshot timestamp is shared by the whole batch.
    fn persist_pairs(&self, raw_pairs: &[Value]) -> (u64, u64) {
        let snapshot_ts = chrono::Utc::now().timestamp_millis();
        let mut processed: u64 = 0;
        let mut errors: u64 = 0;
        for raw in raw_pairs {
            let snapshot = from_api_pair(raw, snapshot_ts);
            if snapshot.pair_address.is_empty() {
                log(LogTag::Collector, "WARN", "Skipping pair with empty pair_address");
                errors += 1;
                continue;
            }
            match self.db.persist_snapshot(&snapshot, snapshot_ts) {
                Ok(()) => {
                    processed += 1;
                }
                Err(e) => {
                    log(LogTag::Collector, "WARN", &format!("Failed to persist pair: {}", e));
                    errors += 1;
                }
            }
        }
        log(
            LogTag::Collector,
            "INFO",
            &format!("Persisted {} pair(s), {} error(s)", processed, errors)
        );
        (processed, errors)
    }
}
