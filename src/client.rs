// client.rs - DexScreener public API client: timeout, retries, rate limiting
//
// One request per pair id, batched token lookups, and token-profile
// discovery. Payload shapes vary by endpoint; the flatten_* helpers fold
// them all into plain pair objects.

use anyhow::{ anyhow, Context, Result };
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::time::{ Duration, Instant };
use tokio::sync::Mutex;

use crate::config;
use crate::logger::{ log, LogTag };

/// HTTP client for the DexScreener public API with retries and rate limiting.
pub struct DexScreenerClient {
    http: Client,
    base_url: String,
    chain_id: String,
    max_retries: u32,
    backoff_base: f64,
    rate_limit_rps: f64,
    last_request: Mutex<Option<Instant>>,
}

struct AttemptError {
    retryable: bool,
    error: anyhow::Error,
}

impl DexScreenerClient {
    pub fn new(
        timeout_sec: f64,
        max_retries: u32,
        backoff_base: f64,
        rate_limit_rps: f64
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs_f64(timeout_sec))
            .user_agent("solscreener/0.3")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url: config::BASE_URL.trim_end_matches('/').to_string(),
            chain_id: config::CHAIN_SOLANA.to_string(),
            max_retries: max_retries.max(1),
            backoff_base,
            rate_limit_rps,
            last_request: Mutex::new(None),
        })
    }

    /// Client with the default collector profile.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            config::DEFAULT_TIMEOUT_SEC,
            config::DEFAULT_MAX_RETRIES,
            config::DEFAULT_BACKOFF_BASE,
            config::DEFAULT_RATE_LIMIT_RPS
        )
    }

    /// Override the base URL (tests and mirrors).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Sleep until the minimum spacing of 1/rps since the previous request
    /// has elapsed, then stamp this request.
    pub(crate) async fn throttle(&self) {
        if self.rate_limit_rps <= 0.0 {
            return;
        }
        let min_interval = Duration::from_secs_f64(1.0 / self.rate_limit_rps);
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn attempt(&self, url: &str) -> std::result::Result<Value, AttemptError> {
        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                let retryable = e.is_timeout() || e.is_connect();
                return Err(AttemptError {
                    retryable,
                    error: anyhow::Error::new(e).context("request failed"),
                });
            }
        };
        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AttemptError {
                retryable: true,
                error: anyhow!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(AttemptError {
                retryable: false,
                error: anyhow!("HTTP {}", status),
            });
        }
        match resp.json::<Value>().await {
            Ok(v) => Ok(v),
            Err(e) =>
                Err(AttemptError {
                    retryable: false,
                    error: anyhow::Error::new(e).context("invalid JSON body"),
                }),
        }
    }

    /// GET a path with throttle, bounded exponential backoff and jitter.
    /// 429/5xx/timeout/connect failures retry; other 4xx fail immediately.
    async fn request(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..self.max_retries {
            self.throttle().await;
            match self.attempt(&url).await {
                Ok(v) => {
                    return Ok(v);
                }
                Err(e) if e.retryable => {
                    if attempt + 1 < self.max_retries {
                        let jitter = rand::thread_rng().gen_range(0.0..config::BACKOFF_JITTER_MAX);
                        let delay = self.backoff_base * (2f64).powi(attempt as i32) + jitter;
                        log(
                            LogTag::Collector,
                            "WARN",
                            &format!(
                                "Request failed (attempt {}/{}), retry in {:.2}s: {}",
                                attempt + 1,
                                self.max_retries,
                                delay,
                                e.error
                            )
                        );
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    } else {
                        log(
                            LogTag::Collector,
                            "ERROR",
                            &format!("Request failed after {} retries: {}", self.max_retries, e.error)
                        );
                    }
                    last_err = Some(e.error);
                }
                Err(e) => {
                    return Err(e.error);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("request failed with no error recorded")))
    }

    /// Fetch pairs by pair addresses, one request per pair id.
    /// GET /latest/dex/pairs/{chainId}/{pairId}. Failed ids are skipped.
    pub async fn get_pairs_by_pair_addresses(&self, pair_addresses: &[String]) -> Vec<Value> {
        let mut all_pairs = Vec::new();
        for pair_id in pair_addresses {
            let path = format!("/latest/dex/pairs/{}/{}", self.chain_id, pair_id);
            match self.request(&path).await {
                Ok(data) => all_pairs.extend(flatten_pair_payload(&data)),
                Err(e) => {
                    let short: String = pair_id.chars().take(16).collect();
                    log(
                        LogTag::Collector,
                        "WARN",
                        &format!("get_pairs_by_pair_addresses failed for {}: {}", short, e)
                    );
                }
            }
        }
        all_pairs
    }

    /// Fetch pairs by token addresses, chunked by the API's 30-id limit.
    /// GET /tokens/v1/{chainId}/{addr1,addr2,...}. Failed chunks are skipped.
    pub async fn get_pairs_by_token_addresses_batched(&self, token_addresses: &[String]) -> Vec<Value> {
        let mut all_pairs = Vec::new();
        for chunk in token_addresses.chunks(config::TOKENS_CHUNK_SIZE) {
            let path = format!("/tokens/v1/{}/{}", self.chain_id, chunk.join(","));
            match self.request(&path).await {
                Ok(data) => all_pairs.extend(flatten_pairs_list(&data)),
                Err(e) => {
                    log(
                        LogTag::Collector,
                        "WARN",
                        &format!("get_pairs_by_token_addresses_batched chunk failed: {}", e)
                    );
                }
            }
        }
        all_pairs
    }

    /// Fetch latest token profiles; returns Solana token addresses only.
    /// GET /token-profiles/latest/v1 (upstream caps this at 60 req/min).
    pub async fn get_latest_token_profiles(&self) -> Result<Vec<String>> {
        let data = self.request("/token-profiles/latest/v1").await?;
        Ok(extract_profile_addresses(&data, &self.chain_id))
    }
}

/// Fold a /latest/dex/pairs response into pair objects: either
/// `{pairs: [...]}`, `{pair: {...}}`, or a bare pair object.
pub fn flatten_pair_payload(data: &Value) -> Vec<Value> {
    if let Some(pairs) = data.get("pairs").and_then(|p| p.as_array()) {
        return pairs.clone();
    }
    if let Some(pair) = data.get("pair") {
        if has_pair_address(pair) {
            return vec![pair.clone()];
        }
    }
    if has_pair_address(data) {
        return vec![data.clone()];
    }
    Vec::new()
}

/// Fold a /tokens/v1 response into pair objects: a bare array,
/// `{pairs: [...]}`, or a single bare pair object.
pub fn flatten_pairs_list(data: &Value) -> Vec<Value> {
    if let Some(arr) = data.as_array() {
        return arr.clone();
    }
    if let Some(pairs) = data.get("pairs").and_then(|p| p.as_array()) {
        return pairs.clone();
    }
    if has_pair_address(data) {
        return vec![data.clone()];
    }
    Vec::new()
}

/// Pull token addresses for one chain out of a token-profiles payload.
/// The list may be bare or live under profiles/tokenProfiles/token_profiles/data.
pub fn extract_profile_addresses(data: &Value, chain_id: &str) -> Vec<String> {
    let items: Vec<&Value> = if let Some(arr) = data.as_array() {
        arr.iter().collect()
    } else {
        ["profiles", "tokenProfiles", "token_profiles", "data"]
            .iter()
            .find_map(|key| data.get(*key).and_then(|v| v.as_array()))
            .map(|arr| arr.iter().collect())
            .unwrap_or_default()
    };

    let mut addresses = Vec::new();
    for item in items {
        let chain = item
            .get("chainId")
            .or_else(|| item.get("chain_id"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if chain != chain_id {
            continue;
        }
        let addr = item
            .get("tokenAddress")
            .or_else(|| item.get("token_address"))
            .or_else(|| item.get("address"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if !addr.is_empty() {
            addresses.push(addr);
        }
    }
    addresses
}

fn has_pair_address(v: &Value) -> bool {
    v.get("pairAddress")
        .and_then(|a| a.as_str())
        .map(|a| !a.trim().is_empty())
        .unwrap_or(false)
}
