//! Price Quote Oracle
//!
//! Fetches USD unit prices from the external quote service, batched by
//! price-source tag. Quotes are cached briefly to stay inside rate
//! limits, and every failure mode resolves to "no quote" so USD-valued
//! fields degrade instead of poisoning a refresh cycle.

use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

// ============================================
// CONSTANTS
// ============================================

/// Default quote service endpoint.
const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Cache duration for quotes (avoid hitting rate limits)
const CACHE_DURATION_SECS: u64 = 60;

/// Timeout for API calls
const API_TIMEOUT_SECS: u64 = 8;

// ============================================
// API RESPONSE TYPES
// ============================================

#[derive(Debug, Deserialize)]
struct QuotePoint {
    usd: Option<f64>,
}

#[derive(Debug, Clone)]
struct CachedQuote {
    usd: f64,
    fetched_at: Instant,
}

impl CachedQuote {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > Duration::from_secs(CACHE_DURATION_SECS)
    }
}

// ============================================
// ORACLE
// ============================================

pub struct PriceOracle {
    http: Client,
    base_url: String,
    cache: Arc<RwLock<HashMap<String, CachedQuote>>>,
}

impl PriceOracle {
    pub fn new(base_url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Batched USD quotes for a set of tags. Tags the service does not
    /// know are simply absent from the result.
    pub async fn usd_prices(&self, tags: &[&str]) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        let mut missing: Vec<&str> = Vec::new();

        {
            let cache = self.cache.read().await;
            for tag in tags {
                match cache.get(*tag) {
                    Some(hit) if !hit.is_stale() => {
                        trace!(tag, "quote cache hit");
                        out.insert(tag.to_string(), hit.usd);
                    }
                    _ => missing.push(tag),
                }
            }
        }

        if missing.is_empty() {
            return out;
        }

        match self.fetch_batch(&missing).await {
            Ok(fresh) => {
                let mut cache = self.cache.write().await;
                let now = Instant::now();
                for (tag, usd) in fresh {
                    cache.insert(
                        tag.clone(),
                        CachedQuote {
                            usd,
                            fetched_at: now,
                        },
                    );
                    out.insert(tag, usd);
                }
            }
            Err(e) => {
                // degraded, not fatal: USD fields go unavailable
                warn!("quote fetch failed: {}", e);
            }
        }

        out
    }

    /// Single-tag convenience over the batched path.
    pub async fn usd_price(&self, tag: &str) -> Option<f64> {
        self.usd_prices(&[tag]).await.get(tag).copied()
    }

    async fn fetch_batch(&self, tags: &[&str]) -> eyre::Result<HashMap<String, f64>> {
        let ids = tags.join(",");
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, ids
        );

        let resp: HashMap<String, QuotePoint> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let quoted: HashMap<String, f64> = resp
            .into_iter()
            .filter_map(|(tag, point)| point.usd.map(|usd| (tag, usd)))
            .collect();

        debug!(
            requested = tags.len(),
            quoted = quoted.len(),
            "quotes fetched"
        );
        Ok(quoted)
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_quote_staleness() {
        let quote = CachedQuote {
            usd: 1.0,
            fetched_at: Instant::now(),
        };
        assert!(!quote.is_stale());
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_empty() {
        let oracle = PriceOracle::new(Some("http://127.0.0.1:1".to_string()));
        let quotes = oracle.usd_prices(&["dai", "weth"]).await;
        assert!(quotes.is_empty());
        assert_eq!(oracle.usd_price("dai").await, None);
    }
}
