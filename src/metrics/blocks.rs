//! Block-Height-By-Timestamp Client
//!
//! Thin client over the external lookup service that resolves the
//! nearest block at or before a Unix timestamp. Only the APY estimator
//! uses it.

use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const API_TIMEOUT_SECS: u64 = 8;

#[derive(Debug, Deserialize)]
struct BlockResponse {
    height: u64,
    timestamp: u64,
}

pub struct BlockLookup {
    http: Client,
    base_url: String,
}

impl BlockLookup {
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { http, base_url }
    }

    /// Nearest block at or before `timestamp` on the given chain.
    pub async fn height_at(&self, chain_slug: &str, timestamp: u64) -> Result<u64> {
        let url = format!("{}/block/{}/{}", self.base_url, chain_slug, timestamp);
        let resp: BlockResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| eyre!("block lookup failed: {}", e))?
            .error_for_status()
            .map_err(|e| eyre!("block lookup rejected: {}", e))?
            .json()
            .await
            .map_err(|e| eyre!("block lookup returned junk: {}", e))?;

        if resp.timestamp > timestamp {
            return Err(eyre!(
                "block lookup returned a block after the requested time ({} > {})",
                resp.timestamp,
                timestamp
            ));
        }
        Ok(resp.height)
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_is_an_error_not_a_panic() {
        let lookup = BlockLookup::new("http://127.0.0.1:1".to_string());
        assert!(lookup.height_at("ethereum", 1_700_000_000).await.is_err());
    }
}
