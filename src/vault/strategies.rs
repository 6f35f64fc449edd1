//! Strategy Discovery Walker
//!
//! A vault exposes its strategies through an ordered withdrawal queue
//! with no count accessor. The walker probes slots sequentially and
//! stops at the zero-address sentinel, the vault's own end-of-queue
//! signal. Each hit is published to the store as soon as its credit and
//! name are read, so partial results are visible mid-walk; the optional
//! description enrichment can never remove a record.

use alloy_primitives::{Address, U256};
use alloy_sol_types::sol;
use eyre::Result;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::amount::TokenAmount;
use crate::reader::{CallRequest, Multicall};
use crate::registry::{VaultCategory, VaultDescriptor};
use crate::vault::{RefreshTicket, VaultStore};

sol! {
    interface IVaultQueue {
        function withdrawalQueue(uint256 index) external view returns (address);
        function creditAvailable(address strategy) external view returns (uint256);
    }

    interface IStrategy {
        function name() external view returns (string);
        function harvest() external;
    }
}

/// Queue slots are bounded on-chain; probing past this many is never
/// meaningful even if the sentinel was somehow missed.
pub const MAX_STRATEGY_SLOTS: usize = 20;

/// Fallback when the metadata service has nothing for a strategy.
pub const DEFAULT_DESCRIPTION: &str = "I don't have a description for this strategy yet.";

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRecord {
    pub address: Address,
    pub name: String,
    pub description: String,
    pub credit_available: TokenAmount,

    /// Only community vaults expose a harvest trigger on the record.
    pub harvestable: bool,
}

// ============================================
// PROBE SEAM
// ============================================

/// The vault-side reads the walker needs, kept behind a seam so the
/// termination behavior is testable with an in-memory double.
#[allow(async_fn_in_trait)]
pub trait StrategySlots {
    /// Address in queue slot `index`; the zero address is the terminal
    /// sentinel.
    async fn slot(&self, index: usize) -> Result<Address>;

    async fn credit_available(&self, strategy: Address) -> Result<U256>;

    async fn strategy_name(&self, strategy: Address) -> Result<String>;
}

/// RPC-backed probe. Each call is its own suspension point; slots are
/// intentionally not batched because the sentinel ends the walk early.
pub struct ChainSlots<'a> {
    reader: &'a Multicall,
    vault: Address,
}

impl<'a> ChainSlots<'a> {
    pub fn new(reader: &'a Multicall, vault: Address) -> Self {
        Self { reader, vault }
    }

    async fn single(&self, call: CallRequest) -> Result<crate::reader::CallResult> {
        let mut results = self.reader.batch(vec![call]).await?;
        Ok(results.remove(0))
    }
}

impl StrategySlots for ChainSlots<'_> {
    async fn slot(&self, index: usize) -> Result<Address> {
        let res = self
            .single(CallRequest::new(
                self.vault,
                IVaultQueue::withdrawalQueueCall {
                    index: U256::from(index),
                },
            ))
            .await?;
        // a reverting slot read past the queue end behaves like the sentinel
        Ok(res.decode_address().unwrap_or(Address::ZERO))
    }

    async fn credit_available(&self, strategy: Address) -> Result<U256> {
        let res = self
            .single(CallRequest::new(
                self.vault,
                IVaultQueue::creditAvailableCall { strategy },
            ))
            .await?;
        Ok(res.decode_uint().unwrap_or(U256::ZERO))
    }

    async fn strategy_name(&self, strategy: Address) -> Result<String> {
        let res = self
            .single(CallRequest::new(strategy, IStrategy::nameCall {}))
            .await?;
        Ok(res
            .decode_string()
            .unwrap_or_else(|| format!("Strategy {:#x}", strategy)))
    }
}

// ============================================
// METADATA ENRICHMENT
// ============================================

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    description: Option<String>,
}

lazy_static::lazy_static! {
    /// Descriptions barely change; cache them for the process lifetime.
    static ref DESCRIPTION_CACHE: Arc<RwLock<HashMap<(u64, Address), String>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

/// Client for the external strategy-metadata service. Every failure mode
/// degrades to the default description.
pub struct MetadataClient {
    http: Client,
    base_url: String,
}

impl MetadataClient {
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { http, base_url }
    }

    /// Description for a strategy, or the default fallback. Never errors.
    pub async fn description(&self, chain_id: u64, strategy: Address) -> String {
        {
            let cache = DESCRIPTION_CACHE.read().await;
            if let Some(hit) = cache.get(&(chain_id, strategy)) {
                trace!(?strategy, "description cache hit");
                return hit.clone();
            }
        }

        let url = format!("{}/{}/strategies/{:#x}", self.base_url, chain_id, strategy);
        let fetched = match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<MetadataResponse>()
                .await
                .ok()
                .and_then(|m| m.description)
                .filter(|d| !d.is_empty()),
            Ok(resp) => {
                debug!(?strategy, status = %resp.status(), "no metadata record");
                None
            }
            Err(e) => {
                warn!(?strategy, "metadata fetch failed: {}", e);
                None
            }
        };

        let description = fetched.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
        DESCRIPTION_CACHE
            .write()
            .await
            .insert((chain_id, strategy), description.clone());
        description
    }
}

// ============================================
// THE WALK
// ============================================

/// Probe the vault's queue until the sentinel, publishing each record
/// incrementally. Returns the records in slot order.
///
/// Enrichment happens as a second pass per record: the bare record
/// (name, credit, default description) is visible in the store before
/// its description resolves, and an enrichment failure leaves it intact.
pub async fn walk_strategies<S: StrategySlots>(
    slots: &S,
    desc: &VaultDescriptor,
    metadata: &MetadataClient,
    store: &VaultStore,
    ticket: RefreshTicket,
) -> Result<Vec<StrategyRecord>> {
    let key = (desc.chain_id, desc.address);
    if !store.begin_walk(ticket, key).await {
        return Ok(Vec::new());
    }

    let harvestable = desc.category == VaultCategory::Community;
    let mut records = Vec::new();

    for index in 0..MAX_STRATEGY_SLOTS {
        let strategy = slots.slot(index).await?;
        if strategy.is_zero() {
            // the vault's own signal that the queue ends here
            break;
        }

        let credit = slots.credit_available(strategy).await.unwrap_or(U256::ZERO);
        let name = slots
            .strategy_name(strategy)
            .await
            .unwrap_or_else(|_| format!("Strategy {:#x}", strategy));

        let record = StrategyRecord {
            address: strategy,
            name,
            description: DEFAULT_DESCRIPTION.to_string(),
            credit_available: TokenAmount::from_raw(credit, desc.want_decimals),
            harvestable,
        };
        store.push_strategy(ticket, key, record.clone()).await;
        records.push(record);
    }

    debug!(slug = %desc.slug, found = records.len(), "strategy walk complete");

    // enrichment pass: patches records in place, never removes one
    for record in &mut records {
        let description = metadata.description(desc.chain_id, record.address).await;
        if description != record.description {
            record.description = description;
            store.push_strategy(ticket, key, record.clone()).await;
        }
    }

    Ok(records)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory queue that counts how far the walker probed.
    struct FakeSlots {
        queue: Vec<Address>,
        probes: AtomicUsize,
    }

    impl FakeSlots {
        fn new(queue: Vec<Address>) -> Self {
            Self { queue, probes: AtomicUsize::new(0) }
        }
    }

    impl StrategySlots for FakeSlots {
        async fn slot(&self, index: usize) -> Result<Address> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.queue.get(index).copied().unwrap_or(Address::ZERO))
        }

        async fn credit_available(&self, _strategy: Address) -> Result<U256> {
            Ok(U256::from(1_000_000u64))
        }

        async fn strategy_name(&self, strategy: Address) -> Result<String> {
            Ok(format!("Strat {}", strategy.0[0]))
        }
    }

    fn test_desc() -> VaultDescriptor {
        crate::registry::Catalog::builtin()
            .by_slug("dai-yielder")
            .unwrap()
            .clone()
    }

    fn unreachable_metadata() -> MetadataClient {
        // closed port: every fetch fails and falls back to the default
        MetadataClient::new("http://127.0.0.1:1/meta".to_string())
    }

    #[tokio::test]
    async fn stops_at_sentinel_without_probing_past_it() {
        let a = Address::repeat_byte(0xA1);
        let b = Address::repeat_byte(0xB2);
        let slots = FakeSlots::new(vec![a, b, Address::ZERO, Address::repeat_byte(0xC3)]);

        let store = VaultStore::new();
        let ticket = store.ticket().await;
        let records = walk_strategies(&slots, &test_desc(), &unreachable_metadata(), &store, ticket)
            .await
            .unwrap();

        let found: Vec<Address> = records.iter().map(|r| r.address).collect();
        assert_eq!(found, vec![a, b]);
        // probed 0, 1, and the sentinel at 2; slot 3 never touched
        assert_eq!(slots.probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_queue_terminates_immediately() {
        let slots = FakeSlots::new(vec![]);
        let store = VaultStore::new();
        let ticket = store.ticket().await;
        let records = walk_strategies(&slots, &test_desc(), &unreachable_metadata(), &store, ticket)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(slots.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_queue_is_bounded() {
        let slots = FakeSlots::new(vec![Address::repeat_byte(1); 64]);
        let store = VaultStore::new();
        let ticket = store.ticket().await;
        // 64 identical entries patch into one record, but the probe count
        // proves the defensive bound held
        let _ = walk_strategies(&slots, &test_desc(), &unreachable_metadata(), &store, ticket)
            .await
            .unwrap();
        assert_eq!(slots.probes.load(Ordering::SeqCst), MAX_STRATEGY_SLOTS);
    }

    #[tokio::test]
    async fn enrichment_failure_keeps_the_record() {
        let a = Address::repeat_byte(0xA1);
        let slots = FakeSlots::new(vec![a, Address::ZERO]);
        let store = VaultStore::new();
        let ticket = store.ticket().await;
        let records = walk_strategies(&slots, &test_desc(), &unreachable_metadata(), &store, ticket)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, DEFAULT_DESCRIPTION);
        assert_eq!(records[0].name, "Strat 161");
        assert!(!records[0].credit_available.is_zero());

        let stored = store.strategies((1, test_desc().address)).await;
        assert_eq!(stored, records);
    }

    #[tokio::test]
    async fn only_community_vaults_are_harvestable() {
        let a = Address::repeat_byte(0xA1);
        let store = VaultStore::new();

        let mut desc = test_desc();
        desc.category = VaultCategory::Community;
        let slots = FakeSlots::new(vec![a, Address::ZERO]);
        let ticket = store.ticket().await;
        let records = walk_strategies(&slots, &desc, &unreachable_metadata(), &store, ticket)
            .await
            .unwrap();
        assert!(records[0].harvestable);

        desc.category = VaultCategory::Experimental;
        let slots = FakeSlots::new(vec![a, Address::ZERO]);
        let ticket = store.ticket().await;
        let records = walk_strategies(&slots, &desc, &unreachable_metadata(), &store, ticket)
            .await
            .unwrap();
        assert!(!records[0].harvestable);
    }
}
