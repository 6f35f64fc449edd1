//! Vault State & Refresh Cycle
//!
//! A `VaultState` is a per-descriptor, per-refresh snapshot of everything
//! a vault screen needs. One refresh cycle builds a single multicall
//! batch, decodes it, derives the USD and utilization fields, and commits
//! the snapshot as one atomic replacement. The store hands out generation
//! tickets so a cycle that raced a focus change discards its results
//! instead of mixing two cycles' fields.

pub mod strategies;

use alloy_primitives::{Address, U256};
use alloy_sol_types::sol;
use eyre::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::amount::TokenAmount;
use crate::metrics;
use crate::oracle::PriceOracle;
use crate::reader::{CallRequest, Multicall};
use crate::registry::{AbiVariant, VaultDescriptor};

use strategies::StrategyRecord;

sol! {
    interface IVaultV3 {
        function pricePerShare() external view returns (uint256);
        function totalAssets() external view returns (uint256);
        function depositLimit() external view returns (uint256);
        function availableDepositLimit() external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function activation() external view returns (uint256);
    }

    interface IVaultLegacy {
        function getPricePerFullShare() external view returns (uint256);
        function balance() external view returns (uint256);
    }

    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}

// ============================================
// STATE SNAPSHOT
// ============================================

/// Point-in-time snapshot for one vault. Every on-chain field is an
/// `Option`: a reverting multicall entry leaves that field unavailable
/// without touching the rest.
#[derive(Debug, Clone, Default)]
pub struct VaultState {
    /// False until the first successful refresh commits.
    pub loaded: bool,

    pub price_per_share: Option<TokenAmount>,
    pub total_assets: Option<TokenAmount>,
    pub deposit_limit: Option<TokenAmount>,
    pub available_deposit_limit: Option<TokenAmount>,

    /// Caller's vault shares.
    pub share_balance: Option<TokenAmount>,
    /// Caller's underlying-asset balance.
    pub want_balance: Option<TokenAmount>,
    /// Underlying allowance granted to the vault.
    pub vault_allowance: Option<TokenAmount>,
    /// Share allowance granted to the zap contract.
    pub zap_allowance: Option<TokenAmount>,
    /// Underlying allowance granted to the chain's router.
    pub router_allowance: Option<TokenAmount>,
    /// Caller's native coin balance.
    pub coin_balance: Option<TokenAmount>,

    /// USD value of the caller's shares; `None` when the quote is
    /// unavailable (0 is a legitimate value, so it is never the fallback).
    pub balance_usd: Option<f64>,
    /// USD value of everything the vault holds.
    pub total_aum_usd: Option<f64>,

    /// Deposit utilization in `[0, 1]`.
    pub utilization: f64,

    /// Vault activation timestamp, for the APY horizons.
    pub activation: Option<u64>,
}

// ============================================
// KEYED STORE
// ============================================

pub type VaultKey = (u64, Address);

/// Ticket captured at the start of a refresh or walk. A commit is only
/// honored while the store's generation still matches.
#[derive(Debug, Clone, Copy)]
pub struct RefreshTicket {
    generation: u64,
}

#[derive(Default)]
struct StoreInner {
    generation: u64,
    states: HashMap<VaultKey, VaultState>,
    strategies: HashMap<VaultKey, Vec<StrategyRecord>>,
}

/// Keyed store of live vault state, owned by the engine and passed by
/// reference to refresh and walk cycles.
#[derive(Default)]
pub struct VaultStore {
    inner: RwLock<StoreInner>,
}

impl VaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate all in-flight cycles (active chain or vault changed).
    /// Results produced under older tickets are discarded on arrival.
    pub async fn invalidate_inflight(&self) {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        debug!(generation = inner.generation, "in-flight cycles invalidated");
    }

    /// Ticket for a cycle starting now.
    pub async fn ticket(&self) -> RefreshTicket {
        RefreshTicket {
            generation: self.inner.read().await.generation,
        }
    }

    /// Atomically replace a vault's snapshot. Returns false (and drops
    /// the snapshot) when the ticket is stale.
    pub async fn commit_state(
        &self,
        ticket: RefreshTicket,
        key: VaultKey,
        state: VaultState,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if ticket.generation != inner.generation {
            debug!(?key, "stale refresh discarded");
            return false;
        }
        inner.states.insert(key, state);
        true
    }

    /// Start a fresh strategy walk for a vault: the previous walk's
    /// records are replaced wholesale, then appended incrementally.
    pub async fn begin_walk(&self, ticket: RefreshTicket, key: VaultKey) -> bool {
        let mut inner = self.inner.write().await;
        if ticket.generation != inner.generation {
            return false;
        }
        inner.strategies.insert(key, Vec::new());
        true
    }

    /// Append one discovered strategy. Records are keyed by address
    /// within the vault's list; a re-discovered address is patched in
    /// place (enrichment may land after the initial append).
    pub async fn push_strategy(
        &self,
        ticket: RefreshTicket,
        key: VaultKey,
        record: StrategyRecord,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if ticket.generation != inner.generation {
            debug!(?key, "stale strategy record discarded");
            return false;
        }
        let list = inner.strategies.entry(key).or_default();
        match list.iter_mut().find(|r| r.address == record.address) {
            Some(existing) => *existing = record,
            None => list.push(record),
        }
        true
    }

    pub async fn state(&self, key: VaultKey) -> VaultState {
        self.inner
            .read()
            .await
            .states
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn strategies(&self, key: VaultKey) -> Vec<StrategyRecord> {
        self.inner
            .read()
            .await
            .strategies
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }
}

// ============================================
// REFRESH CYCLE
// ============================================

/// Call layout inside the refresh batch. Optional targets keep their
/// slot with a placeholder so the stride never shifts.
const IDX_PPS: usize = 0;
const IDX_TOTAL: usize = 1;
const IDX_LIMIT: usize = 2;
const IDX_AVAILABLE: usize = 3;
const IDX_SHARES: usize = 4;
const IDX_WANT: usize = 5;
const IDX_ALLOWANCE: usize = 6;
const IDX_ZAP_ALLOWANCE: usize = 7;
const IDX_ROUTER_ALLOWANCE: usize = 8;
const IDX_ACTIVATION: usize = 9;
const STRIDE: usize = 10;

fn build_refresh_batch(desc: &VaultDescriptor, user: Address, router: Option<Address>) -> Vec<CallRequest> {
    let vault = desc.address;
    let mut calls = Vec::with_capacity(STRIDE);

    match desc.abi {
        AbiVariant::V3 => {
            calls.push(CallRequest::new(vault, IVaultV3::pricePerShareCall {}));
            calls.push(CallRequest::new(vault, IVaultV3::totalAssetsCall {}));
        }
        AbiVariant::Legacy => {
            calls.push(CallRequest::new(vault, IVaultLegacy::getPricePerFullShareCall {}));
            calls.push(CallRequest::new(vault, IVaultLegacy::balanceCall {}));
        }
    }
    calls.push(CallRequest::new(vault, IVaultV3::depositLimitCall {}));
    calls.push(CallRequest::new(vault, IVaultV3::availableDepositLimitCall {}));
    calls.push(CallRequest::new(vault, IVaultV3::balanceOfCall { owner: user }));
    calls.push(CallRequest::new(desc.want, IERC20::balanceOfCall { owner: user }));
    calls.push(CallRequest::new(
        desc.want,
        IERC20::allowanceCall { owner: user, spender: vault },
    ));
    calls.push(match desc.zap {
        Some(zap) => CallRequest::new(vault, IVaultV3::allowanceCall { owner: user, spender: zap }),
        None => CallRequest::placeholder(),
    });
    calls.push(match router {
        Some(router) => CallRequest::new(
            desc.want,
            IERC20::allowanceCall { owner: user, spender: router },
        ),
        None => CallRequest::placeholder(),
    });
    calls.push(CallRequest::new(vault, IVaultV3::activationCall {}));

    calls
}

/// Share-price decimals differ by ABI generation: legacy vaults report a
/// 1e18 fixed-point price, v3 vaults use the underlying's decimals.
pub fn pps_decimals(desc: &VaultDescriptor) -> u8 {
    match desc.abi {
        AbiVariant::Legacy => 18,
        AbiVariant::V3 => desc.want_decimals,
    }
}

/// Run one full refresh cycle for a vault: one multicall batch, native
/// balance, USD quote, derived fields, atomic commit.
///
/// Returns true when the snapshot was committed; false when a focus
/// change made the cycle stale.
pub async fn refresh_vault(
    reader: &Multicall,
    desc: &VaultDescriptor,
    user: Address,
    store: &VaultStore,
    oracle: &PriceOracle,
) -> Result<bool> {
    let chain = reader.chain();
    let ticket = store.ticket().await;

    let calls = build_refresh_batch(desc, user, chain.router);
    let results = reader.batch(calls).await?;

    let amount = |idx: usize, decimals: u8| -> Option<TokenAmount> {
        results[idx].decode_uint().map(|v| TokenAmount::from_raw(v, decimals))
    };

    let d = desc.want_decimals;
    let mut state = VaultState {
        loaded: true,
        price_per_share: amount(IDX_PPS, pps_decimals(desc)),
        total_assets: amount(IDX_TOTAL, d),
        deposit_limit: amount(IDX_LIMIT, d),
        available_deposit_limit: amount(IDX_AVAILABLE, d),
        share_balance: amount(IDX_SHARES, d),
        want_balance: amount(IDX_WANT, d),
        vault_allowance: amount(IDX_ALLOWANCE, d),
        zap_allowance: amount(IDX_ZAP_ALLOWANCE, d),
        router_allowance: amount(IDX_ROUTER_ALLOWANCE, d),
        coin_balance: None,
        balance_usd: None,
        total_aum_usd: None,
        utilization: 0.0,
        activation: results[IDX_ACTIVATION]
            .decode_uint()
            .and_then(|v| u64::try_from(v).ok()),
    };

    // native balance rides the same cycle but not the aggregate call
    state.coin_balance = reader
        .native_balance(user)
        .await
        .ok()
        .map(|v: U256| TokenAmount::from_raw(v, 18));

    let price = match desc.price_source() {
        Some(tag) => oracle.usd_price(tag).await,
        None => None,
    };
    state.balance_usd = metrics::balance_value_usd(
        state.share_balance.as_ref(),
        state.price_per_share.as_ref(),
        price,
    );
    state.total_aum_usd = metrics::total_aum_usd(state.total_assets.as_ref(), price);
    state.utilization = metrics::utilization(
        state.deposit_limit.as_ref(),
        state.available_deposit_limit.as_ref(),
        desc.status,
    );

    let committed = store
        .commit_state(ticket, (desc.chain_id, desc.address), state)
        .await;
    if committed {
        info!(slug = %desc.slug, chain = chain.id, "vault state refreshed");
    }
    Ok(committed)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Catalog;

    fn desc() -> VaultDescriptor {
        Catalog::builtin().by_slug("dai-yielder").unwrap().clone()
    }

    #[test]
    fn batch_layout_is_stable() {
        let d = desc();
        let user = Address::repeat_byte(7);
        let calls = build_refresh_batch(&d, user, None);
        assert_eq!(calls.len(), STRIDE);
        // dai-yielder has no zap and we passed no router: placeholders
        assert_eq!(calls[IDX_ZAP_ALLOWANCE].target, Address::ZERO);
        assert_eq!(calls[IDX_ROUTER_ALLOWANCE].target, Address::ZERO);
        // want-targeted reads hit the token, vault reads hit the vault
        assert_eq!(calls[IDX_WANT].target, d.want);
        assert_eq!(calls[IDX_PPS].target, d.address);
    }

    #[test]
    fn legacy_pps_is_fixed_18() {
        let mut d = desc();
        d.abi = AbiVariant::Legacy;
        d.want_decimals = 6;
        assert_eq!(pps_decimals(&d), 18);
        d.abi = AbiVariant::V3;
        assert_eq!(pps_decimals(&d), 6);
    }

    #[tokio::test]
    async fn stale_ticket_cannot_commit() {
        let store = VaultStore::new();
        let key = (1u64, Address::repeat_byte(1));

        let ticket = store.ticket().await;
        store.invalidate_inflight().await;

        let mut state = VaultState::default();
        state.loaded = true;
        assert!(!store.commit_state(ticket, key, state).await);
        assert!(!store.state(key).await.loaded);

        // a ticket from after the bump commits fine
        let fresh = store.ticket().await;
        let mut state = VaultState::default();
        state.loaded = true;
        assert!(store.commit_state(fresh, key, state).await);
        assert!(store.state(key).await.loaded);
    }

    #[tokio::test]
    async fn strategy_records_patch_in_place() {
        let store = VaultStore::new();
        let key = (1u64, Address::repeat_byte(1));
        let ticket = store.ticket().await;
        assert!(store.begin_walk(ticket, key).await);

        let addr = Address::repeat_byte(9);
        let first = StrategyRecord {
            address: addr,
            name: "Strat".to_string(),
            description: strategies::DEFAULT_DESCRIPTION.to_string(),
            credit_available: TokenAmount::zero(18),
            harvestable: false,
        };
        assert!(store.push_strategy(ticket, key, first).await);

        let enriched = StrategyRecord {
            address: addr,
            name: "Strat".to_string(),
            description: "Lends on a money market".to_string(),
            credit_available: TokenAmount::zero(18),
            harvestable: false,
        };
        assert!(store.push_strategy(ticket, key, enriched).await);

        let records = store.strategies(key).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, "Lends on a money market");
    }

}
