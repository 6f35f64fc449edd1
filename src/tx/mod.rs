//! Transaction Execution Engine
//!
//! Drives the mutating operations (approve, deposit, withdraw, zap in,
//! zap out, harvest, vault creation) through per-operation status
//! tracking. Preconditions run before anything touches the network; a
//! violation short-circuits into the error state without a dispatch, so
//! an unsafe transaction (zero amount, stale allowance, wrong spender)
//! can never leave this process. A confirmed write triggers a fresh
//! read cycle instead of patching values locally.

mod status;

pub use status::{StatusTracker, TxStatus, DEFAULT_COOLDOWN};

use alloy_network::EthereumWallet;
use alloy_primitives::{address, Address, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, SolCall};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chains::ChainInfo;
use crate::oracle::PriceOracle;
use crate::reader::Multicall;
use crate::registry::{CommunityFactory, CreateVaultOutcome, VaultCategory, VaultDescriptor};
use crate::vault::{refresh_vault, VaultStore};

sol! {
    interface IERC20Tx {
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IVaultTx {
        function deposit(uint256 amount) external returns (uint256);
        function withdraw(uint256 shares) external returns (uint256);
    }

    interface IZap {
        function zapIn() external payable;
        function zapOut(uint256 shares) external;
    }

    interface IStrategyTx {
        function harvest() external;
    }
}

/// On-chain placeholder some integrations use for the native coin; it is
/// never a valid ERC-20 target.
pub const NATIVE_SENTINEL: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Default bound on the receipt wait; expiry maps to the error state.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Approve,
    Deposit,
    Withdraw,
    ZapIn,
    ZapOut,
    Harvest,
    CreateVault,
}

/// Outcome of one operation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Mined and succeeded.
    Confirmed { tx_hash: B256 },

    /// Precondition violation or pending-reentry; nothing was dispatched.
    Rejected { reason: String },

    /// Registry de-dup hard stop: the factory already has a vault for
    /// this gauge.
    Conflict { existing: Address },

    /// Dispatched but reverted, dropped, or timed out.
    Failed { reason: String },
}

impl TxOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxOutcome::Confirmed { .. })
    }
}

/// Amount selector for deposit/withdraw style operations. `All`
/// substitutes the caller's full known balance.
#[derive(Debug, Clone, Copy)]
pub enum OpAmount {
    Exact(U256),
    All,
}

// ============================================
// PRECONDITIONS
// ============================================
// Pure checks, run before any network dispatch. They only trust state
// the engine read itself; an unknown balance or allowance fails closed.

pub fn check_approve(token: Address, spender: Address) -> Result<(), String> {
    if token.is_zero() || token == NATIVE_SENTINEL {
        return Err("approve needs a real token contract".to_string());
    }
    if spender.is_zero() || spender == NATIVE_SENTINEL {
        return Err("approve needs a real spender".to_string());
    }
    Ok(())
}

pub fn check_deposit(amount: U256, allowance: Option<U256>) -> Result<(), String> {
    if amount.is_zero() {
        return Err("deposit amount must be positive".to_string());
    }
    match allowance {
        Some(a) if a >= amount => Ok(()),
        Some(a) => Err(format!("allowance {} below deposit amount {}", a, amount)),
        None => Err("allowance unknown; refresh before depositing".to_string()),
    }
}

pub fn check_zap_in(amount: U256) -> Result<(), String> {
    if amount.is_zero() {
        return Err("zap-in amount must be positive".to_string());
    }
    Ok(())
}

pub fn check_withdraw(amount: U256, share_balance: Option<U256>) -> Result<(), String> {
    if amount.is_zero() {
        return Err("withdraw amount must be positive".to_string());
    }
    match share_balance {
        Some(b) if amount <= b => Ok(()),
        Some(b) => Err(format!("withdraw amount {} exceeds balance {}", amount, b)),
        None => Err("share balance unknown; refresh before withdrawing".to_string()),
    }
}

pub fn check_zap_out(
    amount: U256,
    share_balance: Option<U256>,
    zap_allowance: Option<U256>,
) -> Result<(), String> {
    check_withdraw(amount, share_balance)?;
    match zap_allowance {
        Some(a) if !a.is_zero() => Ok(()),
        _ => Err("zap contract has no share allowance".to_string()),
    }
}

// ============================================
// ENGINE
// ============================================

/// Everything an operation needs to re-read state after a confirmed
/// write.
pub struct CycleCtx<'a> {
    pub reader: &'a Multicall,
    pub store: &'a VaultStore,
    pub oracle: &'a PriceOracle,
    pub user: Address,
}

pub struct TxEngine {
    chain: &'static ChainInfo,
    signer: PrivateKeySigner,
    receipt_timeout: Duration,

    approve: StatusTracker,
    deposit: StatusTracker,
    withdraw: StatusTracker,
    zap_in: StatusTracker,
    zap_out: StatusTracker,
    harvest: StatusTracker,
    create: StatusTracker,
}

impl TxEngine {
    pub fn new(chain: &'static ChainInfo, signer: PrivateKeySigner) -> Self {
        Self::with_timing(chain, signer, DEFAULT_RECEIPT_TIMEOUT, status::DEFAULT_COOLDOWN)
    }

    pub fn with_timing(
        chain: &'static ChainInfo,
        signer: PrivateKeySigner,
        receipt_timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            chain,
            signer,
            receipt_timeout,
            approve: StatusTracker::new(cooldown),
            deposit: StatusTracker::new(cooldown),
            withdraw: StatusTracker::new(cooldown),
            zap_in: StatusTracker::new(cooldown),
            zap_out: StatusTracker::new(cooldown),
            harvest: StatusTracker::new(cooldown),
            create: StatusTracker::new(cooldown),
        }
    }

    fn tracker(&self, op: Operation) -> &StatusTracker {
        match op {
            Operation::Approve => &self.approve,
            Operation::Deposit => &self.deposit,
            Operation::Withdraw => &self.withdraw,
            Operation::ZapIn => &self.zap_in,
            Operation::ZapOut => &self.zap_out,
            Operation::Harvest => &self.harvest,
            Operation::CreateVault => &self.create,
        }
    }

    pub fn status(&self, op: Operation) -> TxStatus {
        self.tracker(op).current()
    }

    /// Grant `spender` an allowance on `token`.
    pub async fn approve(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> TxOutcome {
        let op = Operation::Approve;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }
        if let Err(reason) = check_approve(token, spender) {
            return self.reject(op, reason);
        }

        let calldata = IERC20Tx::approveCall { spender, amount }.abi_encode();
        self.run(ctx, desc, op, token, calldata, U256::ZERO).await
    }

    /// Deposit underlying into the vault. `All` uses the full known
    /// underlying balance.
    pub async fn deposit(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        amount: OpAmount,
    ) -> TxOutcome {
        let op = Operation::Deposit;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }

        let state = ctx.store.state((desc.chain_id, desc.address)).await;
        let amount = resolve_amount(amount, state.want_balance.as_ref().map(|a| a.raw));
        if let Err(reason) = check_deposit(amount, state.vault_allowance.as_ref().map(|a| a.raw)) {
            return self.reject(op, reason);
        }

        let calldata = IVaultTx::depositCall { amount }.abi_encode();
        self.run(ctx, desc, op, desc.address, calldata, U256::ZERO).await
    }

    /// Redeem vault shares for underlying. `All` uses the full known
    /// share balance.
    pub async fn withdraw(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        amount: OpAmount,
    ) -> TxOutcome {
        let op = Operation::Withdraw;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }

        let state = ctx.store.state((desc.chain_id, desc.address)).await;
        let shares = resolve_amount(amount, state.share_balance.as_ref().map(|a| a.raw));
        if let Err(reason) = check_withdraw(shares, state.share_balance.as_ref().map(|a| a.raw)) {
            return self.reject(op, reason);
        }

        let calldata = IVaultTx::withdrawCall { shares }.abi_encode();
        self.run(ctx, desc, op, desc.address, calldata, U256::ZERO).await
    }

    /// Deposit the native coin through the vault's zap contract.
    pub async fn zap_in(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        amount: U256,
    ) -> TxOutcome {
        let op = Operation::ZapIn;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }
        let Some(zap) = desc.zap else {
            return self.reject(op, format!("{} has no zap contract", desc.slug));
        };
        if let Err(reason) = check_zap_in(amount) {
            return self.reject(op, reason);
        }

        let calldata = IZap::zapInCall {}.abi_encode();
        self.run(ctx, desc, op, zap, calldata, amount).await
    }

    /// Exit through the zap contract back to the native coin.
    pub async fn zap_out(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        amount: OpAmount,
    ) -> TxOutcome {
        let op = Operation::ZapOut;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }
        let Some(zap) = desc.zap else {
            return self.reject(op, format!("{} has no zap contract", desc.slug));
        };

        let state = ctx.store.state((desc.chain_id, desc.address)).await;
        let shares = resolve_amount(amount, state.share_balance.as_ref().map(|a| a.raw));
        if let Err(reason) = check_zap_out(
            shares,
            state.share_balance.as_ref().map(|a| a.raw),
            state.zap_allowance.as_ref().map(|a| a.raw),
        ) {
            return self.reject(op, reason);
        }

        let calldata = IZap::zapOutCall { shares }.abi_encode();
        self.run(ctx, desc, op, zap, calldata, U256::ZERO).await
    }

    /// Trigger a harvest on a community vault's strategy. Read-only
    /// vaults (everything non-community) reject here.
    pub async fn harvest(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        strategy: Address,
    ) -> TxOutcome {
        let op = Operation::Harvest;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }
        if desc.category != VaultCategory::Community {
            return self.reject(op, format!("{} is not a community vault", desc.slug));
        }
        if strategy.is_zero() {
            return self.reject(op, "harvest needs a strategy address".to_string());
        }

        let calldata = IStrategyTx::harvestCall {}.abi_encode();
        self.run(ctx, desc, op, strategy, calldata, U256::ZERO).await
    }

    /// Deploy a new community vault for a gauge. The factory's
    /// vault-for-gauge accessor is the de-dup authority: a hit is a hard
    /// stop that surfaces the existing address and submits nothing.
    pub async fn create_vault(
        &self,
        ctx: &CycleCtx<'_>,
        factory: &CommunityFactory,
        gauge: Address,
    ) -> TxOutcome {
        let op = Operation::CreateVault;
        if self.tracker(op).current().is_pending() {
            return self.reject_resubmission(op);
        }
        if gauge.is_zero() {
            return self.reject(op, "creation needs a gauge address".to_string());
        }

        match factory.check_gauge(ctx.reader, gauge).await {
            Ok(CreateVaultOutcome::AlreadyExists { vault }) => {
                warn!(gauge = ?gauge, existing = ?vault, "vault already exists for gauge");
                self.tracker(op).fail_fast();
                return TxOutcome::Conflict { existing: vault };
            }
            Ok(CreateVaultOutcome::ClearToCreate) => {}
            Err(e) => {
                return self.reject(op, format!("existence check failed: {}", e));
            }
        }

        let calldata = factory.create_calldata(gauge);
        if !self.tracker(op).try_begin() {
            return self.reject_resubmission(op);
        }
        let outcome = self.submit(factory.address(), calldata, U256::ZERO).await;
        self.tracker(op).finish(outcome.is_confirmed());
        outcome
    }

    // ---- shared plumbing ----

    fn reject(&self, op: Operation, reason: String) -> TxOutcome {
        // validation error, distinct from an on-chain failure; the
        // tracker still decays through the error state
        self.tracker(op).fail_fast();
        warn!(?op, "rejected before dispatch: {}", reason);
        TxOutcome::Rejected { reason }
    }

    fn reject_resubmission(&self, op: Operation) -> TxOutcome {
        TxOutcome::Rejected {
            reason: format!("{:?} already pending", op),
        }
    }

    /// Dispatch, wait for the receipt, settle the tracker, and re-read
    /// vault state on success. Nothing is patched optimistically, so a
    /// failure leaves every derived field exactly as the last read cycle
    /// left it.
    async fn run(
        &self,
        ctx: &CycleCtx<'_>,
        desc: &VaultDescriptor,
        op: Operation,
        to: Address,
        calldata: Vec<u8>,
        value: U256,
    ) -> TxOutcome {
        if !self.tracker(op).try_begin() {
            return self.reject_resubmission(op);
        }

        let outcome = self.submit(to, calldata, value).await;
        self.tracker(op).finish(outcome.is_confirmed());

        match &outcome {
            TxOutcome::Confirmed { tx_hash } => {
                info!(?op, %tx_hash, "transaction confirmed");
                if let Err(e) = refresh_vault(ctx.reader, desc, ctx.user, ctx.store, ctx.oracle).await {
                    warn!("post-transaction refresh failed: {}", e);
                }
            }
            TxOutcome::Failed { reason } => {
                error!(?op, "transaction failed: {}", reason);
            }
            _ => {}
        }
        outcome
    }

    async fn submit(&self, to: Address, calldata: Vec<u8>, value: U256) -> TxOutcome {
        let rpc = match self.chain.rpc_url().parse() {
            Ok(url) => url,
            Err(e) => {
                return TxOutcome::Failed {
                    reason: format!("bad RPC endpoint: {}", e),
                }
            }
        };

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new().wallet(wallet).on_http(rpc);

        let tx = TransactionRequest::default()
            .from(self.signer.address())
            .to(to)
            .input(calldata.into())
            .value(value);

        let pending = match provider.send_transaction(tx).await {
            Ok(p) => p,
            Err(e) => {
                return TxOutcome::Failed {
                    reason: format!("submit failed: {}", e),
                }
            }
        };
        let tx_hash = *pending.tx_hash();
        info!(%tx_hash, "transaction submitted, waiting for receipt");

        match tokio::time::timeout(self.receipt_timeout, pending.get_receipt()).await {
            Err(_) => TxOutcome::Failed {
                reason: format!(
                    "no receipt for {} within {:?}; follow up out-of-band",
                    tx_hash, self.receipt_timeout
                ),
            },
            Ok(Err(e)) => TxOutcome::Failed {
                reason: format!("receipt wait failed: {}", e),
            },
            Ok(Ok(receipt)) if receipt.status() => TxOutcome::Confirmed { tx_hash },
            Ok(Ok(_)) => TxOutcome::Failed {
                reason: format!("transaction {} reverted", tx_hash),
            },
        }
    }
}

fn resolve_amount(amount: OpAmount, full_balance: Option<U256>) -> U256 {
    match amount {
        OpAmount::Exact(v) => v,
        OpAmount::All => full_balance.unwrap_or(U256::ZERO),
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::TokenAmount;
    use crate::chains::chain_info;
    use crate::registry::Catalog;
    use crate::vault::VaultState;
    use std::str::FromStr;

    fn test_signer() -> PrivateKeySigner {
        PrivateKeySigner::from_str(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap()
    }

    fn test_ctx<'a>(
        reader: &'a Multicall,
        store: &'a VaultStore,
        oracle: &'a PriceOracle,
    ) -> CycleCtx<'a> {
        CycleCtx {
            reader,
            store,
            oracle,
            user: Address::repeat_byte(7),
        }
    }

    #[test]
    fn approve_rejects_zero_and_native_sentinel() {
        let real = Address::repeat_byte(1);
        assert!(check_approve(real, real).is_ok());
        assert!(check_approve(Address::ZERO, real).is_err());
        assert!(check_approve(real, Address::ZERO).is_err());
        assert!(check_approve(NATIVE_SENTINEL, real).is_err());
        assert!(check_approve(real, NATIVE_SENTINEL).is_err());
    }

    #[test]
    fn deposit_requires_covering_allowance() {
        // allowance 0, amount 5: must reject
        assert!(check_deposit(U256::from(5), Some(U256::ZERO)).is_err());
        assert!(check_deposit(U256::from(5), Some(U256::from(4))).is_err());
        assert!(check_deposit(U256::from(5), Some(U256::from(5))).is_ok());
        assert!(check_deposit(U256::from(5), None).is_err());
        assert!(check_deposit(U256::ZERO, Some(U256::from(100))).is_err());
    }

    #[test]
    fn withdraw_bounded_by_balance() {
        assert!(check_withdraw(U256::from(5), Some(U256::from(10))).is_ok());
        assert!(check_withdraw(U256::from(11), Some(U256::from(10))).is_err());
        assert!(check_withdraw(U256::ZERO, Some(U256::from(10))).is_err());
        assert!(check_withdraw(U256::from(1), None).is_err());
    }

    #[test]
    fn zap_out_needs_allowance() {
        let bal = Some(U256::from(10));
        assert!(check_zap_out(U256::from(5), bal, Some(U256::from(1))).is_ok());
        assert!(check_zap_out(U256::from(5), bal, Some(U256::ZERO)).is_err());
        assert!(check_zap_out(U256::from(5), bal, None).is_err());
    }

    #[test]
    fn resolve_all_uses_full_balance() {
        assert_eq!(
            resolve_amount(OpAmount::All, Some(U256::from(42))),
            U256::from(42)
        );
        assert_eq!(resolve_amount(OpAmount::All, None), U256::ZERO);
        assert_eq!(
            resolve_amount(OpAmount::Exact(U256::from(7)), Some(U256::from(42))),
            U256::from(7)
        );
    }

    #[tokio::test]
    async fn rejected_deposit_never_dispatches_and_leaves_state_alone() {
        let chain = chain_info(1).unwrap();
        let reader = Multicall::for_chain(chain);
        let store = VaultStore::new();
        let oracle = PriceOracle::new(Some("http://127.0.0.1:1".to_string()));
        let desc = Catalog::builtin().by_slug("dai-yielder").unwrap().clone();

        // seed state: zero allowance, some balance
        let ticket = store.ticket().await;
        let mut state = VaultState::default();
        state.loaded = true;
        state.want_balance = Some(TokenAmount::from_raw(U256::from(1_000u64), 18));
        state.vault_allowance = Some(TokenAmount::zero(18));
        store
            .commit_state(ticket, (desc.chain_id, desc.address), state)
            .await;

        let engine = TxEngine::new(chain, test_signer());
        let ctx = test_ctx(&reader, &store, &oracle);
        let outcome = engine
            .deposit(&ctx, &desc, OpAmount::Exact(U256::from(5)))
            .await;

        // rejected before any dispatch, surfaced as a validation error
        assert!(matches!(outcome, TxOutcome::Rejected { .. }));
        assert!(engine.status(Operation::Deposit).is_error());

        // pre-dispatch state is byte-identical
        let after = store.state((desc.chain_id, desc.address)).await;
        assert_eq!(after.want_balance.unwrap().raw, U256::from(1_000u64));
        assert_eq!(after.vault_allowance.unwrap().raw, U256::ZERO);
    }

    #[tokio::test]
    async fn pending_operation_is_a_noop_on_resubmit() {
        let chain = chain_info(1).unwrap();
        let engine = TxEngine::new(chain, test_signer());

        assert!(engine.tracker(Operation::Deposit).try_begin());
        let outcome = engine.reject_resubmission(Operation::Deposit);
        assert!(matches!(outcome, TxOutcome::Rejected { .. }));
        assert!(!engine.tracker(Operation::Deposit).try_begin());
    }

    #[tokio::test]
    async fn zap_ops_require_a_zap_contract() {
        let chain = chain_info(1).unwrap();
        let reader = Multicall::for_chain(chain);
        let store = VaultStore::new();
        let oracle = PriceOracle::new(Some("http://127.0.0.1:1".to_string()));
        // dai-yielder carries no zap address
        let desc = Catalog::builtin().by_slug("dai-yielder").unwrap().clone();

        let engine = TxEngine::new(chain, test_signer());
        let ctx = test_ctx(&reader, &store, &oracle);

        let outcome = engine.zap_in(&ctx, &desc, U256::from(5)).await;
        assert!(matches!(outcome, TxOutcome::Rejected { .. }));

        let outcome = engine.zap_out(&ctx, &desc, OpAmount::Exact(U256::from(5))).await;
        assert!(matches!(outcome, TxOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn harvest_is_community_only() {
        let chain = chain_info(1).unwrap();
        let reader = Multicall::for_chain(chain);
        let store = VaultStore::new();
        let oracle = PriceOracle::new(Some("http://127.0.0.1:1".to_string()));
        let desc = Catalog::builtin().by_slug("dai-yielder").unwrap().clone();

        let engine = TxEngine::new(chain, test_signer());
        let ctx = test_ctx(&reader, &store, &oracle);
        let outcome = engine.harvest(&ctx, &desc, Address::repeat_byte(9)).await;
        assert!(matches!(outcome, TxOutcome::Rejected { .. }));
    }
}
