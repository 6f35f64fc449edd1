//! Community Vault Factory Client
//!
//! Community vaults are deployed permissionlessly through an on-chain
//! factory keyed by an external gauge reference. Discovery walks the
//! factory's deployed list and batches the metadata reads; creation is
//! guarded by the factory's vault-for-gauge accessor so the same gauge
//! can never be deployed twice from here.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, Result};
use tracing::{debug, info, warn};

use super::{AbiVariant, Catalog, VaultCategory, VaultDescriptor, VaultStatus};
use crate::reader::{CallRequest, Multicall};

sol! {
    interface IVaultFactory {
        function numVaults() external view returns (uint256);
        function deployedVaults(uint256 index) external view returns (address);
        function vaultForGauge(address gauge) external view returns (address);
        function createVault(address gauge) external returns (address);
    }

    interface IVaultMeta {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function token() external view returns (address);
        function decimals() external view returns (uint256);
    }
}

/// Outcome of a creation attempt. `AlreadyExists` is the registry
/// conflict from the de-duplication guard, not a transaction failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateVaultOutcome {
    /// The factory already has a vault for this gauge; nothing was
    /// submitted.
    AlreadyExists { vault: Address },

    /// The creation transaction is safe to submit (the engine's tx layer
    /// performs the actual write).
    ClearToCreate,
}

/// Sanity bound on the deployed list; no factory is anywhere near this.
const MAX_FACTORY_VAULTS: usize = 1_000;

pub struct CommunityFactory {
    address: Address,
}

impl CommunityFactory {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// Discover factory-deployed vaults not already in the static
    /// catalog, wrapped in the fixed community descriptor shape.
    pub async fn discover(
        &self,
        reader: &Multicall,
        catalog: &Catalog,
    ) -> Result<Vec<VaultDescriptor>> {
        let chain = reader.chain();

        let count_res = reader
            .batch(vec![CallRequest::new(
                self.address,
                IVaultFactory::numVaultsCall {},
            )])
            .await?;
        let count = count_res[0]
            .decode_uint()
            .ok_or_else(|| eyre!("factory numVaults read failed"))?;
        let count = usize::try_from(count).unwrap_or(0).min(MAX_FACTORY_VAULTS);

        if count == 0 {
            return Ok(Vec::new());
        }
        debug!(count, chain = chain.id, "factory reports deployed vaults");

        // one batch for the address list
        let index_calls: Vec<CallRequest> = (0..count)
            .map(|i| {
                CallRequest::new(
                    self.address,
                    IVaultFactory::deployedVaultsCall {
                        index: U256::from(i),
                    },
                )
            })
            .collect();
        let addresses: Vec<Address> = reader
            .batch(index_calls)
            .await?
            .iter()
            .filter_map(|r| r.decode_address())
            .filter(|a| !a.is_zero())
            .collect();

        let fresh: Vec<Address> = addresses
            .into_iter()
            .filter(|a| !catalog.contains_address(chain.id, *a))
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        // one batch for name/symbol/underlying/decimals, fixed stride 4
        let mut meta_calls = Vec::with_capacity(fresh.len() * 4);
        for vault in &fresh {
            meta_calls.push(CallRequest::new(*vault, IVaultMeta::nameCall {}));
            meta_calls.push(CallRequest::new(*vault, IVaultMeta::symbolCall {}));
            meta_calls.push(CallRequest::new(*vault, IVaultMeta::tokenCall {}));
            meta_calls.push(CallRequest::new(*vault, IVaultMeta::decimalsCall {}));
        }
        let results = reader.batch(meta_calls).await?;

        let mut discovered = Vec::with_capacity(fresh.len());
        for (i, vault) in fresh.iter().enumerate() {
            let offset = i * 4;
            let name = results[offset].decode_string();
            let symbol = results[offset + 1].decode_string();
            let want = results[offset + 2].decode_address();
            let decimals = results[offset + 3]
                .decode_uint()
                .and_then(|d| u8::try_from(d).ok())
                .unwrap_or(18);

            let (Some(name), Some(symbol), Some(want)) = (name, symbol, want) else {
                warn!(vault = ?vault, "skipping community vault with unreadable metadata");
                continue;
            };

            discovered.push(VaultDescriptor {
                slug: format!("community-{:#x}", vault),
                title: name,
                logo: "🦍".to_string(),
                address: *vault,
                chain_id: chain.id,
                want,
                want_symbol: symbol,
                want_decimals: decimals,
                status: VaultStatus::Active,
                category: VaultCategory::Community,
                abi: AbiVariant::Legacy,
                zap: None,
                // resolved later through the oracle, if ever
                price_tag: None,
            });
        }

        info!(
            found = discovered.len(),
            chain = chain.id,
            "community vaults discovered"
        );
        Ok(discovered)
    }

    /// De-duplication guard for vault creation. A non-zero vault for the
    /// gauge is a hard stop; the existing address is surfaced so the
    /// caller can route the user there instead.
    pub async fn check_gauge(
        &self,
        reader: &Multicall,
        gauge: Address,
    ) -> Result<CreateVaultOutcome> {
        let results = reader
            .batch(vec![CallRequest::new(
                self.address,
                IVaultFactory::vaultForGaugeCall { gauge },
            )])
            .await?;

        let existing = results[0]
            .decode_address()
            .ok_or_else(|| eyre!("factory vaultForGauge read failed"))?;

        if !existing.is_zero() {
            return Ok(CreateVaultOutcome::AlreadyExists { vault: existing });
        }
        Ok(CreateVaultOutcome::ClearToCreate)
    }

    /// Calldata for the creation write. Callers must run `check_gauge`
    /// first; the tx layer enforces this by only accepting a
    /// `ClearToCreate` outcome.
    pub fn create_calldata(&self, gauge: Address) -> Vec<u8> {
        IVaultFactory::createVaultCall { gauge }.abi_encode()
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

// ============================================
// TESTS
// ============================================
