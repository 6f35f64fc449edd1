//! Vault Registry
//!
//! The catalog of vaults the engine serves: a static, versioned JSON file
//! keyed by slug, merged at scan time with community vaults discovered
//! through the on-chain factory (see `factory`). Descriptors are immutable
//! once constructed; curation happens out-of-band by editing the catalog.

mod factory;

pub use factory::{CommunityFactory, CreateVaultOutcome};

use alloy_primitives::Address;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Curation status of a vault. Amended out-of-band, never by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultStatus {
    New,
    Active,
    Endorsed,
    /// Deposits closed; only withdrawals remain.
    Withdraw,
    Disabled,
    /// Listed but hidden from aggregate views.
    Stealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultCategory {
    Experimental,
    Weird,
    Community,
}

/// Which ABI generation the vault speaks. Legacy vaults report share
/// price through `getPricePerFullShare` (1e18 fixed) and total holdings
/// through `balance`; v3 vaults use `pricePerShare`/`totalAssets` in the
/// underlying asset's decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiVariant {
    Legacy,
    V3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultDescriptor {
    /// Catalog key; when loading a file the entry's key wins.
    #[serde(default)]
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub logo: String,

    pub address: Address,
    pub chain_id: u64,

    /// Underlying asset the vault accepts.
    pub want: Address,
    pub want_symbol: String,
    pub want_decimals: u8,

    pub status: VaultStatus,
    pub category: VaultCategory,
    pub abi: AbiVariant,

    /// Zap contract accepting/returning the native coin, when deployed.
    #[serde(default)]
    pub zap: Option<Address>,

    /// Asset id understood by the external price-quote service. Empty or
    /// absent means USD fields stay unavailable.
    #[serde(default)]
    pub price_tag: Option<String>,
}

impl VaultDescriptor {
    /// Price tag, if one is set and non-empty.
    pub fn price_source(&self) -> Option<&str> {
        self.price_tag.as_deref().filter(|t| !t.is_empty())
    }
}

// ============================================
// STATIC CATALOG
// ============================================

/// The static half of the registry. File format: JSON object keyed by
/// slug, one `VaultDescriptor` per entry (the slug field may be omitted
/// inside the entry; the key wins).
pub struct Catalog {
    vaults: Vec<VaultDescriptor>,
}

impl Catalog {
    /// Load a catalog file. Duplicate slugs are a hard error since the
    /// registration tool keys entries by slug.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| eyre!("cannot read catalog {}: {}", path.as_ref().display(), e))?;
        let keyed: HashMap<String, VaultDescriptor> = serde_json::from_str(&content)?;

        let mut vaults = Vec::with_capacity(keyed.len());
        for (slug, mut desc) in keyed {
            desc.slug = slug;
            vaults.push(desc);
        }
        vaults.sort_by(|a, b| a.slug.cmp(&b.slug));

        debug!(count = vaults.len(), "catalog loaded");
        Ok(Self { vaults })
    }

    /// Built-in catalog so the binary works without a file on disk.
    pub fn builtin() -> Self {
        Self {
            vaults: builtin_vaults(),
        }
    }

    /// Prefer the file at `path` when it exists, otherwise the built-in
    /// table.
    pub fn load_or_builtin(path: Option<&str>) -> Self {
        match path {
            Some(p) if Path::new(p).exists() => match Self::load(p) {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!("catalog file rejected ({}), using built-in", e);
                    Self::builtin()
                }
            },
            _ => Self::builtin(),
        }
    }

    /// All catalog vaults on the given chain.
    pub fn list_vaults(&self, chain_id: u64) -> Vec<VaultDescriptor> {
        self.vaults
            .iter()
            .filter(|v| v.chain_id == chain_id)
            .cloned()
            .collect()
    }

    pub fn by_slug(&self, slug: &str) -> Option<&VaultDescriptor> {
        self.vaults.iter().find(|v| v.slug == slug)
    }

    pub fn contains_address(&self, chain_id: u64, address: Address) -> bool {
        self.vaults
            .iter()
            .any(|v| v.chain_id == chain_id && v.address == address)
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }
}

fn addr(s: &str) -> Address {
    Address::from_str(s).expect("builtin catalog address")
}

/// A few long-lived entries so a fresh checkout can scan something real.
fn builtin_vaults() -> Vec<VaultDescriptor> {
    vec![
        VaultDescriptor {
            slug: "steth-accumulator".to_string(),
            title: "stETH Accumulator".to_string(),
            logo: "🐸🔱".to_string(),
            address: addr("0xdCD90C7f6324cfa40d7169ef80b12031770B4325"),
            chain_id: 1,
            want: addr("0x06325440D014e39736583c165C2963BA99fAf14E"),
            want_symbol: "crvSTETH".to_string(),
            want_decimals: 18,
            status: VaultStatus::Endorsed,
            category: VaultCategory::Experimental,
            abi: AbiVariant::V3,
            zap: Some(addr("0xe182E4d1b7896AF2871BF739565A7a25ccd6fF0f")),
            price_tag: Some("staked-ether".to_string()),
        },
        VaultDescriptor {
            slug: "dai-yielder".to_string(),
            title: "DAI Yielder".to_string(),
            logo: "🐸💰".to_string(),
            address: addr("0xdA816459F1AB5631232FE5e97a05BBBb94970c95"),
            chain_id: 1,
            want: addr("0x6B175474E89094C44Da98b954EedcdeCB5BE3830"),
            want_symbol: "DAI".to_string(),
            want_decimals: 18,
            status: VaultStatus::Active,
            category: VaultCategory::Experimental,
            abi: AbiVariant::V3,
            zap: None,
            price_tag: Some("dai".to_string()),
        },
        VaultDescriptor {
            slug: "weth-maxi-legacy".to_string(),
            title: "WETH Maxi (legacy)".to_string(),
            logo: "🐸⚗️".to_string(),
            address: addr("0xe1237aA7f535b0CC33Fd973D66cBf830354D16c7"),
            chain_id: 1,
            want: addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            want_symbol: "WETH".to_string(),
            want_decimals: 18,
            status: VaultStatus::Withdraw,
            category: VaultCategory::Weird,
            abi: AbiVariant::Legacy,
            zap: None,
            price_tag: Some("weth".to_string()),
        },
        VaultDescriptor {
            slug: "ftm-frenzy".to_string(),
            title: "FTM Frenzy".to_string(),
            logo: "👻🌀".to_string(),
            address: addr("0x0DEC85e74A92c52b7F708c4B10207D9560CEFaf0"),
            chain_id: 250,
            want: addr("0x21be370D5312f44cB42ce377BC9b8a0cEF1A4C83"),
            want_symbol: "WFTM".to_string(),
            want_decimals: 18,
            status: VaultStatus::Active,
            category: VaultCategory::Experimental,
            abi: AbiVariant::V3,
            zap: None,
            price_tag: Some("fantom".to_string()),
        },
    ]
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_filters_by_chain() {
        let catalog = Catalog::builtin();
        let mainnet = catalog.list_vaults(1);
        assert!(!mainnet.is_empty());
        assert!(mainnet.iter().all(|v| v.chain_id == 1));

        let fantom = catalog.list_vaults(250);
        assert_eq!(fantom.len(), 1);
        assert_eq!(fantom[0].slug, "ftm-frenzy");
    }

    #[test]
    fn slug_lookup() {
        let catalog = Catalog::builtin();
        assert!(catalog.by_slug("dai-yielder").is_some());
        assert!(catalog.by_slug("nope").is_none());
    }

    #[test]
    fn catalog_file_round_trip() {
        let desc = Catalog::builtin().by_slug("dai-yielder").unwrap().clone();
        let json = serde_json::to_string(&HashMap::from([("dai-yielder", &desc)])).unwrap();
        let parsed: HashMap<String, VaultDescriptor> = serde_json::from_str(&json).unwrap();
        let back = &parsed["dai-yielder"];
        assert_eq!(back.address, desc.address);
        assert_eq!(back.status, VaultStatus::Active);
        assert_eq!(back.abi, AbiVariant::V3);
    }

    #[test]
    fn price_source_ignores_empty_tags() {
        let mut desc = Catalog::builtin().by_slug("dai-yielder").unwrap().clone();
        assert_eq!(desc.price_source(), Some("dai"));
        desc.price_tag = Some(String::new());
        assert_eq!(desc.price_source(), None);
        desc.price_tag = None;
        assert_eq!(desc.price_source(), None);
    }
}
