//! Chain Registry
//!
//! Static table of the chains the engine knows how to talk to: RPC
//! endpoint, multicall deployment, native coin symbol, and the slug used
//! by the block-lookup service. Call sites resolve everything through
//! this table instead of branching on chain ids.

use alloy_primitives::{address, Address};
use std::env;

/// Multicall3 canonical deployment, shared by most EVM chains.
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

#[derive(Debug, Clone, Copy)]
pub struct ChainInfo {
    pub id: u64,
    pub name: &'static str,

    /// Public fallback endpoint. Overridable per chain via `RPC_URL_<id>`,
    /// or globally via `RPC_URL`.
    pub default_rpc: &'static str,

    /// Multicall deployment for this chain. Canonical unless the chain
    /// needed its own deployment.
    pub multicall: Address,

    pub native_symbol: &'static str,

    /// Chain slug understood by the block-height lookup service.
    pub block_slug: &'static str,

    /// Optional swap router used by zap allowances on this chain.
    pub router: Option<Address>,
}

static CHAINS: &[ChainInfo] = &[
    ChainInfo {
        id: 1,
        name: "Ethereum",
        default_rpc: "https://eth.llamarpc.com",
        multicall: MULTICALL3,
        native_symbol: "ETH",
        block_slug: "ethereum",
        router: Some(address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D")),
    },
    ChainInfo {
        id: 10,
        name: "Optimism",
        default_rpc: "https://mainnet.optimism.io",
        multicall: MULTICALL3,
        native_symbol: "ETH",
        block_slug: "optimism",
        router: None,
    },
    ChainInfo {
        id: 137,
        name: "Polygon",
        default_rpc: "https://polygon-rpc.com",
        multicall: MULTICALL3,
        native_symbol: "POL",
        block_slug: "polygon",
        router: None,
    },
    ChainInfo {
        id: 250,
        name: "Fantom",
        default_rpc: "https://rpc.ftm.tools",
        multicall: MULTICALL3,
        native_symbol: "FTM",
        block_slug: "fantom",
        router: Some(address!("F491e7B69E4244ad4002BC14e878a34207E38c29")),
    },
    ChainInfo {
        // zkSync Era has no canonical Multicall3; it ships its own.
        id: 324,
        name: "zkSync Era",
        default_rpc: "https://mainnet.era.zksync.io",
        multicall: address!("F9cda624FBC7e059355ce98a31693d299FACd963"),
        native_symbol: "ETH",
        block_slug: "era",
        router: None,
    },
    ChainInfo {
        id: 8453,
        name: "Base",
        default_rpc: "https://mainnet.base.org",
        multicall: MULTICALL3,
        native_symbol: "ETH",
        block_slug: "base",
        router: None,
    },
    ChainInfo {
        id: 42161,
        name: "Arbitrum",
        default_rpc: "https://arb1.arbitrum.io/rpc",
        multicall: MULTICALL3,
        native_symbol: "ETH",
        block_slug: "arbitrum",
        router: None,
    },
];

/// Look up a chain by id. `None` means the engine does not serve it.
pub fn chain_info(id: u64) -> Option<&'static ChainInfo> {
    CHAINS.iter().find(|c| c.id == id)
}

pub fn supported_chains() -> &'static [ChainInfo] {
    CHAINS
}

impl ChainInfo {
    /// Resolve the RPC endpoint: `RPC_URL_<id>` wins, then `RPC_URL`,
    /// then the built-in public endpoint.
    pub fn rpc_url(&self) -> String {
        env::var(format!("RPC_URL_{}", self.id))
            .or_else(|_| env::var("RPC_URL"))
            .unwrap_or_else(|_| self.default_rpc.to_string())
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chains_resolve() {
        assert_eq!(chain_info(1).unwrap().name, "Ethereum");
        assert_eq!(chain_info(250).unwrap().native_symbol, "FTM");
        assert!(chain_info(99999).is_none());
    }

    #[test]
    fn era_uses_override_deployment() {
        let era = chain_info(324).unwrap();
        assert_ne!(era.multicall, MULTICALL3);

        // everyone else is on the canonical deployment
        for chain in supported_chains().iter().filter(|c| c.id != 324) {
            assert_eq!(chain.multicall, MULTICALL3);
        }
    }
}
