//! Multicall Batch Reader
//!
//! Aggregates independent contract reads into one RPC round trip per
//! refresh cycle via Multicall3 `aggregate3`. Every call is sent with
//! `allowFailure`, so a single reverting entry degrades to a failed
//! result instead of sinking the batch; consumers map failed entries to
//! `None` and keep the rest of the snapshot live.

use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall, SolValue};
use eyre::{eyre, Result};
use tracing::{debug, trace};

use crate::chains::ChainInfo;

sol! {
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }
}

/// Keep batches under the node's gas ceiling for a single eth_call.
const MAX_CALLS_PER_BATCH: usize = 100;

/// One read to aggregate: target contract + ABI-encoded calldata.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub target: Address,
    pub calldata: Bytes,
}

impl CallRequest {
    pub fn new<C: SolCall>(target: Address, call: C) -> Self {
        Self {
            target,
            calldata: call.abi_encode().into(),
        }
    }

    /// Placeholder entry that will fail in the batch. Used to keep a
    /// fixed stride when an optional call has no target this cycle.
    pub fn placeholder() -> Self {
        Self {
            target: Address::ZERO,
            calldata: Bytes::new(),
        }
    }
}

/// Per-call outcome, same order as the request list.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub success: bool,
    pub return_data: Bytes,
}

impl CallResult {
    fn payload(&self) -> Option<&[u8]> {
        if self.success && !self.return_data.is_empty() {
            Some(&self.return_data)
        } else {
            None
        }
    }

    /// Decode a single uint256 out of a successful entry; a failed or
    /// undecodable entry is `None`.
    pub fn decode_uint(&self) -> Option<U256> {
        self.payload().and_then(|d| U256::abi_decode(d).ok())
    }

    pub fn decode_address(&self) -> Option<Address> {
        self.payload().and_then(|d| Address::abi_decode(d).ok())
    }

    pub fn decode_string(&self) -> Option<String> {
        self.payload().and_then(|d| String::abi_decode(d).ok())
    }
}

/// Chain-aware batch reader. Read-only, so re-issuing a batch has no
/// side effects beyond the read itself.
pub struct Multicall {
    chain: &'static ChainInfo,
    rpc_url: String,
}

impl Multicall {
    pub fn for_chain(chain: &'static ChainInfo) -> Self {
        Self {
            rpc_url: chain.rpc_url(),
            chain,
        }
    }

    /// Execute a batch, preserving request order in the results.
    /// Oversized batches are split transparently.
    pub async fn batch(&self, calls: Vec<CallRequest>) -> Result<Vec<CallResult>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(MAX_CALLS_PER_BATCH) {
            out.extend(self.execute_chunk(chunk).await?);
        }
        Ok(out)
    }

    async fn execute_chunk(&self, chunk: &[CallRequest]) -> Result<Vec<CallResult>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);

        let calls: Vec<IMulticall3::Call3> = chunk
            .iter()
            .map(|c| IMulticall3::Call3 {
                target: c.target,
                allowFailure: true,
                callData: c.calldata.clone(),
            })
            .collect();

        let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();

        let tx = TransactionRequest::default()
            .to(self.chain.multicall)
            .input(calldata.into());

        trace!(
            chain = self.chain.id,
            calls = chunk.len(),
            "dispatching multicall batch"
        );

        let raw = provider
            .call(tx)
            .await
            .map_err(|e| eyre!("multicall on {} failed: {}", self.chain.name, e))?;

        let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
            .map_err(|e| eyre!("failed to decode multicall result: {}", e))?;

        if decoded.len() != chunk.len() {
            return Err(eyre!(
                "multicall returned {} results for {} calls",
                decoded.len(),
                chunk.len()
            ));
        }

        let failed = decoded.iter().filter(|r| !r.success).count();
        if failed > 0 {
            debug!(
                chain = self.chain.id,
                failed,
                total = chunk.len(),
                "batch had reverting entries"
            );
        }

        Ok(decoded
            .into_iter()
            .map(|r| CallResult {
                success: r.success,
                return_data: r.returnData,
            })
            .collect())
    }

    /// Native coin balance of `owner`. Not routable through multicall's
    /// aggregate path, so this is its own (still read-only) request.
    pub async fn native_balance(&self, owner: Address) -> Result<U256> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        Ok(provider.get_balance(owner).await?)
    }

    /// Single eth_call pinned to a historical block height. Used by the
    /// APY estimator for past price-per-share samples.
    pub async fn call_at_height(
        &self,
        target: Address,
        calldata: Bytes,
        height: u64,
    ) -> Result<Bytes> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let tx = TransactionRequest::default().to(target).input(calldata.into());
        Ok(provider
            .call(tx)
            .block(height.into())
            .await
            .map_err(|e| eyre!("historical call at block {} failed: {}", height, e))?)
    }

    pub fn chain(&self) -> &'static ChainInfo {
        self.chain
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_maps_failure_to_none() {
        let failed = CallResult {
            success: false,
            return_data: U256::from(5).abi_encode().into(),
        };
        assert_eq!(failed.decode_uint(), None);

        let empty = CallResult {
            success: true,
            return_data: Bytes::new(),
        };
        assert_eq!(empty.decode_uint(), None);
    }

    #[test]
    fn decode_uint_round_trip() {
        let ok = CallResult {
            success: true,
            return_data: U256::from(123_456u64).abi_encode().into(),
        };
        assert_eq!(ok.decode_uint(), Some(U256::from(123_456u64)));
    }

    #[test]
    fn placeholder_targets_zero() {
        let p = CallRequest::placeholder();
        assert_eq!(p.target, Address::ZERO);
        assert!(p.calldata.is_empty());
    }
}
