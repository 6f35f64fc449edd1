//! Financial Metrics Calculator
//!
//! Derived display and decision values: deposit utilization, USD
//! valuation, per-chain TVL buckets, and historical APY horizons from
//! price-per-share samples. Everything here degrades to an explicit
//! "unavailable" (`None`) instead of NaN, because a missing quote must
//! stay distinguishable from a legitimate zero.

mod blocks;

pub use blocks::BlockLookup;

use alloy_sol_types::{sol, SolCall};
use eyre::Result;
use tracing::{debug, warn};

use crate::amount::TokenAmount;
use crate::reader::Multicall;
use crate::registry::{AbiVariant, VaultCategory, VaultDescriptor, VaultStatus};

sol! {
    interface IPriceView {
        function pricePerShare() external view returns (uint256);
        function getPricePerFullShare() external view returns (uint256);
    }
}

// ============================================
// UTILIZATION
// ============================================

/// Deposit utilization in `[0, 1]`.
///
/// A zero limit means the cap is fully consumed (or deposits are shut),
/// so it reports full. A vault whose status closed deposits reports full
/// regardless of the raw numbers. Missing reads lean open: an unknown
/// limit is treated as uncapped.
pub fn utilization(
    limit: Option<&TokenAmount>,
    available: Option<&TokenAmount>,
    status: VaultStatus,
) -> f64 {
    if status == VaultStatus::Withdraw {
        return 1.0;
    }
    let Some(limit) = limit else { return 0.0 };
    if limit.is_zero() {
        return 1.0;
    }
    if limit.is_unlimited() {
        return 0.0;
    }
    let Some(available) = available else { return 0.0 };

    let limit = limit.as_f64();
    let available = available.as_f64().min(limit);
    ((limit - available) / limit).clamp(0.0, 1.0)
}

// ============================================
// USD VALUATION
// ============================================

/// USD value of a share balance. `None` whenever any input is
/// unavailable; never 0 as a stand-in.
pub fn balance_value_usd(
    shares: Option<&TokenAmount>,
    price_per_share: Option<&TokenAmount>,
    asset_price_usd: Option<f64>,
) -> Option<f64> {
    Some(shares?.as_f64() * price_per_share?.as_f64() * asset_price_usd?)
}

/// USD value of everything the vault holds.
pub fn total_aum_usd(
    total_assets: Option<&TokenAmount>,
    asset_price_usd: Option<f64>,
) -> Option<f64> {
    Some(total_assets?.as_f64() * asset_price_usd?)
}

// ============================================
// TVL AGGREGATION
// ============================================

/// Which vaults stay out of the chain-level TVL sums. The stealth/weird
/// exclusion mirrors long-observed curation behavior but is policy, not
/// arithmetic; deployments can override it.
#[derive(Debug, Clone)]
pub struct TvlPolicy {
    pub exclude_statuses: Vec<VaultStatus>,
    pub exclude_categories: Vec<VaultCategory>,
}

impl Default for TvlPolicy {
    fn default() -> Self {
        Self {
            exclude_statuses: vec![VaultStatus::Stealth],
            exclude_categories: vec![VaultCategory::Weird],
        }
    }
}

impl TvlPolicy {
    pub fn excludes(&self, status: VaultStatus, category: VaultCategory) -> bool {
        self.exclude_statuses.contains(&status) || self.exclude_categories.contains(&category)
    }
}

/// One vault's contribution to the chain aggregate.
#[derive(Debug, Clone)]
pub struct TvlEntry {
    pub status: VaultStatus,
    pub category: VaultCategory,
    pub total_assets: Option<f64>,
    pub asset_price_usd: Option<f64>,
}

/// Per-chain TVL, bucketed by status into three mutually exclusive sums.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainTvl {
    pub endorsed: f64,
    /// Vaults in withdraw-only mode.
    pub deprecated: f64,
    /// Everything not endorsed and not deprecated.
    pub experimental: f64,
}

impl ChainTvl {
    pub fn total(&self) -> f64 {
        self.endorsed + self.deprecated + self.experimental
    }
}

pub fn aggregate_tvl(entries: &[TvlEntry], policy: &TvlPolicy) -> ChainTvl {
    let mut tvl = ChainTvl::default();
    let mut unpriced = 0usize;

    for entry in entries {
        if policy.excludes(entry.status, entry.category) {
            continue;
        }
        let value = match (entry.total_assets, entry.asset_price_usd) {
            (Some(assets), Some(price)) => assets * price,
            _ => {
                unpriced += 1;
                continue;
            }
        };
        match entry.status {
            VaultStatus::Endorsed => tvl.endorsed += value,
            VaultStatus::Withdraw => tvl.deprecated += value,
            _ => tvl.experimental += value,
        }
    }

    if unpriced > 0 {
        debug!(unpriced, "vaults without a quote left out of TVL");
    }
    tvl
}

// ============================================
// HISTORICAL APY
// ============================================

const WEEK_SECS: u64 = 7 * 86_400;
/// 30.5 days, the conventional month window for yield annualization.
const MONTH_SECS: u64 = 2_635_200;

/// Gross annualized return estimates over three horizons. `None` means
/// "not applicable": the vault is too young, the sample is missing, or
/// the ROI is exactly zero (indistinguishable from no data).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApyEstimate {
    /// Annualized, from the last ~week of share-price growth, percent.
    pub week_apr: Option<f64>,
    /// Annualized, from the last ~month, percent.
    pub month_apr: Option<f64>,
    /// Flat (not annualized) growth since the first share minted at 1.0,
    /// percent.
    pub inception: Option<f64>,
}

fn annualized(current: f64, past: f64, window_days: f64) -> Option<f64> {
    if past <= 0.0 {
        return None;
    }
    let roi = current / past - 1.0;
    if roi == 0.0 {
        return None;
    }
    Some(roi * 100.0 / window_days * 365.0)
}

/// Past price-per-share samples, behind a seam so the horizon logic is
/// testable without a chain.
#[allow(async_fn_in_trait)]
pub trait PpsHistory {
    /// Normalized price-per-share at (the block nearest to) `timestamp`.
    async fn pps_at(&self, timestamp: u64) -> Result<Option<f64>>;
}

/// Estimate the three horizons from the activation timestamp and the
/// current share price.
pub async fn estimate_apy<H: PpsHistory>(
    current_pps: f64,
    activation: u64,
    now: u64,
    history: &H,
) -> Result<ApyEstimate> {
    let inception = {
        let growth = (current_pps - 1.0) * 100.0;
        if growth == 0.0 { None } else { Some(growth) }
    };

    let age = now.saturating_sub(activation);
    if age < WEEK_SECS {
        // too young for any trailing window
        return Ok(ApyEstimate {
            week_apr: None,
            month_apr: None,
            inception,
        });
    }

    let week_apr = match history.pps_at(now - WEEK_SECS).await? {
        Some(past) => annualized(current_pps, past, 7.0),
        None => None,
    };

    let month_apr = if age < MONTH_SECS {
        None
    } else {
        match history.pps_at(now - MONTH_SECS).await? {
            Some(past) => annualized(current_pps, past, 30.5),
            None => None,
        }
    };

    Ok(ApyEstimate {
        week_apr,
        month_apr,
        inception,
    })
}

/// Chain-backed history: resolve the height for the timestamp, then read
/// the share price with a height-pinned call.
pub struct ChainHistory<'a> {
    reader: &'a Multicall,
    lookup: &'a BlockLookup,
    desc: &'a VaultDescriptor,
}

impl<'a> ChainHistory<'a> {
    pub fn new(reader: &'a Multicall, lookup: &'a BlockLookup, desc: &'a VaultDescriptor) -> Self {
        Self { reader, lookup, desc }
    }
}

impl PpsHistory for ChainHistory<'_> {
    async fn pps_at(&self, timestamp: u64) -> Result<Option<f64>> {
        let slug = self.reader.chain().block_slug;
        let height = match self.lookup.height_at(slug, timestamp).await {
            Ok(h) => h,
            Err(e) => {
                warn!(slug, "height lookup failed, horizon unavailable: {}", e);
                return Ok(None);
            }
        };

        let calldata = match self.desc.abi {
            AbiVariant::V3 => IPriceView::pricePerShareCall {}.abi_encode(),
            AbiVariant::Legacy => IPriceView::getPricePerFullShareCall {}.abi_encode(),
        };
        let decimals = crate::vault::pps_decimals(self.desc);

        match self
            .reader
            .call_at_height(self.desc.address, calldata.into(), height)
            .await
        {
            Ok(raw) => {
                let res = crate::reader::CallResult {
                    success: true,
                    return_data: raw,
                };
                Ok(res
                    .decode_uint()
                    .map(|v| TokenAmount::from_raw(v, decimals).as_f64()))
            }
            Err(e) => {
                warn!(height, "historical share price unavailable: {}", e);
                Ok(None)
            }
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use std::collections::HashMap;

    fn amt(raw: u64, decimals: u8) -> TokenAmount {
        TokenAmount::from_raw(U256::from(raw), decimals)
    }

    #[test]
    fn zero_limit_reads_full() {
        let limit = amt(0, 18);
        let avail = amt(0, 18);
        assert_eq!(
            utilization(Some(&limit), Some(&avail), VaultStatus::Active),
            1.0
        );
    }

    #[test]
    fn withdraw_status_is_always_full() {
        let limit = amt(1_000, 18);
        let avail = amt(1_000, 18);
        assert_eq!(
            utilization(Some(&limit), Some(&avail), VaultStatus::Withdraw),
            1.0
        );
        assert_eq!(utilization(None, None, VaultStatus::Withdraw), 1.0);
    }

    #[test]
    fn partial_fill_ratio() {
        let limit = amt(1_000, 0);
        let avail = amt(250, 0);
        let p = utilization(Some(&limit), Some(&avail), VaultStatus::Active);
        assert!((p - 0.75).abs() < 1e-9);
    }

    #[test]
    fn unknown_or_unlimited_limit_reads_open() {
        let avail = amt(10, 0);
        assert_eq!(utilization(None, Some(&avail), VaultStatus::Active), 0.0);
        let unlimited = TokenAmount::from_raw(U256::MAX, 18);
        assert_eq!(
            utilization(Some(&unlimited), Some(&avail), VaultStatus::Active),
            0.0
        );
    }

    #[test]
    fn usd_fields_degrade_to_none_not_zero() {
        let shares = amt(5, 0);
        let pps = amt(2, 0);
        assert_eq!(
            balance_value_usd(Some(&shares), Some(&pps), Some(3.0)),
            Some(30.0)
        );
        assert_eq!(balance_value_usd(Some(&shares), Some(&pps), None), None);
        assert_eq!(balance_value_usd(None, Some(&pps), Some(3.0)), None);
        assert_eq!(total_aum_usd(Some(&shares), None), None);
    }

    #[test]
    fn tvl_buckets_by_status() {
        let entries = vec![
            TvlEntry {
                status: VaultStatus::Endorsed,
                category: VaultCategory::Experimental,
                total_assets: Some(10.0),
                asset_price_usd: Some(2.0),
            },
            TvlEntry {
                status: VaultStatus::Active,
                category: VaultCategory::Experimental,
                total_assets: Some(20.0),
                asset_price_usd: Some(2.0),
            },
            TvlEntry {
                status: VaultStatus::Withdraw,
                category: VaultCategory::Experimental,
                total_assets: Some(30.0),
                asset_price_usd: Some(2.0),
            },
        ];
        let tvl = aggregate_tvl(&entries, &TvlPolicy::default());
        assert_eq!(tvl.endorsed, 20.0);
        assert_eq!(tvl.experimental, 40.0);
        assert_eq!(tvl.deprecated, 60.0);
        assert_eq!(tvl.total(), 120.0);
    }

    #[test]
    fn tvl_policy_excludes_and_is_configurable() {
        let entries = vec![
            TvlEntry {
                status: VaultStatus::Stealth,
                category: VaultCategory::Experimental,
                total_assets: Some(100.0),
                asset_price_usd: Some(1.0),
            },
            TvlEntry {
                status: VaultStatus::Active,
                category: VaultCategory::Weird,
                total_assets: Some(100.0),
                asset_price_usd: Some(1.0),
            },
        ];
        assert_eq!(aggregate_tvl(&entries, &TvlPolicy::default()).total(), 0.0);

        let include_everything = TvlPolicy {
            exclude_statuses: vec![],
            exclude_categories: vec![],
        };
        assert_eq!(aggregate_tvl(&entries, &include_everything).total(), 200.0);
    }

    #[test]
    fn unpriced_vaults_contribute_nothing() {
        let entries = vec![TvlEntry {
            status: VaultStatus::Endorsed,
            category: VaultCategory::Experimental,
            total_assets: Some(10.0),
            asset_price_usd: None,
        }];
        assert_eq!(aggregate_tvl(&entries, &TvlPolicy::default()).total(), 0.0);
    }

    // ---- APY ----

    struct FakeHistory {
        samples: HashMap<u64, f64>,
    }

    impl PpsHistory for FakeHistory {
        async fn pps_at(&self, timestamp: u64) -> Result<Option<f64>> {
            Ok(self.samples.get(&timestamp).copied())
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[tokio::test]
    async fn young_vault_has_no_trailing_windows() {
        let history = FakeHistory { samples: HashMap::new() };
        let est = estimate_apy(1.05, NOW - 3 * 86_400, NOW, &history)
            .await
            .unwrap();
        assert_eq!(est.week_apr, None);
        assert_eq!(est.month_apr, None);
        // inception still reports
        assert!((est.inception.unwrap() - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn week_old_vault_reports_week_only() {
        let mut samples = HashMap::new();
        samples.insert(NOW - WEEK_SECS, 1.0);
        let history = FakeHistory { samples };

        let est = estimate_apy(1.01, NOW - 10 * 86_400, NOW, &history)
            .await
            .unwrap();
        // 1% over a week, annualized: 1 * 100 / 7 * 365 ≈ 52.14
        let week = est.week_apr.unwrap();
        assert!((week - 52.142857).abs() < 1e-3, "got {}", week);
        assert_eq!(est.month_apr, None);
    }

    #[tokio::test]
    async fn seasoned_vault_reports_both_windows() {
        let mut samples = HashMap::new();
        samples.insert(NOW - WEEK_SECS, 1.0);
        samples.insert(NOW - MONTH_SECS, 0.98);
        let history = FakeHistory { samples };

        let est = estimate_apy(1.01, NOW - 40 * 86_400, NOW, &history)
            .await
            .unwrap();
        assert!((est.week_apr.unwrap() - 52.142857).abs() < 1e-3);

        let expected_month = (1.01 / 0.98 - 1.0) * 100.0 / 30.5 * 365.0;
        assert!((est.month_apr.unwrap() - expected_month).abs() < 1e-6);
    }

    #[tokio::test]
    async fn zero_roi_is_not_applicable() {
        let mut samples = HashMap::new();
        samples.insert(NOW - WEEK_SECS, 1.0);
        let history = FakeHistory { samples };

        let est = estimate_apy(1.0, NOW - 40 * 86_400, NOW, &history)
            .await
            .unwrap();
        assert_eq!(est.week_apr, None);
        assert_eq!(est.inception, None);
    }

    #[tokio::test]
    async fn missing_sample_degrades_to_none() {
        let history = FakeHistory { samples: HashMap::new() };
        let est = estimate_apy(1.07, NOW - 40 * 86_400, NOW, &history)
            .await
            .unwrap();
        assert_eq!(est.week_apr, None);
        assert_eq!(est.month_apr, None);
        assert!(est.inception.is_some());
    }
}
