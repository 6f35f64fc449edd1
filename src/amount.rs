//! Fixed-Point Amount Normalization
//!
//! On-chain balances arrive as raw integers scaled by the asset's decimal
//! count. Everything financial in this crate carries a `TokenAmount`, which
//! keeps the raw integer and an exact human-decimal rendering side by side.
//! The decimal string is produced with integer arithmetic only, so a value
//! can round-trip back into calldata without drift.

use alloy_primitives::U256;
use eyre::{eyre, Result};

/// On-chain convention: a max-uint amount means "unlimited" (approvals,
/// uncapped deposit limits), not a literal balance.
pub const UNLIMITED: U256 = U256::MAX;

/// A raw on-chain integer paired with its exact decimal rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAmount {
    /// Raw scaled integer as read from (or written to) the chain.
    pub raw: U256,

    /// Exact decimal rendering of `raw / 10^decimals`.
    pub normalized: String,

    /// Decimal count of the asset this amount is denominated in.
    pub decimals: u8,
}

fn pow10(decimals: u8) -> U256 {
    U256::from(10)
        .checked_pow(U256::from(decimals))
        .unwrap_or(U256::MAX)
}

impl TokenAmount {
    /// Normalize a raw on-chain integer. `decimals == 0` is integer
    /// passthrough.
    pub fn from_raw(raw: U256, decimals: u8) -> Self {
        let normalized = if raw == UNLIMITED {
            "∞".to_string()
        } else if decimals == 0 {
            raw.to_string()
        } else {
            let scale = pow10(decimals);
            let whole = raw / scale;
            let frac = raw % scale;
            if frac.is_zero() {
                whole.to_string()
            } else {
                let digits = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
                format!("{}.{}", whole, digits.trim_end_matches('0'))
            }
        };

        Self { raw, normalized, decimals }
    }

    /// Zero in the given denomination.
    pub fn zero(decimals: u8) -> Self {
        Self::from_raw(U256::ZERO, decimals)
    }

    /// Parse a human decimal string back into a raw integer amount.
    ///
    /// Rejects signs, empty input, non-digit characters, and fractional
    /// digits beyond what `decimals` can represent.
    pub fn from_decimal_str(s: &str, decimals: u8) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(eyre!("empty amount"));
        }
        if s == "∞" {
            return Ok(Self::from_raw(UNLIMITED, decimals));
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        let whole = if whole.is_empty() { "0" } else { whole };

        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(eyre!("invalid amount: {}", s));
        }
        if frac.len() > decimals as usize {
            return Err(eyre!(
                "amount {} has more than {} fractional digits",
                s,
                decimals
            ));
        }

        let mut raw: U256 = whole
            .parse()
            .map_err(|e| eyre!("invalid amount {}: {}", s, e))?;
        raw = raw
            .checked_mul(pow10(decimals))
            .ok_or_else(|| eyre!("amount {} overflows", s))?;

        if !frac.is_empty() {
            let padded = format!("{:0<width$}", frac, width = decimals as usize);
            let frac_raw: U256 = padded
                .parse()
                .map_err(|e| eyre!("invalid amount {}: {}", s, e))?;
            raw = raw
                .checked_add(frac_raw)
                .ok_or_else(|| eyre!("amount {} overflows", s))?;
        }

        Ok(Self::from_raw(raw, decimals))
    }

    /// True when this amount is the on-chain "unlimited" sentinel.
    pub fn is_unlimited(&self) -> bool {
        self.raw == UNLIMITED
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    /// Lossy float view, for USD multiplication and display math only.
    /// Never feed the result back into calldata.
    pub fn as_f64(&self) -> f64 {
        if self.is_unlimited() {
            f64::INFINITY
        } else {
            self.normalized.parse().unwrap_or(0.0)
        }
    }
}

impl std::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.normalized)
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_with_fractional_part() {
        let a = TokenAmount::from_raw(U256::from(1_234_500_000_000_000_000u128), 18);
        assert_eq!(a.normalized, "1.2345");
    }

    #[test]
    fn normalizes_sub_unit_values() {
        let a = TokenAmount::from_raw(U256::from(42u64), 6);
        assert_eq!(a.normalized, "0.000042");
    }

    #[test]
    fn zero_decimals_is_passthrough() {
        let a = TokenAmount::from_raw(U256::from(777u64), 0);
        assert_eq!(a.normalized, "777");
        assert_eq!(a.as_f64(), 777.0);
    }

    #[test]
    fn round_trips_exactly() {
        let cases: [(u128, u8); 5] = [
            (0, 18),
            (1, 18),
            (1_234_500_000_000_000_000, 18),
            (42, 6),
            (123_456_789, 8),
        ];
        for (raw, decimals) in cases {
            let raw = U256::from(raw);
            let a = TokenAmount::from_raw(raw, decimals);
            let back = TokenAmount::from_decimal_str(&a.normalized, decimals).unwrap();
            assert_eq!(back.raw, raw, "round trip failed for {} @ {}", raw, decimals);
        }
    }

    #[test]
    fn unlimited_renders_as_infinity() {
        let a = TokenAmount::from_raw(UNLIMITED, 18);
        assert!(a.is_unlimited());
        assert_eq!(a.to_string(), "∞");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(TokenAmount::from_decimal_str("", 18).is_err());
        assert!(TokenAmount::from_decimal_str("-5", 18).is_err());
        assert!(TokenAmount::from_decimal_str("1.2.3", 18).is_err());
        assert!(TokenAmount::from_decimal_str("abc", 18).is_err());
        // more fractional digits than the asset can represent
        assert!(TokenAmount::from_decimal_str("0.1234567", 6).is_err());
    }

    #[test]
    fn accepts_leading_dot() {
        let a = TokenAmount::from_decimal_str(".5", 6).unwrap();
        assert_eq!(a.raw, U256::from(500_000u64));
    }
}
