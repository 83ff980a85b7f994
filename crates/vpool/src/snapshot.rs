//! Reserve snapshots
//!
//! One snapshot per (pair, block); a swap later in the same block overwrites
//! the entry. The history is keyed `(pair, block_time_ms)` and iterated
//! ascending, which is what the TWAP and fluctuation-limit queries rely on.

use vperp_common::Dec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveSnapshot {
    pub pair: String,
    pub base_reserve: Dec,
    pub quote_reserve: Dec,
    pub block_height: u64,
    pub block_time_ms: u64,
}

impl ReserveSnapshot {
    /// Mark price at snapshot time; 0 when a reserve is degenerate.
    pub fn spot_price(&self) -> Dec {
        if self.base_reserve.is_zero() || self.quote_reserve.is_zero() {
            return Dec::ZERO;
        }
        self.quote_reserve.quo(self.base_reserve).unwrap_or(Dec::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_spot_price() {
        let snap = ReserveSnapshot {
            pair: "ubtc:unusd".into(),
            base_reserve: "1000".parse().unwrap(),
            quote_reserve: "1100".parse().unwrap(),
            block_height: 1,
            block_time_ms: 1_000,
        };
        assert_eq!(snap.spot_price(), "1.1".parse().unwrap());
    }

    #[test]
    fn test_degenerate_reserves_price_zero() {
        let snap = ReserveSnapshot {
            pair: "ubtc:unusd".into(),
            base_reserve: Dec::ZERO,
            quote_reserve: "1100".parse().unwrap(),
            block_height: 1,
            block_time_ms: 1_000,
        };
        assert_eq!(snap.spot_price(), Dec::ZERO);
    }
}
