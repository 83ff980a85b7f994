//! Stablecoin parameters

use vperp_common::{Dec, EngineError};

/// Static configuration of the stablecoin module. The live collateral ratio
/// is state, not a parameter; it starts at `initial_coll_ratio` and moves by
/// `adjustment_step` inside the peg band logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableParams {
    pub stable_denom: String,
    pub coll_denom: String,
    pub gov_denom: String,
    /// Fee charged on mint and burn, as a fraction of each leg.
    pub fee_ratio: Dec,
    /// Share of the collateral fee routed to the insurance fund; the same
    /// share of the governance fee is burned. The rest goes to the treasury.
    pub ef_fee_fraction: Dec,
    /// Bonus paid in governance tokens on recollateralize deposits.
    pub recoll_bonus: Dec,
    /// Collateral-ratio move per adjustment.
    pub adjustment_step: Dec,
    /// Peg band half-width around 1.0 stable/collateral.
    pub price_band: Dec,
    pub adjustment_interval_ms: u64,
    pub twap_lookback_ms: u64,
    pub initial_coll_ratio: Dec,
}

impl StableParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, denom) in [
            ("stable_denom", &self.stable_denom),
            ("coll_denom", &self.coll_denom),
            ("gov_denom", &self.gov_denom),
        ] {
            if denom.is_empty() {
                return Err(EngineError::InvalidParams(format!("{} is empty", name)));
            }
        }
        if self.stable_denom == self.coll_denom
            || self.stable_denom == self.gov_denom
            || self.coll_denom == self.gov_denom
        {
            return Err(EngineError::InvalidParams(
                "stable, collateral and governance denoms must be distinct".into(),
            ));
        }
        for (name, ratio) in [
            ("fee_ratio", self.fee_ratio),
            ("ef_fee_fraction", self.ef_fee_fraction),
            ("adjustment_step", self.adjustment_step),
            ("price_band", self.price_band),
            ("initial_coll_ratio", self.initial_coll_ratio),
        ] {
            if ratio.is_negative() || ratio > Dec::ONE {
                return Err(EngineError::InvalidParams(format!(
                    "{} must be in [0, 1], got {}",
                    name, ratio
                )));
            }
        }
        if self.recoll_bonus.is_negative() {
            return Err(EngineError::InvalidParams(
                "recoll_bonus must be non-negative".into(),
            ));
        }
        if self.adjustment_interval_ms == 0 || self.twap_lookback_ms == 0 {
            return Err(EngineError::InvalidParams(
                "adjustment interval and twap lookback must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StableParams {
        StableParams {
            stable_denom: "unusd".into(),
            coll_denom: "uusdc".into(),
            gov_denom: "ugov".into(),
            fee_ratio: "0.002".parse().unwrap(),
            ef_fee_fraction: "0.5".parse().unwrap(),
            recoll_bonus: "0.002".parse().unwrap(),
            adjustment_step: "0.0025".parse().unwrap(),
            price_band: "0.001".parse().unwrap(),
            adjustment_interval_ms: 15 * 60 * 1_000,
            twap_lookback_ms: 15 * 60 * 1_000,
            initial_coll_ratio: "1".parse().unwrap(),
        }
    }

    #[test]
    fn test_validation() {
        assert!(params().validate().is_ok());

        let mut bad = params();
        bad.coll_denom = "unusd".into();
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.fee_ratio = "1.01".parse().unwrap();
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.adjustment_interval_ms = 0;
        assert!(bad.validate().is_err());
    }
}
