//! Virtual pool state (x·y=k bookkeeping, no tokens held)

use vperp_common::{AssetPair, Dec, EngineError};

/// Which side of a reserve a swap adds to.
///
/// The direction always refers to the reserve of the asset the caller is
/// handing to the pool: `AddToPool` grows that reserve, `RemoveFromPool`
/// shrinks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AddToPool,
    RemoveFromPool,
}

/// Per-pool risk configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpoolConfig {
    /// Max swap input as a fraction of the input-side reserve, in [0,1].
    pub trade_limit_ratio: Dec,
    /// Per-block cap on mark-price movement, in [0,1]. Zero disables.
    pub fluctuation_limit_ratio: Dec,
    /// Mark/index divergence beyond which the pool counts as off-oracle.
    pub max_oracle_spread_ratio: Dec,
    /// Maintenance margin ratio, in [0,1].
    pub maintenance_margin_ratio: Dec,
    /// Max position leverage, > 0.
    pub max_leverage: Dec,
}

impl VpoolConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let unit_bounded = [
            ("trade_limit_ratio", self.trade_limit_ratio),
            ("fluctuation_limit_ratio", self.fluctuation_limit_ratio),
            ("max_oracle_spread_ratio", self.max_oracle_spread_ratio),
            ("maintenance_margin_ratio", self.maintenance_margin_ratio),
        ];
        for (name, ratio) in unit_bounded {
            if ratio.is_negative() || ratio > Dec::ONE {
                return Err(EngineError::InvalidCreatePoolArgs(format!(
                    "{} must be in [0, 1], got {}",
                    name, ratio
                )));
            }
        }
        if !self.max_leverage.is_positive() {
            return Err(EngineError::InvalidCreatePoolArgs(format!(
                "max_leverage must be positive, got {}",
                self.max_leverage
            )));
        }
        // 1/maxLeverage >= maintenanceMarginRatio, otherwise a freshly opened
        // max-leverage position would be instantly liquidatable.
        let initial_margin = Dec::ONE.quo(self.max_leverage)?;
        if initial_margin < self.maintenance_margin_ratio {
            return Err(EngineError::InvalidCreatePoolArgs(format!(
                "1/max_leverage ({}) below maintenance margin ratio ({})",
                initial_margin, self.maintenance_margin_ratio
            )));
        }
        Ok(())
    }
}

/// Per-pair virtual reserves plus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpool {
    pub pair: AssetPair,
    pub base_reserve: Dec,
    pub quote_reserve: Dec,
    pub config: VpoolConfig,
}

impl Vpool {
    pub fn new(
        pair: AssetPair,
        quote_reserve: Dec,
        base_reserve: Dec,
        config: VpoolConfig,
    ) -> Result<Self, EngineError> {
        let pool = Self {
            pair,
            base_reserve,
            quote_reserve,
            config,
        };
        pool.validate()?;
        Ok(pool)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.quote_reserve.is_positive() || !self.base_reserve.is_positive() {
            return Err(EngineError::InvalidCreatePoolArgs(format!(
                "reserves must be positive, got quote={} base={}",
                self.quote_reserve, self.base_reserve
            )));
        }
        self.config.validate()
    }

    /// Mark price `quoteReserve / baseReserve`; 0 when degenerate.
    pub fn spot_price(&self) -> Dec {
        if self.base_reserve.is_zero() || self.quote_reserve.is_zero() {
            return Dec::ZERO;
        }
        // Reserves are validated positive; quo cannot fail here.
        self.quote_reserve.quo(self.base_reserve).unwrap_or(Dec::ZERO)
    }

    /// Constant-product invariant `k = quote · base`.
    pub fn invariant_k(&self) -> Result<Dec, EngineError> {
        Ok(self.quote_reserve.mul(self.base_reserve)?)
    }
}
