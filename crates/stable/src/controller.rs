//! Collateral-ratio controller
//!
//! The target collateral ratio trails the peg: when the stable trades above
//! the band the protocol can afford less backing, below the band it needs
//! more. Adjustments run from the end-of-block hook, at most once per
//! configured interval. Mint and burn refuse to run while the ratio is
//! flagged invalid (no usable oracle TWAP).

use crate::params::StableParams;
use vperp_common::{AssetPair, Ctx, Dec, EngineError, ports::OraclePort};

/// Owns the stablecoin parameters and controller state. Cloneable so callers
/// can snapshot for rollback.
#[derive(Debug, Clone)]
pub struct StableKeeper {
    pub params: StableParams,
    coll_ratio: Dec,
    is_coll_ratio_valid: bool,
    last_adjustment_ms: u64,
}

impl StableKeeper {
    pub fn new(params: StableParams) -> Result<Self, EngineError> {
        params.validate()?;
        let coll_ratio = params.initial_coll_ratio;
        Ok(Self {
            params,
            coll_ratio,
            is_coll_ratio_valid: false,
            last_adjustment_ms: 0,
        })
    }

    pub fn coll_ratio(&self) -> Dec {
        self.coll_ratio
    }

    pub fn is_coll_ratio_valid(&self) -> bool {
        self.is_coll_ratio_valid
    }

    /// The pair whose TWAP measures the peg: stable priced in collateral.
    pub fn peg_pair(&self) -> Result<AssetPair, EngineError> {
        AssetPair::new(&self.params.stable_denom, &self.params.coll_denom)
    }

    /// End-of-block hook. Moves the target ratio one step against the peg
    /// deviation; a missing TWAP invalidates the ratio until the next
    /// successful run.
    pub fn refresh_collateral_ratio(
        &mut self,
        ctx: &Ctx,
        oracle: &dyn OraclePort,
    ) -> Result<(), EngineError> {
        if ctx.block_time_ms < self.last_adjustment_ms + self.params.adjustment_interval_ms {
            return Ok(());
        }
        let pair = self.peg_pair()?;
        let twap = match oracle.twap(&pair, ctx.block_time_ms, self.params.twap_lookback_ms) {
            Ok(price) if price.is_positive() => price,
            Ok(_) | Err(EngineError::PricesExpired) => {
                log::warn!("no usable peg twap for {}; collateral ratio invalidated", pair);
                self.is_coll_ratio_valid = false;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let upper = Dec::ONE.checked_add(self.params.price_band)?;
        let lower = Dec::ONE.checked_sub(self.params.price_band)?;
        if twap > upper {
            self.coll_ratio = self
                .coll_ratio
                .checked_sub(self.params.adjustment_step)?
                .max(Dec::ZERO);
        } else if twap < lower {
            self.coll_ratio = self
                .coll_ratio
                .checked_add(self.params.adjustment_step)?
                .min(Dec::ONE);
        }
        self.is_coll_ratio_valid = true;
        self.last_adjustment_ms = ctx.block_time_ms;
        log::debug!(
            "peg twap {} for {}: collateral ratio now {}",
            twap,
            pair,
            self.coll_ratio
        );
        Ok(())
    }

    pub(crate) fn require_valid_coll_ratio(&self) -> Result<Dec, EngineError> {
        if !self.is_coll_ratio_valid {
            return Err(EngineError::NoValidCollateralRatio);
        }
        Ok(self.coll_ratio)
    }

    /// Test/genesis shortcut: force the ratio and mark it valid.
    pub fn set_coll_ratio(&mut self, ratio: Dec) -> Result<(), EngineError> {
        if ratio.is_negative() || ratio > Dec::ONE {
            return Err(EngineError::InvalidParams(format!(
                "collateral ratio must be in [0, 1], got {}",
                ratio
            )));
        }
        self.coll_ratio = ratio;
        self.is_coll_ratio_valid = true;
        Ok(())
    }
}
