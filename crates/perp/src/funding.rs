//! Funding scheduler
//!
//! Runs from the end-of-block hook once per funding epoch. Each registered
//! pair accrues `(markTWAP − indexTWAP) / intervalsPerDay` onto its
//! cumulative premium fraction; positions settle the accrued difference the
//! next time they are touched. A failure on one pair never blocks the rest.

use crate::state::PerpKeeper;
use vperp_common::{AssetPair, Ctx, Dec, EngineError, Event, ports::OraclePort};
use vperp_vpool::VpoolKeeper;

impl PerpKeeper {
    /// End-of-block entry point. A no-op until a full epoch has elapsed
    /// since the last run.
    pub fn after_epoch(&mut self, ctx: &mut Ctx, vpool: &VpoolKeeper, oracle: &dyn OraclePort) {
        if ctx.block_time_ms < self.last_funding_ms + self.params.funding_epoch_ms {
            return;
        }
        let pairs: Vec<AssetPair> = self.pair_metadatas().map(|m| m.pair.clone()).collect();
        for pair in pairs {
            if let Err(err) = self.accrue_funding(ctx, vpool, oracle, &pair) {
                log::warn!("funding skipped for {}: {}", pair, err);
            }
        }
        self.last_funding_ms = ctx.block_time_ms;
    }

    fn accrue_funding(
        &mut self,
        ctx: &mut Ctx,
        vpool: &VpoolKeeper,
        oracle: &dyn OraclePort,
        pair: &AssetPair,
    ) -> Result<(), EngineError> {
        let lookback = self.params.twap_lookback_ms;
        let index_twap = oracle.twap(pair, ctx.block_time_ms, lookback)?;
        if !index_twap.is_positive() {
            return Err(EngineError::PricesExpired);
        }
        let mark_twap = vpool.mark_price_twap(pair, ctx.block_time_ms, lookback)?;
        if !mark_twap.is_positive() {
            return Err(EngineError::NoSnapshotsAvailable(pair.key()));
        }

        let intervals = Dec::from_int(self.params.intervals_per_day() as i128)?;
        let premium_fraction = mark_twap.checked_sub(index_twap)?.quo(intervals)?;
        let cumulative = self
            .latest_cumulative_premium_fraction(pair)?
            .checked_add(premium_fraction)?;
        self.set_cumulative_premium_fraction(pair, cumulative);

        log::debug!(
            "funding {}: mark_twap={} index_twap={} premium={} cumulative={}",
            pair,
            mark_twap,
            index_twap,
            premium_fraction,
            cumulative
        );
        ctx.emit(Event::FundingRateChanged {
            pair: pair.key(),
            mark_twap,
            index_twap,
            premium_fraction,
            cumulative_premium_fraction: cumulative,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(())
    }
}
