//! Liquidation
//!
//! The gate uses the best of spot/twap PnL, blended with the oracle mode
//! when the mark has drifted too far from the index. Below the maintenance
//! margin, positions with enough spot margin left are trimmed partially;
//! the rest are closed outright with the fee waterfall and bad-debt cover.

use crate::engine::{PnlCalcOption, PnlPreference, PositionResp};
use crate::state::{PerpKeeper, Position};
use vperp_common::{
    modules, AssetPair, Coin, Ctx, Dec, EngineError, Event,
    ports::{BankPort, OraclePort},
};
use vperp_vpool::{Direction, VpoolKeeper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidateResp {
    pub fee_to_liquidator: Coin,
    pub fee_to_ecosystem_fund: Coin,
    pub bad_debt: Dec,
    pub position_resp: PositionResp,
}

impl PerpKeeper {
    /// Liquidate one under-margined position.
    pub fn liquidate(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        bank: &mut dyn BankPort,
        liquidator: &str,
        pair: &AssetPair,
        trader: &str,
    ) -> Result<LiquidateResp, EngineError> {
        let position = self.position(pair, trader)?.clone();

        let mut margin_ratio = self.margin_ratio_preferred(
            vpool,
            oracle,
            ctx.block_time_ms,
            &position,
            PnlPreference::Max,
        )?;
        let index_price = oracle.price(pair, ctx.block_time_ms)?;
        if vpool.is_over_spread_limit(pair, index_price)? {
            let oracle_ratio = self.margin_ratio(
                vpool,
                oracle,
                ctx.block_time_ms,
                &position,
                PnlCalcOption::Oracle,
            )?;
            margin_ratio = margin_ratio.max(oracle_ratio);
        }
        let maintenance = vpool.pool(pair)?.config.maintenance_margin_ratio;
        if margin_ratio >= maintenance {
            return Err(EngineError::MarginHighEnough);
        }

        let spot_ratio = self.margin_ratio(
            vpool,
            oracle,
            ctx.block_time_ms,
            &position,
            PnlCalcOption::Spot,
        )?;
        let partial_ratio = self.params.partial_liquidation_ratio;
        if spot_ratio >= self.params.liquidation_fee_ratio
            && partial_ratio.is_positive()
            && partial_ratio < Dec::ONE
        {
            self.partial_liquidate(ctx, vpool, oracle, bank, liquidator, pair, trader, &position)
        } else {
            self.full_liquidate(ctx, vpool, bank, liquidator, pair, trader)
        }
    }

    /// Liquidate a batch independently: each entry runs against a snapshot of
    /// the whole engine state and commits only on success.
    #[allow(clippy::too_many_arguments)]
    pub fn multi_liquidate<B: BankPort + Clone>(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        bank: &mut B,
        liquidator: &str,
        entries: &[(AssetPair, String)],
    ) -> Vec<Result<LiquidateResp, EngineError>> {
        let mut results = Vec::with_capacity(entries.len());
        for (pair, trader) in entries {
            let mut perp = self.clone();
            let mut pools = vpool.clone();
            let mut funds = bank.clone();
            let mut scratch = ctx.clone();
            match perp.liquidate(
                &mut scratch,
                &mut pools,
                oracle,
                &mut funds,
                liquidator,
                pair,
                trader,
            ) {
                Ok(resp) => {
                    *self = perp;
                    *vpool = pools;
                    *bank = funds;
                    *ctx = scratch;
                    results.push(Ok(resp));
                }
                Err(err) => {
                    log::debug!("liquidation of {} on {} rejected: {}", trader, pair, err);
                    results.push(Err(err));
                }
            }
        }
        results
    }

    #[allow(clippy::too_many_arguments)]
    fn partial_liquidate(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        bank: &mut dyn BankPort,
        liquidator: &str,
        pair: &AssetPair,
        trader: &str,
        position: &Position,
    ) -> Result<LiquidateResp, EngineError> {
        let dir = if position.is_long() {
            Direction::AddToPool
        } else {
            Direction::RemoveFromPool
        };
        let partial_base = position
            .size
            .abs()?
            .mul(self.params.partial_liquidation_ratio)?;
        let partial_notional = vpool.quote_for_base(pair, dir, partial_base)?;
        let resp = self.decrease_position(
            ctx,
            vpool,
            oracle,
            pair,
            trader,
            partial_notional,
            Dec::ZERO,
            true,
        )?;

        let fee = resp
            .exchanged_notional
            .mul(self.params.liquidation_fee_ratio)?;
        let mut remaining = self.position(pair, trader)?.clone();
        remaining.margin = remaining.margin.checked_sub(fee)?;
        self.set_position(remaining.clone());

        let fee_total = fee.to_int_truncate();
        let fee_liq = fee.quo(Dec::from_int(2)?)?.to_int_truncate();
        let fee_fund = fee_total - fee_liq;
        let fee_to_liquidator = Coin::new(pair.quote(), fee_liq);
        let fee_to_fund = Coin::new(pair.quote(), fee_fund);
        bank.send_module_to_account(modules::VAULT, liquidator, &fee_to_liquidator)?;
        bank.send_module_to_module(modules::VAULT, modules::PERP_EF, &fee_to_fund)?;

        self.emit_liquidated(ctx, vpool, pair, trader, liquidator, &resp, &remaining, &fee_to_liquidator, &fee_to_fund, resp.bad_debt)?;
        Ok(LiquidateResp {
            fee_to_liquidator,
            fee_to_ecosystem_fund: fee_to_fund,
            bad_debt: resp.bad_debt,
            position_resp: resp,
        })
    }

    fn full_liquidate(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        bank: &mut dyn BankPort,
        liquidator: &str,
        pair: &AssetPair,
        trader: &str,
    ) -> Result<LiquidateResp, EngineError> {
        let resp = self.close_position_internal(ctx, vpool, pair, trader, Dec::ZERO, true)?;

        // The closed margin never left the vault; it funds the fees.
        let mut remaining = resp.margin_to_vault.neg()?;
        let mut bad_debt = resp.bad_debt;
        let fee_liq_dec = resp
            .exchanged_notional
            .mul(self.params.liquidation_fee_ratio)?
            .quo(Dec::from_int(2)?)?;
        if fee_liq_dec > remaining {
            bad_debt = bad_debt.checked_add(fee_liq_dec.checked_sub(remaining)?)?;
            remaining = Dec::ZERO;
        } else {
            remaining = remaining.checked_sub(fee_liq_dec)?;
        }

        if bad_debt.is_positive() {
            self.realize_bad_debt(bank, pair.quote(), bad_debt)?;
        }
        let fee_to_liquidator = Coin::new(pair.quote(), fee_liq_dec.to_int_truncate());
        let fee_to_fund = Coin::new(pair.quote(), remaining.to_int_truncate());
        bank.send_module_to_account(modules::VAULT, liquidator, &fee_to_liquidator)?;
        bank.send_module_to_module(modules::VAULT, modules::PERP_EF, &fee_to_fund)?;

        let gone = Position {
            pair: pair.clone(),
            trader: trader.to_string(),
            size: Dec::ZERO,
            margin: Dec::ZERO,
            open_notional: Dec::ZERO,
            last_cumulative_premium_fraction: Dec::ZERO,
            block_number: ctx.block_height,
        };
        self.emit_liquidated(ctx, vpool, pair, trader, liquidator, &resp, &gone, &fee_to_liquidator, &fee_to_fund, bad_debt)?;
        Ok(LiquidateResp {
            fee_to_liquidator,
            fee_to_ecosystem_fund: fee_to_fund,
            bad_debt,
            position_resp: resp,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_liquidated(
        &self,
        ctx: &mut Ctx,
        vpool: &VpoolKeeper,
        pair: &AssetPair,
        trader: &str,
        liquidator: &str,
        resp: &PositionResp,
        position: &Position,
        fee_to_liquidator: &Coin,
        fee_to_fund: &Coin,
        bad_debt: Dec,
    ) -> Result<(), EngineError> {
        let mark_price = vpool.spot_price(pair)?;
        ctx.emit(Event::PositionLiquidated {
            pair: pair.key(),
            trader: trader.to_string(),
            liquidator: liquidator.to_string(),
            exchanged_notional: resp.exchanged_notional,
            exchanged_size: resp.exchanged_size,
            fee_to_liquidator: fee_to_liquidator.clone(),
            fee_to_ecosystem_fund: fee_to_fund.clone(),
            bad_debt,
            margin: position.margin,
            mark_price,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(())
    }
}
