//! Position engine: pricing modes, margin ratio and the open/close dispatch
//!
//! Entry points take the vpool, oracle and bank as explicit collaborators.
//! Internal operations (increase/decrease/close/reverse) mutate perp and
//! vpool state and report the net collateral flow in
//! [`PositionResp::margin_to_vault`]; the public wrappers move the money and
//! realize any bad debt. An error anywhere aborts the operation, and the
//! surrounding transaction is expected to discard partial mutations.

use crate::state::{PerpKeeper, Position};
use vperp_common::{
    modules, AssetPair, Coin, Ctx, Dec, EngineError, Event,
    ports::{BankPort, OraclePort},
};
use vperp_vpool::{Direction, VpoolKeeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Pricing mode for position notional and unrealized PnL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlCalcOption {
    Spot,
    Twap,
    Oracle,
}

/// Which of spot/twap PnL to pick when a check allows either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlPreference {
    Max,
    Min,
}

/// Outcome of a position operation. `margin_to_vault` is the net collateral
/// flow: positive means the trader pays into the vault, negative means the
/// vault pays out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionResp {
    /// Post-operation position; `None` when the position was removed.
    pub position: Option<Position>,
    /// Absolute quote exchanged against the vpool.
    pub exchanged_notional: Dec,
    /// Signed base delta applied to the position.
    pub exchanged_size: Dec,
    pub realized_pnl: Dec,
    pub unrealized_pnl_after: Dec,
    pub funding_payment: Dec,
    pub bad_debt: Dec,
    pub margin_to_vault: Dec,
}

impl PerpKeeper {
    /// Notional and unrealized PnL of a position under a pricing mode.
    /// The swap direction is the one that would close the position: a long
    /// hands base to the pool, a short takes base out.
    pub fn position_notional_and_pnl(
        &self,
        vpool: &VpoolKeeper,
        oracle: &dyn OraclePort,
        now_ms: u64,
        position: &Position,
        calc: PnlCalcOption,
    ) -> Result<(Dec, Dec), EngineError> {
        if position.size.is_zero() {
            return Err(EngineError::PositionZero);
        }
        let abs_size = position.size.abs()?;
        let dir = if position.is_long() {
            Direction::AddToPool
        } else {
            Direction::RemoveFromPool
        };
        let notional = match calc {
            PnlCalcOption::Spot => vpool.quote_for_base(&position.pair, dir, abs_size)?,
            PnlCalcOption::Twap => vpool.base_asset_twap(
                &position.pair,
                dir,
                abs_size,
                now_ms,
                self.params.twap_lookback_ms,
            )?,
            PnlCalcOption::Oracle => oracle.price(&position.pair, now_ms)?.mul(abs_size)?,
        };
        let pnl = if position.is_long() {
            notional.checked_sub(position.open_notional)?
        } else {
            position.open_notional.checked_sub(notional)?
        };
        Ok((notional, pnl))
    }

    /// Spot/twap pair with the preferred PnL, together with the notional the
    /// preferred PnL was computed from.
    pub fn preferred_notional_and_pnl(
        &self,
        vpool: &VpoolKeeper,
        oracle: &dyn OraclePort,
        now_ms: u64,
        position: &Position,
        preference: PnlPreference,
    ) -> Result<(Dec, Dec), EngineError> {
        let spot =
            self.position_notional_and_pnl(vpool, oracle, now_ms, position, PnlCalcOption::Spot)?;
        let twap =
            self.position_notional_and_pnl(vpool, oracle, now_ms, position, PnlCalcOption::Twap)?;
        Ok(match preference {
            PnlPreference::Max if spot.1 >= twap.1 => spot,
            PnlPreference::Max => twap,
            PnlPreference::Min if spot.1 <= twap.1 => spot,
            PnlPreference::Min => twap,
        })
    }

    /// `(margin − badDebt + unrealizedPnL) / positionNotional` after settling
    /// funding, under a single pricing mode.
    pub fn margin_ratio(
        &self,
        vpool: &VpoolKeeper,
        oracle: &dyn OraclePort,
        now_ms: u64,
        position: &Position,
        calc: PnlCalcOption,
    ) -> Result<Dec, EngineError> {
        let (notional, pnl) =
            self.position_notional_and_pnl(vpool, oracle, now_ms, position, calc)?;
        self.margin_ratio_at(position, notional, pnl)
    }

    /// Margin ratio using the preferred spot/twap PnL.
    pub fn margin_ratio_preferred(
        &self,
        vpool: &VpoolKeeper,
        oracle: &dyn OraclePort,
        now_ms: u64,
        position: &Position,
        preference: PnlPreference,
    ) -> Result<Dec, EngineError> {
        let (notional, pnl) =
            self.preferred_notional_and_pnl(vpool, oracle, now_ms, position, preference)?;
        self.margin_ratio_at(position, notional, pnl)
    }

    fn margin_ratio_at(
        &self,
        position: &Position,
        notional: Dec,
        pnl: Dec,
    ) -> Result<Dec, EngineError> {
        let rm = self.remain_margin_with_funding(position, pnl)?;
        Ok(rm.margin.checked_sub(rm.bad_debt)?.quo(notional)?)
    }

    // ---- open / close ----

    /// Open, grow, shrink or flip a position depending on the relation of
    /// `quoteAmount · leverage` to the current spot notional.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        bank: &mut dyn BankPort,
        pair: &AssetPair,
        side: Side,
        trader: &str,
        quote_amount: Dec,
        leverage: Dec,
        base_limit: Dec,
    ) -> Result<PositionResp, EngineError> {
        if !quote_amount.is_positive() || !leverage.is_positive() {
            return Err(EngineError::InvalidParams(
                "quote amount and leverage must be positive".into(),
            ));
        }
        if base_limit.is_negative() {
            return Err(EngineError::InvalidParams(
                "base amount limit must be non-negative".into(),
            ));
        }
        let pool = vpool.pool(pair)?;
        if leverage > pool.config.max_leverage {
            return Err(EngineError::LeverageTooHigh {
                requested: leverage.to_string(),
                max: pool.config.max_leverage.to_string(),
            });
        }
        self.init_pair(pair);

        let open_notional = quote_amount.mul(leverage)?;
        let same_direction = match self.maybe_position(pair, trader) {
            None => true,
            Some(pos) => pos.is_long() == matches!(side, Side::Buy),
        };

        let resp = if same_direction {
            self.increase_position(
                ctx,
                vpool,
                oracle,
                pair,
                side,
                trader,
                quote_amount,
                open_notional,
                leverage,
                base_limit,
            )?
        } else {
            let prior = self.position(pair, trader)?.clone();
            let (old_notional, _) = self.position_notional_and_pnl(
                vpool,
                oracle,
                ctx.block_time_ms,
                &prior,
                PnlCalcOption::Spot,
            )?;
            if open_notional < old_notional {
                self.decrease_position(
                    ctx,
                    vpool,
                    oracle,
                    pair,
                    trader,
                    open_notional,
                    base_limit,
                    false,
                )?
            } else if open_notional == old_notional {
                self.close_position_internal(ctx, vpool, pair, trader, base_limit, false)?
            } else {
                self.reverse_position(
                    ctx,
                    vpool,
                    oracle,
                    pair,
                    side,
                    trader,
                    open_notional,
                    leverage,
                    base_limit,
                )?
            }
        };
        self.settle_position_funds(bank, pair, trader, &resp)?;
        Ok(resp)
    }

    /// Close the whole position at spot and pay out the remaining margin.
    pub fn close_position(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        bank: &mut dyn BankPort,
        pair: &AssetPair,
        trader: &str,
    ) -> Result<PositionResp, EngineError> {
        let resp = self.close_position_internal(ctx, vpool, pair, trader, Dec::ZERO, false)?;
        self.settle_position_funds(bank, pair, trader, &resp)?;
        Ok(resp)
    }

    /// Forced settlement at the current mark, without touching reserves.
    /// Used when a market is wound down; no fees apply.
    pub fn settle_position(
        &mut self,
        ctx: &mut Ctx,
        vpool: &VpoolKeeper,
        bank: &mut dyn BankPort,
        pair: &AssetPair,
        trader: &str,
    ) -> Result<Vec<Coin>, EngineError> {
        let position = self.position(pair, trader)?.clone();
        if position.size.is_zero() {
            return Ok(Vec::new());
        }
        let spot = vpool.spot_price(pair)?;
        let notional = spot.mul(position.size.abs()?)?;
        let pnl = if position.is_long() {
            notional.checked_sub(position.open_notional)?
        } else {
            position.open_notional.checked_sub(notional)?
        };
        let rm = self.remain_margin_with_funding(&position, pnl)?;
        self.remove_position(pair, trader);

        let mut settled = Vec::new();
        let payout = rm.margin.to_int_truncate();
        if payout > 0 {
            self.withdraw_from_vault(bank, pair.quote(), trader, payout)?;
            settled.push(Coin::new(pair.quote(), payout));
        }
        if rm.bad_debt.is_positive() {
            self.realize_bad_debt(bank, pair.quote(), rm.bad_debt)?;
        }
        ctx.emit(Event::PositionSettled {
            pair: pair.key(),
            trader: trader.to_string(),
            settled: settled.clone(),
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(settled)
    }

    // ---- internal operations ----

    #[allow(clippy::too_many_arguments)]
    fn increase_position(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        pair: &AssetPair,
        side: Side,
        trader: &str,
        margin_in: Dec,
        open_notional_delta: Dec,
        leverage: Dec,
        base_limit: Dec,
    ) -> Result<PositionResp, EngineError> {
        let dir = match side {
            Side::Buy => Direction::AddToPool,
            Side::Sell => Direction::RemoveFromPool,
        };
        let base_out =
            vpool.swap_quote_for_base(ctx, pair, dir, open_notional_delta, base_limit, false, trader)?;
        let exchanged_size = match side {
            Side::Buy => base_out,
            Side::Sell => base_out.neg()?,
        };

        let prior = self
            .maybe_position(pair, trader)
            .cloned()
            .unwrap_or_else(|| Position {
                pair: pair.clone(),
                trader: trader.to_string(),
                size: Dec::ZERO,
                margin: Dec::ZERO,
                open_notional: Dec::ZERO,
                last_cumulative_premium_fraction: Dec::ZERO,
                block_number: ctx.block_height,
            });
        let rm = self.remain_margin_with_funding(&prior, margin_in)?;
        let position = Position {
            pair: pair.clone(),
            trader: trader.to_string(),
            size: prior.size.checked_add(exchanged_size)?,
            margin: rm.margin,
            open_notional: prior.open_notional.checked_add(open_notional_delta)?,
            last_cumulative_premium_fraction: self.latest_cumulative_premium_fraction(pair)?,
            block_number: ctx.block_height,
        };

        // Initial margin requirement, best of spot/twap PnL. quo truncates
        // toward zero, so allow one ulp of slack for an exactly-at-limit open.
        let ratio = self.margin_ratio_preferred(
            vpool,
            oracle,
            ctx.block_time_ms,
            &position,
            PnlPreference::Max,
        )?;
        let required = Dec::ONE.quo(leverage)?;
        if ratio.checked_add(Dec::from_raw(1))? < required {
            return Err(EngineError::MarginRatioTooLow {
                ratio: ratio.to_string(),
                required: required.to_string(),
            });
        }

        let (_, unrealized_after) = self.position_notional_and_pnl(
            vpool,
            oracle,
            ctx.block_time_ms,
            &position,
            PnlCalcOption::Spot,
        )?;
        self.set_position(position.clone());
        self.emit_position_changed(
            ctx,
            vpool,
            &position,
            open_notional_delta,
            exchanged_size,
            Dec::ZERO,
            unrealized_after,
            rm.funding_payment,
            rm.bad_debt,
        )?;
        Ok(PositionResp {
            position: Some(position),
            exchanged_notional: open_notional_delta,
            exchanged_size,
            realized_pnl: Dec::ZERO,
            unrealized_pnl_after: unrealized_after,
            funding_payment: rm.funding_payment,
            bad_debt: rm.bad_debt,
            margin_to_vault: margin_in,
        })
    }

    /// Shrink a position by `close_notional` quote, realizing PnL
    /// proportionally. Margin stays in the vault.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn decrease_position(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        pair: &AssetPair,
        trader: &str,
        close_notional: Dec,
        base_limit: Dec,
        skip_fluctuation_check: bool,
    ) -> Result<PositionResp, EngineError> {
        let prior = self.position(pair, trader)?.clone();
        let (current_notional, unrealized) = self.position_notional_and_pnl(
            vpool,
            oracle,
            ctx.block_time_ms,
            &prior,
            PnlCalcOption::Spot,
        )?;
        let realized = unrealized.mul(close_notional)?.quo(current_notional)?;

        let dir = if prior.is_long() {
            Direction::RemoveFromPool
        } else {
            Direction::AddToPool
        };
        let base_amount = vpool.swap_quote_for_base(
            ctx,
            pair,
            dir,
            close_notional,
            base_limit,
            skip_fluctuation_check,
            trader,
        )?;
        let exchanged_size = if prior.is_long() {
            base_amount.neg()?
        } else {
            base_amount
        };

        let rm = self.remain_margin_with_funding(&prior, realized)?;
        let new_size = prior.size.checked_add(exchanged_size)?;
        let open_notional = prior
            .open_notional
            .mul(new_size.abs()?)?
            .quo(prior.size.abs()?)?;
        let unrealized_after = unrealized.checked_sub(realized)?;

        let position = Position {
            pair: pair.clone(),
            trader: trader.to_string(),
            size: new_size,
            margin: rm.margin,
            open_notional,
            last_cumulative_premium_fraction: self.latest_cumulative_premium_fraction(pair)?,
            block_number: ctx.block_height,
        };
        let stored = if new_size.is_zero() {
            self.remove_position(pair, trader);
            None
        } else {
            self.set_position(position.clone());
            Some(position.clone())
        };
        self.emit_position_changed(
            ctx,
            vpool,
            &position,
            close_notional,
            exchanged_size,
            realized,
            unrealized_after,
            rm.funding_payment,
            rm.bad_debt,
        )?;
        Ok(PositionResp {
            position: stored,
            exchanged_notional: close_notional,
            exchanged_size,
            realized_pnl: realized,
            unrealized_pnl_after: unrealized_after,
            funding_payment: rm.funding_payment,
            bad_debt: rm.bad_debt,
            margin_to_vault: Dec::ZERO,
        })
    }

    /// Close the whole position against the vpool. The remaining margin is
    /// reported as a vault payout; bad debt is reported, not yet realized.
    pub(crate) fn close_position_internal(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        pair: &AssetPair,
        trader: &str,
        quote_limit: Dec,
        skip_fluctuation_check: bool,
    ) -> Result<PositionResp, EngineError> {
        let prior = self.position(pair, trader)?.clone();
        let abs_size = prior.size.abs()?;
        let dir = if prior.is_long() {
            Direction::AddToPool
        } else {
            Direction::RemoveFromPool
        };
        let exchanged_notional = vpool.swap_base_for_quote(
            ctx,
            pair,
            dir,
            abs_size,
            quote_limit,
            skip_fluctuation_check,
            trader,
        )?;
        let realized = if prior.is_long() {
            exchanged_notional.checked_sub(prior.open_notional)?
        } else {
            prior.open_notional.checked_sub(exchanged_notional)?
        };
        let rm = self.remain_margin_with_funding(&prior, realized)?;
        self.remove_position(pair, trader);

        let exchanged_size = prior.size.neg()?;
        let closed = Position {
            pair: pair.clone(),
            trader: trader.to_string(),
            size: Dec::ZERO,
            margin: Dec::ZERO,
            open_notional: Dec::ZERO,
            last_cumulative_premium_fraction: prior.last_cumulative_premium_fraction,
            block_number: ctx.block_height,
        };
        self.emit_position_changed(
            ctx,
            vpool,
            &closed,
            exchanged_notional,
            exchanged_size,
            realized,
            Dec::ZERO,
            rm.funding_payment,
            rm.bad_debt,
        )?;
        Ok(PositionResp {
            position: None,
            exchanged_notional,
            exchanged_size,
            realized_pnl: realized,
            unrealized_pnl_after: Dec::ZERO,
            funding_payment: rm.funding_payment,
            bad_debt: rm.bad_debt,
            margin_to_vault: rm.margin.neg()?,
        })
    }

    /// Close fully, then open the remainder in the new direction.
    #[allow(clippy::too_many_arguments)]
    fn reverse_position(
        &mut self,
        ctx: &mut Ctx,
        vpool: &mut VpoolKeeper,
        oracle: &dyn OraclePort,
        pair: &AssetPair,
        side: Side,
        trader: &str,
        target_notional: Dec,
        leverage: Dec,
        base_limit: Dec,
    ) -> Result<PositionResp, EngineError> {
        let closed_size = self.position(pair, trader)?.size.abs()?;
        let close = self.close_position_internal(ctx, vpool, pair, trader, Dec::ZERO, false)?;

        let remaining_notional = target_notional.checked_sub(close.exchanged_notional)?;
        if !remaining_notional.is_positive() {
            // Rounding ate the remainder; the reversal degenerates to a close.
            return Ok(close);
        }
        let margin_in = remaining_notional.quo(leverage)?;
        let remaining_limit = base_limit.checked_sub(closed_size)?.max(Dec::ZERO);
        let open = self.increase_position(
            ctx,
            vpool,
            oracle,
            pair,
            side,
            trader,
            margin_in,
            remaining_notional,
            leverage,
            remaining_limit,
        )?;
        Ok(PositionResp {
            position: open.position,
            exchanged_notional: close.exchanged_notional.checked_add(open.exchanged_notional)?,
            exchanged_size: close.exchanged_size.checked_add(open.exchanged_size)?,
            realized_pnl: close.realized_pnl,
            unrealized_pnl_after: open.unrealized_pnl_after,
            funding_payment: close.funding_payment,
            bad_debt: close.bad_debt.checked_add(open.bad_debt)?,
            margin_to_vault: close.margin_to_vault.checked_add(open.margin_to_vault)?,
        })
    }

    // ---- money movement ----

    /// Apply the collateral flow of a response: deposits round up against the
    /// trader, payouts round down, bad debt is covered from the insurance
    /// fund.
    pub(crate) fn settle_position_funds(
        &mut self,
        bank: &mut dyn BankPort,
        pair: &AssetPair,
        trader: &str,
        resp: &PositionResp,
    ) -> Result<(), EngineError> {
        let denom = pair.quote();
        if resp.margin_to_vault.is_positive() {
            let amount = resp.margin_to_vault.to_int_ceil();
            bank.send_account_to_module(trader, modules::VAULT, &Coin::new(denom, amount))?;
        } else if resp.margin_to_vault.is_negative() {
            let amount = resp.margin_to_vault.neg()?.to_int_truncate();
            self.withdraw_from_vault(bank, denom, trader, amount)?;
        }
        if resp.bad_debt.is_positive() {
            self.realize_bad_debt(bank, denom, resp.bad_debt)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_position_changed(
        &self,
        ctx: &mut Ctx,
        vpool: &VpoolKeeper,
        position: &Position,
        exchanged_notional: Dec,
        exchanged_size: Dec,
        realized_pnl: Dec,
        unrealized_pnl_after: Dec,
        funding_payment: Dec,
        bad_debt: Dec,
    ) -> Result<(), EngineError> {
        let mark_price = vpool.spot_price(&position.pair)?;
        ctx.emit(Event::PositionChanged {
            pair: position.pair.key(),
            trader: position.trader.clone(),
            margin: position.margin,
            open_notional: position.open_notional,
            size: position.size,
            exchanged_notional,
            exchanged_size,
            realized_pnl,
            unrealized_pnl_after,
            funding_payment,
            bad_debt,
            mark_price,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(())
    }
}
