//! Margin add/remove and the vault money helpers
//!
//! The vault holds every trader's collateral; the insurance fund backstops
//! it. Whenever the vault cannot pay what a position is owed, the shortfall
//! is pulled from the insurance fund and booked as prepaid bad debt, which
//! future realized bad debt consumes before touching the fund again.

use crate::engine::{PnlPreference, PositionResp};
use crate::state::PerpKeeper;
use vperp_common::{
    modules, Amount, AssetPair, Coin, Ctx, Dec, EngineError, Event,
    ports::{BankPort, OraclePort},
};
use vperp_vpool::VpoolKeeper;

impl PerpKeeper {
    /// Deposit extra collateral into an open position. Funding is settled
    /// first; a position already carrying bad debt cannot be topped up.
    pub fn add_margin(
        &mut self,
        ctx: &mut Ctx,
        vpool: &VpoolKeeper,
        bank: &mut dyn BankPort,
        pair: &AssetPair,
        trader: &str,
        margin: Coin,
    ) -> Result<PositionResp, EngineError> {
        if margin.denom != pair.quote() {
            return Err(EngineError::InvalidParams(format!(
                "margin denom {} does not match pair quote {}",
                margin.denom,
                pair.quote()
            )));
        }
        if margin.amount <= 0 {
            return Err(EngineError::InvalidParams(
                "margin amount must be positive".into(),
            ));
        }
        let mut position = self.position(pair, trader)?.clone();
        let delta = Dec::from_int(margin.amount)?;
        let rm = self.remain_margin_with_funding(&position, delta)?;
        if rm.bad_debt.is_positive() {
            return Err(EngineError::BadDebtWouldOccur);
        }

        bank.send_account_to_module(trader, modules::VAULT, &margin)?;
        position.margin = rm.margin;
        position.last_cumulative_premium_fraction =
            self.latest_cumulative_premium_fraction(pair)?;
        position.block_number = ctx.block_height;
        self.set_position(position.clone());

        let mark_price = vpool.spot_price(pair)?;
        ctx.emit(Event::PositionChanged {
            pair: pair.key(),
            trader: trader.to_string(),
            margin: position.margin,
            open_notional: position.open_notional,
            size: position.size,
            exchanged_notional: Dec::ZERO,
            exchanged_size: Dec::ZERO,
            realized_pnl: Dec::ZERO,
            unrealized_pnl_after: Dec::ZERO,
            funding_payment: rm.funding_payment,
            bad_debt: Dec::ZERO,
            mark_price,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(PositionResp {
            position: Some(position),
            exchanged_notional: Dec::ZERO,
            exchanged_size: Dec::ZERO,
            realized_pnl: Dec::ZERO,
            unrealized_pnl_after: Dec::ZERO,
            funding_payment: rm.funding_payment,
            bad_debt: Dec::ZERO,
            margin_to_vault: delta,
        })
    }

    /// Withdraw collateral from an open position. After settling funding the
    /// position must keep non-negative free collateral:
    /// `min(margin, margin + minPnL) − notional · maintenanceMarginRatio`.
    #[allow(clippy::too_many_arguments)]
    pub fn remove_margin(
        &mut self,
        ctx: &mut Ctx,
        vpool: &VpoolKeeper,
        oracle: &dyn OraclePort,
        bank: &mut dyn BankPort,
        pair: &AssetPair,
        trader: &str,
        margin: Coin,
    ) -> Result<PositionResp, EngineError> {
        if margin.denom != pair.quote() {
            return Err(EngineError::InvalidParams(format!(
                "margin denom {} does not match pair quote {}",
                margin.denom,
                pair.quote()
            )));
        }
        if margin.amount <= 0 {
            return Err(EngineError::InvalidParams(
                "margin amount must be positive".into(),
            ));
        }
        let mut position = self.position(pair, trader)?.clone();
        let delta = Dec::from_int(margin.amount)?.neg()?;
        let rm = self.remain_margin_with_funding(&position, delta)?;
        if rm.bad_debt.is_positive() {
            return Err(EngineError::RemoveMarginCausesBadDebt);
        }

        position.margin = rm.margin;
        position.last_cumulative_premium_fraction =
            self.latest_cumulative_premium_fraction(pair)?;
        position.block_number = ctx.block_height;

        let (notional, min_pnl) = self.preferred_notional_and_pnl(
            vpool,
            oracle,
            ctx.block_time_ms,
            &position,
            PnlPreference::Min,
        )?;
        let maintenance = vpool.pool(pair)?.config.maintenance_margin_ratio;
        let free = position
            .margin
            .min(position.margin.checked_add(min_pnl)?)
            .checked_sub(notional.mul(maintenance)?)?;
        if free.is_negative() {
            return Err(EngineError::FreeCollateralNegative);
        }

        self.withdraw_from_vault(bank, pair.quote(), trader, margin.amount)?;
        self.set_position(position.clone());

        let mark_price = vpool.spot_price(pair)?;
        ctx.emit(Event::PositionChanged {
            pair: pair.key(),
            trader: trader.to_string(),
            margin: position.margin,
            open_notional: position.open_notional,
            size: position.size,
            exchanged_notional: Dec::ZERO,
            exchanged_size: Dec::ZERO,
            realized_pnl: Dec::ZERO,
            unrealized_pnl_after: min_pnl,
            funding_payment: rm.funding_payment,
            bad_debt: Dec::ZERO,
            mark_price,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(PositionResp {
            position: Some(position),
            exchanged_notional: Dec::ZERO,
            exchanged_size: Dec::ZERO,
            realized_pnl: Dec::ZERO,
            unrealized_pnl_after: min_pnl,
            funding_payment: rm.funding_payment,
            bad_debt: Dec::ZERO,
            margin_to_vault: delta,
        })
    }

    /// Voluntary top-up of the insurance fund.
    pub fn donate_to_ecosystem_fund(
        &mut self,
        bank: &mut dyn BankPort,
        sender: &str,
        donation: Coin,
    ) -> Result<(), EngineError> {
        if donation.amount < 0 {
            return Err(EngineError::InvalidParams(format!(
                "negative donation of {}",
                donation
            )));
        }
        if donation.is_zero() {
            return Ok(());
        }
        bank.send_account_to_module(sender, modules::PERP_EF, &donation)
    }

    /// Pay `amount` out of the vault. A shortfall is covered by the insurance
    /// fund and booked as prepaid bad debt.
    pub(crate) fn withdraw_from_vault(
        &mut self,
        bank: &mut dyn BankPort,
        denom: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), EngineError> {
        if amount <= 0 {
            return Ok(());
        }
        let coin = Coin::new(denom, amount);
        match bank.send_module_to_account(modules::VAULT, to, &coin) {
            Ok(()) => Ok(()),
            Err(EngineError::NotEnoughBalance { available, .. }) => {
                let shortfall = amount - available;
                log::warn!(
                    "vault short {} {} paying {}; covering from insurance fund",
                    shortfall,
                    denom,
                    to
                );
                bank.send_module_to_module(
                    modules::PERP_EF,
                    modules::VAULT,
                    &Coin::new(denom, shortfall),
                )?;
                self.add_prepaid_bad_debt(denom, shortfall);
                bank.send_module_to_account(modules::VAULT, to, &coin)
            }
            Err(err) => Err(err),
        }
    }

    /// Cover realized bad debt: consume prepaid credit first, then pull the
    /// residue from the insurance fund into the vault. If the fund itself is
    /// short, the uncovered part is booked as prepaid bad debt.
    pub(crate) fn realize_bad_debt(
        &mut self,
        bank: &mut dyn BankPort,
        denom: &str,
        bad_debt: Dec,
    ) -> Result<(), EngineError> {
        let amount = bad_debt.to_int_ceil();
        if amount <= 0 {
            return Ok(());
        }
        let consumed = self.consume_prepaid_bad_debt(denom, amount);
        let residue = amount - consumed;
        if residue == 0 {
            return Ok(());
        }
        match bank.send_module_to_module(
            modules::PERP_EF,
            modules::VAULT,
            &Coin::new(denom, residue),
        ) {
            Ok(()) => Ok(()),
            Err(EngineError::NotEnoughBalance { available, .. }) => {
                if available > 0 {
                    bank.send_module_to_module(
                        modules::PERP_EF,
                        modules::VAULT,
                        &Coin::new(denom, available),
                    )?;
                }
                let uncovered = residue - available;
                log::warn!(
                    "insurance fund short {} {} covering bad debt; booking prepaid",
                    uncovered,
                    denom
                );
                self.add_prepaid_bad_debt(denom, uncovered);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Side;
    use crate::state::PerpParams;
    use vperp_common::mem::{module_balance, MemBank, MemOracle};
    use vperp_vpool::VpoolConfig;

    fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    fn pair() -> AssetPair {
        AssetPair::new("ubtc", "unusd").unwrap()
    }

    fn setup() -> (PerpKeeper, VpoolKeeper, MemOracle, MemBank, Ctx) {
        let mut vpool = VpoolKeeper::new();
        let mut ctx = Ctx::new(1, 1_000);
        vpool
            .create_pool(
                &mut ctx,
                pair(),
                dec("1000000"),
                dec("1000000"),
                VpoolConfig {
                    trade_limit_ratio: Dec::ONE,
                    fluctuation_limit_ratio: Dec::ONE,
                    max_oracle_spread_ratio: dec("0.1"),
                    maintenance_margin_ratio: dec("0.0625"),
                    max_leverage: dec("15"),
                },
            )
            .unwrap();
        let mut perp = PerpKeeper::new(PerpParams {
            liquidation_fee_ratio: dec("0.1"),
            partial_liquidation_ratio: dec("0.25"),
            funding_epoch_ms: 60 * 60 * 1_000,
            twap_lookback_ms: 15 * 60 * 1_000,
        })
        .unwrap();
        perp.init_pair(&pair());

        let mut oracle = MemOracle::new();
        oracle.set_price(&pair(), Dec::ONE, 1_000);
        let mut bank = MemBank::new();
        bank.fund("trader", &Coin::new("unusd", 1_000_000));
        bank.fund("module/perp_ef", &Coin::new("unusd", 1_000_000));

        let mut ctx = Ctx::new(2, 2_000);
        perp.open_position(
            &mut ctx,
            &mut vpool,
            &oracle,
            &mut bank,
            &pair(),
            Side::Buy,
            "trader",
            dec("1000"),
            dec("10"),
            Dec::ZERO,
        )
        .unwrap();
        (perp, vpool, oracle, bank, Ctx::new(3, 3_000))
    }

    #[test]
    fn test_add_then_remove_margin_round_trips() {
        let (mut perp, vpool, oracle, mut bank, mut ctx) = setup();
        let margin_before = perp.position(&pair(), "trader").unwrap().margin;

        perp.add_margin(
            &mut ctx,
            &vpool,
            &mut bank,
            &pair(),
            "trader",
            Coin::new("unusd", 500),
        )
        .unwrap();
        assert_eq!(
            perp.position(&pair(), "trader").unwrap().margin,
            margin_before.checked_add(dec("500")).unwrap()
        );
        assert_eq!(module_balance(&bank, modules::VAULT, "unusd"), 1_500);

        perp.remove_margin(
            &mut ctx,
            &vpool,
            &oracle,
            &mut bank,
            &pair(),
            "trader",
            Coin::new("unusd", 500),
        )
        .unwrap();
        assert_eq!(
            perp.position(&pair(), "trader").unwrap().margin,
            margin_before
        );
        assert_eq!(module_balance(&bank, modules::VAULT, "unusd"), 1_000);
    }

    #[test]
    fn test_remove_margin_free_collateral_guard() {
        let (mut perp, vpool, oracle, mut bank, mut ctx) = setup();
        // Margin 1000, min-preference (twap) notional ~9902 with pnl ~-98,
        // maintenance 0.0625: roughly 280 is withdrawable; 900 must fail.
        let err = perp
            .remove_margin(
                &mut ctx,
                &vpool,
                &oracle,
                &mut bank,
                &pair(),
                "trader",
                Coin::new("unusd", 900),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::FreeCollateralNegative);

        perp.remove_margin(
            &mut ctx,
            &vpool,
            &oracle,
            &mut bank,
            &pair(),
            "trader",
            Coin::new("unusd", 200),
        )
        .unwrap();
        assert_eq!(bank.balance("trader", "unusd"), 999_200);
    }

    #[test]
    fn test_remove_more_than_margin_is_bad_debt() {
        let (mut perp, vpool, oracle, mut bank, mut ctx) = setup();
        let err = perp
            .remove_margin(
                &mut ctx,
                &vpool,
                &oracle,
                &mut bank,
                &pair(),
                "trader",
                Coin::new("unusd", 1_001),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::RemoveMarginCausesBadDebt);
    }

    #[test]
    fn test_add_margin_rejects_wrong_denom() {
        let (mut perp, vpool, _oracle, mut bank, mut ctx) = setup();
        let err = perp
            .add_margin(
                &mut ctx,
                &vpool,
                &mut bank,
                &pair(),
                "trader",
                Coin::new("uatom", 500),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParams(_)));
    }

    #[test]
    fn test_add_margin_settles_funding() {
        let (mut perp, vpool, _oracle, mut bank, mut ctx) = setup();
        let pos = perp.position(&pair(), "trader").unwrap().clone();
        perp.set_cumulative_premium_fraction(&pair(), dec("0.0001"));
        let owed = pos.size.mul(dec("0.0001")).unwrap();

        let resp = perp
            .add_margin(
                &mut ctx,
                &vpool,
                &mut bank,
                &pair(),
                "trader",
                Coin::new("unusd", 100),
            )
            .unwrap();
        assert_eq!(resp.funding_payment, owed);
        assert_eq!(
            perp.position(&pair(), "trader").unwrap().margin,
            pos.margin
                .checked_add(dec("100"))
                .unwrap()
                .checked_sub(owed)
                .unwrap()
        );
    }

    #[test]
    fn test_donation_lands_in_fund() {
        let (mut perp, _vpool, _oracle, mut bank, _ctx) = setup();
        let before = module_balance(&bank, modules::PERP_EF, "unusd");
        perp.donate_to_ecosystem_fund(&mut bank, "trader", Coin::new("unusd", 2_500))
            .unwrap();
        assert_eq!(
            module_balance(&bank, modules::PERP_EF, "unusd"),
            before + 2_500
        );
        assert!(perp
            .donate_to_ecosystem_fund(&mut bank, "trader", Coin::new("unusd", -1))
            .is_err());
    }

    #[test]
    fn test_vault_shortfall_covered_by_fund() {
        let (mut perp, _vpool, _oracle, mut bank, _ctx) = setup();
        // Vault holds 1000; paying 1500 pulls 500 from the insurance fund.
        perp.withdraw_from_vault(&mut bank, "unusd", "trader", 1_500)
            .unwrap();
        assert_eq!(module_balance(&bank, modules::VAULT, "unusd"), 0);
        assert_eq!(module_balance(&bank, modules::PERP_EF, "unusd"), 999_500);
        assert_eq!(perp.prepaid_bad_debt("unusd"), 500);
    }

    #[test]
    fn test_realize_bad_debt_consumes_prepaid_first() {
        let (mut perp, _vpool, _oracle, mut bank, _ctx) = setup();
        perp.add_prepaid_bad_debt("unusd", 300);
        let fund_before = module_balance(&bank, modules::PERP_EF, "unusd");

        perp.realize_bad_debt(&mut bank, "unusd", dec("200")).unwrap();
        // Fully absorbed by prepaid credit, fund untouched
        assert_eq!(module_balance(&bank, modules::PERP_EF, "unusd"), fund_before);
        assert_eq!(perp.prepaid_bad_debt("unusd"), 100);

        perp.realize_bad_debt(&mut bank, "unusd", dec("600")).unwrap();
        // 100 prepaid + 500 from the fund
        assert_eq!(
            module_balance(&bank, modules::PERP_EF, "unusd"),
            fund_before - 500
        );
        assert_eq!(perp.prepaid_bad_debt("unusd"), 0);
    }

    #[test]
    fn test_realize_bad_debt_books_uncovered_residue() {
        let (mut perp, _vpool, _oracle, mut bank, _ctx) = setup();
        // Drain the insurance fund down to 100.
        bank.send_module_to_account("perp_ef", "sink", &Coin::new("unusd", 999_900))
            .unwrap();
        perp.realize_bad_debt(&mut bank, "unusd", dec("250")).unwrap();
        assert_eq!(module_balance(&bank, modules::PERP_EF, "unusd"), 0);
        assert_eq!(perp.prepaid_bad_debt("unusd"), 150);
    }
}
