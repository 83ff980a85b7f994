//! Recollateralize and buyback
//!
//! Arbitrage paths that pull the realized backing of the stablecoin toward
//! `collRatio · supply`. Under-collateralized: users deposit collateral and
//! are paid a bonus in freshly minted governance tokens. Over-collateralized:
//! users burn governance tokens for the collateral surplus, capped at the
//! surplus itself. Both legs need fresh prices; the governance token is
//! priced off the spot market when a pool exists, falling back to the oracle.

use crate::controller::StableKeeper;
use vperp_common::{
    modules, AssetPair, Coin, Ctx, Dec, EngineError, Event,
    ports::{AccountPort, BankPort, OraclePort, SpotPort},
};

impl StableKeeper {
    /// Deposit collateral into an under-collateralized protocol for
    /// governance tokens at a bonus. Input beyond the shortfall is ignored.
    pub fn recollateralize<B: BankPort + AccountPort>(
        &self,
        ctx: &mut Ctx,
        oracle: &dyn OraclePort,
        spot: &dyn SpotPort,
        bank: &mut B,
        user: &str,
        coll_in: Coin,
    ) -> Result<Coin, EngineError> {
        if coll_in.denom != self.params.coll_denom {
            return Err(EngineError::InvalidParams(format!(
                "expected {} denom, got {}",
                self.params.coll_denom, coll_in.denom
            )));
        }
        if coll_in.amount <= 0 {
            return Err(EngineError::InvalidParams(
                "collateral amount must be positive".into(),
            ));
        }
        let coll_price = self.coll_price(ctx, oracle)?;
        let shortfall = self
            .target_collateral(bank, coll_price)?
            .checked_sub(self.current_collateral(bank)?)?;
        if !shortfall.is_positive() {
            return Err(EngineError::ProtocolSufficientlyCollateralized);
        }

        let accepted = coll_in.amount.min(shortfall.to_int_ceil());
        let gov_price = self.gov_price(ctx, oracle, spot)?;
        let gov_amount = Dec::from_int(accepted)?
            .mul(coll_price)?
            .mul(Dec::ONE.checked_add(self.params.recoll_bonus)?)?
            .quo(gov_price)?
            .to_int_truncate();

        let taken = Coin::new(&self.params.coll_denom, accepted);
        let gov_out = Coin::new(&self.params.gov_denom, gov_amount);
        bank.send_account_to_module(user, modules::STABLE, &taken)?;
        bank.mint(modules::STABLE, &gov_out)?;
        bank.send_module_to_account(modules::STABLE, user, &gov_out)?;

        ctx.emit(Event::Recollateralize {
            user: user.to_string(),
            coll_in: taken,
            gov_out: gov_out.clone(),
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(gov_out)
    }

    /// Burn governance tokens against an over-collateralized protocol for
    /// collateral. Pays out at most the current surplus; excess input is
    /// ignored.
    pub fn buyback<B: BankPort + AccountPort>(
        &self,
        ctx: &mut Ctx,
        oracle: &dyn OraclePort,
        spot: &dyn SpotPort,
        bank: &mut B,
        user: &str,
        gov_in: Coin,
    ) -> Result<Coin, EngineError> {
        if gov_in.denom != self.params.gov_denom {
            return Err(EngineError::InvalidParams(format!(
                "expected {} denom, got {}",
                self.params.gov_denom, gov_in.denom
            )));
        }
        if gov_in.amount <= 0 {
            return Err(EngineError::InvalidParams(
                "governance amount must be positive".into(),
            ));
        }
        let coll_price = self.coll_price(ctx, oracle)?;
        let surplus = self
            .current_collateral(bank)?
            .checked_sub(self.target_collateral(bank, coll_price)?)?;
        if !surplus.is_positive() {
            return Err(EngineError::ProtocolBalanced);
        }

        let gov_price = self.gov_price(ctx, oracle, spot)?;
        let surplus_gov = surplus
            .mul(coll_price)?
            .quo(gov_price)?
            .to_int_ceil();
        let gov_used = gov_in.amount.min(surplus_gov);
        let coll_amount = Dec::from_int(gov_used)?
            .mul(gov_price)?
            .quo(coll_price)?
            .min(surplus)
            .to_int_truncate();

        let taken = Coin::new(&self.params.gov_denom, gov_used);
        let coll_out = Coin::new(&self.params.coll_denom, coll_amount);
        bank.send_account_to_module(user, modules::STABLE, &taken)?;
        bank.burn(modules::STABLE, &taken)?;
        bank.send_module_to_account(modules::STABLE, user, &coll_out)?;

        ctx.emit(Event::Buyback {
            user: user.to_string(),
            gov_in: taken,
            coll_out: coll_out.clone(),
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(coll_out)
    }

    /// Collateral tokens the protocol should hold: `collRatio · supply`
    /// valued at the collateral price.
    fn target_collateral<B: BankPort + AccountPort>(
        &self,
        bank: &B,
        coll_price: Dec,
    ) -> Result<Dec, EngineError> {
        let supply = Dec::from_int(bank.supply(&self.params.stable_denom))?;
        Ok(self.coll_ratio().mul(supply)?.quo(coll_price)?)
    }

    fn current_collateral<B: BankPort + AccountPort>(&self, bank: &B) -> Result<Dec, EngineError> {
        let addr = bank.module_address(modules::STABLE)?;
        Dec::from_int(bank.balance(&addr, &self.params.coll_denom)).map_err(Into::into)
    }

    fn coll_price(&self, ctx: &Ctx, oracle: &dyn OraclePort) -> Result<Dec, EngineError> {
        let pair = AssetPair::new(&self.params.coll_denom, &self.params.stable_denom)?;
        let price = oracle.price(&pair, ctx.block_time_ms)?;
        if !price.is_positive() {
            return Err(EngineError::PricesExpired);
        }
        Ok(price)
    }

    /// Governance price in stable units: spot market first, oracle fallback.
    fn gov_price(
        &self,
        ctx: &Ctx,
        oracle: &dyn OraclePort,
        spot: &dyn SpotPort,
    ) -> Result<Dec, EngineError> {
        if let Ok(id) = spot.pool_id(&self.params.gov_denom, &self.params.stable_denom) {
            let price = spot.spot_price(id, &self.params.gov_denom, &self.params.stable_denom)?;
            if price.is_positive() {
                return Ok(price);
            }
        }
        let pair = AssetPair::new(&self.params.gov_denom, &self.params.stable_denom)?;
        let price = oracle.price(&pair, ctx.block_time_ms)?;
        if !price.is_positive() {
            return Err(EngineError::PricesExpired);
        }
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StableParams;
    use vperp_common::mem::{module_balance, MemBank, MemOracle, MemSpot};

    fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    fn params() -> StableParams {
        StableParams {
            stable_denom: "unusd".into(),
            coll_denom: "uusdc".into(),
            gov_denom: "ugov".into(),
            fee_ratio: dec("0.002"),
            ef_fee_fraction: dec("0.5"),
            recoll_bonus: dec("0.002"),
            adjustment_step: dec("0.0025"),
            price_band: dec("0.001"),
            adjustment_interval_ms: 15 * 60 * 1_000,
            twap_lookback_ms: 15 * 60 * 1_000,
            initial_coll_ratio: dec("0.9"),
        }
    }

    /// Protocol with 1_000_000 stable in circulation backed by `backing`
    /// collateral, at unit oracle prices.
    fn setup(backing: i128) -> (StableKeeper, MemOracle, MemSpot, MemBank) {
        let mut keeper = StableKeeper::new(params()).unwrap();
        keeper.set_coll_ratio(dec("0.9")).unwrap();
        let mut oracle = MemOracle::new();
        oracle.set_price(&AssetPair::new("uusdc", "unusd").unwrap(), Dec::ONE, 0);
        oracle.set_price(&AssetPair::new("ugov", "unusd").unwrap(), Dec::ONE, 0);
        let mut bank = MemBank::new();
        bank.fund("circulation", &Coin::new("unusd", 1_000_000));
        bank.fund("module/stable", &Coin::new("uusdc", backing));
        bank.fund("user", &Coin::new("uusdc", 1_000_000));
        bank.fund("user", &Coin::new("ugov", 1_000_000));
        (keeper, oracle, MemSpot::new(), bank)
    }

    #[test]
    fn test_recollateralize_pays_bonus() {
        // Target 900_000, backing 850_000: shortfall 50_000
        let (keeper, oracle, spot, mut bank) = setup(850_000);
        let mut ctx = Ctx::new(1, 1_000);

        let gov_out = keeper
            .recollateralize(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("uusdc", 20_000),
            )
            .unwrap();
        // 20_000 * 1.002 at unit prices
        assert_eq!(gov_out, Coin::new("ugov", 20_040));
        assert_eq!(module_balance(&bank, modules::STABLE, "uusdc"), 870_000);
        assert_eq!(bank.balance("user", "ugov"), 1_020_040);
        assert!(matches!(
            ctx.events().last(),
            Some(Event::Recollateralize { .. })
        ));
    }

    #[test]
    fn test_recollateralize_caps_at_shortfall() {
        let (keeper, oracle, spot, mut bank) = setup(850_000);
        let mut ctx = Ctx::new(1, 1_000);

        let gov_out = keeper
            .recollateralize(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("uusdc", 500_000),
            )
            .unwrap();
        // Only the 50_000 shortfall is taken
        assert_eq!(bank.balance("user", "uusdc"), 950_000);
        assert_eq!(gov_out, Coin::new("ugov", 50_100));
        assert_eq!(module_balance(&bank, modules::STABLE, "uusdc"), 900_000);
    }

    #[test]
    fn test_recollateralize_rejected_when_sufficient() {
        let (keeper, oracle, spot, mut bank) = setup(900_000);
        let mut ctx = Ctx::new(1, 1_000);
        let err = keeper
            .recollateralize(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("uusdc", 1_000),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::ProtocolSufficientlyCollateralized);
    }

    #[test]
    fn test_buyback_caps_at_surplus() {
        // Backing 950_000 against a 900_000 target: 50_000 surplus
        let (keeper, oracle, spot, mut bank) = setup(950_000);
        let mut ctx = Ctx::new(1, 1_000);

        let gov_before = bank.supply("ugov");
        let coll_out = keeper
            .buyback(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("ugov", 80_000),
            )
            .unwrap();
        assert_eq!(coll_out, Coin::new("uusdc", 50_000));
        // Only the matching governance amount was taken and burned
        assert_eq!(bank.balance("user", "ugov"), 950_000);
        assert_eq!(bank.supply("ugov"), gov_before - 50_000);
        assert_eq!(module_balance(&bank, modules::STABLE, "uusdc"), 900_000);
        assert!(matches!(ctx.events().last(), Some(Event::Buyback { .. })));
    }

    #[test]
    fn test_buyback_rejected_when_balanced() {
        let (keeper, oracle, spot, mut bank) = setup(900_000);
        let mut ctx = Ctx::new(1, 1_000);
        let err = keeper
            .buyback(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("ugov", 1_000),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::ProtocolBalanced);
    }

    #[test]
    fn test_gov_priced_off_spot_pool_when_present() {
        let (keeper, oracle, mut spot, mut bank) = setup(850_000);
        // Spot pool prices gov at 2 stable, overriding the unit oracle price
        spot.add_pool("ugov", dec("1000"), "unusd", dec("2000"));
        let mut ctx = Ctx::new(1, 1_000);

        let gov_out = keeper
            .recollateralize(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("uusdc", 20_000),
            )
            .unwrap();
        // 20_000 * 1.002 / 2
        assert_eq!(gov_out, Coin::new("ugov", 10_020));
    }

    #[test]
    fn test_rebalance_requires_fresh_prices() {
        let (keeper, _, spot, mut bank) = setup(850_000);
        let oracle = MemOracle::new();
        let mut ctx = Ctx::new(1, 1_000);
        let err = keeper
            .recollateralize(
                &mut ctx,
                &oracle,
                &spot,
                &mut bank,
                "user",
                Coin::new("uusdc", 1_000),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::PricesExpired);
    }
}
