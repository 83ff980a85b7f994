//! Mint and burn of the stablecoin
//!
//! A mint takes `collRatio` of its value in collateral and the rest in
//! governance tokens; the governance leg is burned, which is what makes the
//! coin fractional-algorithmic. Burn is the mirror image. Fees are charged
//! on each leg on top of the principal: a configured fraction of the
//! collateral fee goes to the insurance fund and the same fraction of the
//! governance fee is burned, the remainders go to the treasury.

use crate::controller::StableKeeper;
use vperp_common::{
    modules, Amount, AssetPair, Coin, Ctx, Dec, EngineError, Event, ports::{BankPort, OraclePort},
};

/// Coins taken from the user by a mint, gross of fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintResp {
    pub stable: Coin,
    pub coll_in: Coin,
    pub gov_in: Coin,
    pub fees: Vec<Coin>,
}

/// Coins returned to the user by a burn, net of fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnResp {
    pub stable: Coin,
    pub coll_out: Coin,
    pub gov_out: Coin,
    pub fees: Vec<Coin>,
}

impl StableKeeper {
    /// Mint `stable` to `user` against collateral plus governance tokens.
    pub fn mint_stable(
        &self,
        ctx: &mut Ctx,
        oracle: &dyn OraclePort,
        bank: &mut dyn BankPort,
        user: &str,
        stable: Coin,
    ) -> Result<MintResp, EngineError> {
        let (stable_amount, coll_price, gov_price) =
            self.prepare_swap(ctx, oracle, &stable)?;
        let coll_ratio = self.require_valid_coll_ratio()?;

        let coll_amount = coll_ratio
            .mul(stable_amount)?
            .quo_ceil(coll_price)?
            .to_int_ceil();
        let gov_amount = Dec::ONE
            .checked_sub(coll_ratio)?
            .mul(stable_amount)?
            .quo_ceil(gov_price)?
            .to_int_ceil();
        let (coll_fee, coll_to_ef, coll_to_treasury) = self.split_fee(coll_amount)?;
        let (gov_fee, gov_burned, gov_to_treasury) = self.split_fee(gov_amount)?;

        let coll_in = Coin::new(&self.params.coll_denom, coll_amount + coll_fee);
        let gov_in = Coin::new(&self.params.gov_denom, gov_amount + gov_fee);
        bank.send_account_to_module(user, modules::STABLE, &coll_in)?;
        bank.send_account_to_module(user, modules::STABLE, &gov_in)?;

        bank.send_module_to_module(
            modules::STABLE,
            modules::PERP_EF,
            &Coin::new(&self.params.coll_denom, coll_to_ef),
        )?;
        bank.send_module_to_module(
            modules::STABLE,
            modules::FEE_POOL,
            &Coin::new(&self.params.coll_denom, coll_to_treasury),
        )?;
        // The absorbed governance principal and its fee share leave supply.
        bank.burn(
            modules::STABLE,
            &Coin::new(&self.params.gov_denom, gov_amount + gov_burned),
        )?;
        bank.send_module_to_module(
            modules::STABLE,
            modules::FEE_POOL,
            &Coin::new(&self.params.gov_denom, gov_to_treasury),
        )?;

        bank.mint(modules::STABLE, &stable)?;
        bank.send_module_to_account(modules::STABLE, user, &stable)?;

        let fees = vec![
            Coin::new(&self.params.coll_denom, coll_fee),
            Coin::new(&self.params.gov_denom, gov_fee),
        ];
        ctx.emit(Event::Mint {
            user: user.to_string(),
            stable: stable.clone(),
            coll_in: coll_in.clone(),
            gov_in: gov_in.clone(),
            fees: fees.clone(),
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(MintResp {
            stable,
            coll_in,
            gov_in,
            fees,
        })
    }

    /// Burn `stable` from `user`, paying out collateral and re-minted
    /// governance tokens at the current ratio.
    pub fn burn_stable(
        &self,
        ctx: &mut Ctx,
        oracle: &dyn OraclePort,
        bank: &mut dyn BankPort,
        user: &str,
        stable: Coin,
    ) -> Result<BurnResp, EngineError> {
        let (stable_amount, coll_price, gov_price) =
            self.prepare_swap(ctx, oracle, &stable)?;
        let coll_ratio = self.require_valid_coll_ratio()?;

        let coll_amount = coll_ratio
            .mul(stable_amount)?
            .quo(coll_price)?
            .to_int_truncate();
        let gov_amount = Dec::ONE
            .checked_sub(coll_ratio)?
            .mul(stable_amount)?
            .quo(gov_price)?
            .to_int_truncate();
        let (coll_fee, coll_to_ef, coll_to_treasury) = self.split_fee(coll_amount)?;
        let (gov_fee, gov_burned, gov_to_treasury) = self.split_fee(gov_amount)?;

        bank.send_account_to_module(user, modules::STABLE, &stable)?;
        bank.burn(modules::STABLE, &stable)?;

        let coll_out = Coin::new(&self.params.coll_denom, coll_amount - coll_fee);
        bank.send_module_to_account(modules::STABLE, user, &coll_out)?;
        bank.send_module_to_module(
            modules::STABLE,
            modules::PERP_EF,
            &Coin::new(&self.params.coll_denom, coll_to_ef),
        )?;
        bank.send_module_to_module(
            modules::STABLE,
            modules::FEE_POOL,
            &Coin::new(&self.params.coll_denom, coll_to_treasury),
        )?;

        // Governance was burned on mint; re-mint the redeemed share.
        bank.mint(
            modules::STABLE,
            &Coin::new(&self.params.gov_denom, gov_amount),
        )?;
        let gov_out = Coin::new(&self.params.gov_denom, gov_amount - gov_fee);
        bank.send_module_to_account(modules::STABLE, user, &gov_out)?;
        bank.burn(
            modules::STABLE,
            &Coin::new(&self.params.gov_denom, gov_burned),
        )?;
        bank.send_module_to_module(
            modules::STABLE,
            modules::FEE_POOL,
            &Coin::new(&self.params.gov_denom, gov_to_treasury),
        )?;

        let fees = vec![
            Coin::new(&self.params.coll_denom, coll_fee),
            Coin::new(&self.params.gov_denom, gov_fee),
        ];
        ctx.emit(Event::Burn {
            user: user.to_string(),
            stable: stable.clone(),
            coll_out: coll_out.clone(),
            gov_out: gov_out.clone(),
            fees: fees.clone(),
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(BurnResp {
            stable,
            coll_out,
            gov_out,
            fees,
        })
    }

    fn prepare_swap(
        &self,
        ctx: &Ctx,
        oracle: &dyn OraclePort,
        stable: &Coin,
    ) -> Result<(Dec, Dec, Dec), EngineError> {
        if stable.denom != self.params.stable_denom {
            return Err(EngineError::InvalidParams(format!(
                "expected {} denom, got {}",
                self.params.stable_denom, stable.denom
            )));
        }
        if stable.amount <= 0 {
            return Err(EngineError::InvalidParams(
                "stable amount must be positive".into(),
            ));
        }
        let coll_pair = AssetPair::new(&self.params.coll_denom, &self.params.stable_denom)?;
        let gov_pair = AssetPair::new(&self.params.gov_denom, &self.params.stable_denom)?;
        let coll_price = oracle.price(&coll_pair, ctx.block_time_ms)?;
        let gov_price = oracle.price(&gov_pair, ctx.block_time_ms)?;
        if !coll_price.is_positive() || !gov_price.is_positive() {
            return Err(EngineError::PricesExpired);
        }
        Ok((Dec::from_int(stable.amount)?, coll_price, gov_price))
    }

    /// Fee on `principal` and its split: (fee, insurance/burn share,
    /// treasury share). The insurance share rounds down.
    fn split_fee(&self, principal: Amount) -> Result<(Amount, Amount, Amount), EngineError> {
        let fee = Dec::from_int(principal)?
            .mul(self.params.fee_ratio)?
            .to_int_ceil();
        let ef_share = Dec::from_int(fee)?
            .mul(self.params.ef_fee_fraction)?
            .to_int_truncate();
        Ok((fee, ef_share, fee - ef_share))
    }
}
