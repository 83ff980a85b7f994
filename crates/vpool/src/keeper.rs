//! Vpool keeper: pool store, swap execution, snapshots and TWAP queries

use crate::snapshot::ReserveSnapshot;
use crate::state::{Direction, Vpool, VpoolConfig};
use std::collections::BTreeMap;
use std::ops::Bound;
use vperp_common::{AssetPair, Ctx, Dec, EngineError, Event};

/// Owns every vpool and the shared snapshot history. All maps are sorted;
/// iteration anywhere in here is deterministic.
#[derive(Debug, Clone, Default)]
pub struct VpoolKeeper {
    pools: BTreeMap<String, Vpool>,
    snapshots: BTreeMap<(String, u64), ReserveSnapshot>,
}

impl VpoolKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish a pool and write its genesis snapshot.
    pub fn create_pool(
        &mut self,
        ctx: &mut Ctx,
        pair: AssetPair,
        quote_reserve: Dec,
        base_reserve: Dec,
        config: VpoolConfig,
    ) -> Result<(), EngineError> {
        if self.pools.contains_key(&pair.key()) {
            return Err(EngineError::InvalidCreatePoolArgs(format!(
                "pool {} already exists",
                pair
            )));
        }
        let pool = Vpool::new(pair, quote_reserve, base_reserve, config)?;
        self.save_snapshot(ctx, &pool);
        self.pools.insert(pool.pair.key(), pool);
        Ok(())
    }

    pub fn exists(&self, pair: &AssetPair) -> bool {
        self.pools.contains_key(&pair.key())
    }

    pub fn pool(&self, pair: &AssetPair) -> Result<&Vpool, EngineError> {
        self.pools
            .get(&pair.key())
            .ok_or_else(|| EngineError::PairNotFound(pair.key()))
    }

    /// Pairs with a live pool, ascending by canonical key.
    pub fn pairs(&self) -> impl Iterator<Item = &Vpool> {
        self.pools.values()
    }

    /// Replace a pool's risk configuration after re-validation.
    pub fn edit_pool_config(
        &mut self,
        pair: &AssetPair,
        config: VpoolConfig,
    ) -> Result<(), EngineError> {
        config.validate()?;
        let pool = self
            .pools
            .get_mut(&pair.key())
            .ok_or_else(|| EngineError::PairNotFound(pair.key()))?;
        pool.config = config;
        Ok(())
    }

    /// Admin peg change: scale the quote reserve by `multiplier` and snapshot
    /// the shifted price. Position PnL against the vault is settled by
    /// governance outside this call.
    pub fn repeg(
        &mut self,
        ctx: &mut Ctx,
        pair: &AssetPair,
        multiplier: Dec,
    ) -> Result<(), EngineError> {
        if !multiplier.is_positive() {
            return Err(EngineError::InvalidParams(format!(
                "peg multiplier must be positive, got {}",
                multiplier
            )));
        }
        let pool = self
            .pools
            .get_mut(&pair.key())
            .ok_or_else(|| EngineError::PairNotFound(pair.key()))?;
        pool.quote_reserve = pool.quote_reserve.mul(multiplier)?;
        pool.validate()?;
        let snap_pool = pool.clone();
        self.save_snapshot(ctx, &snap_pool);
        Ok(())
    }

    // ---- swaps ----

    /// Trade `quote_amount_abs` quote against the pool. Returns the absolute
    /// base amount crossing the pool boundary.
    #[allow(clippy::too_many_arguments)]
    pub fn swap_quote_for_base(
        &mut self,
        ctx: &mut Ctx,
        pair: &AssetPair,
        dir: Direction,
        quote_amount_abs: Dec,
        base_limit_abs: Dec,
        skip_fluctuation_check: bool,
        trader: &str,
    ) -> Result<Dec, EngineError> {
        if quote_amount_abs.is_negative() {
            return Err(EngineError::InvalidParams(
                "swap amount must be non-negative".into(),
            ));
        }
        if quote_amount_abs.is_zero() {
            return Ok(Dec::ZERO);
        }
        let pool = self.pool(pair)?;

        // Trade limit binds the input-side reserve.
        let max_quote = pool.quote_reserve.mul(pool.config.trade_limit_ratio)?;
        if quote_amount_abs > max_quote {
            return Err(EngineError::OverTradingLimit);
        }

        let (base_amount_abs, quote_after, base_after) =
            base_out(pool, dir, quote_amount_abs)?;

        // User limit: a buyer wants at least `limit` out, a seller wants the
        // cost capped at `limit`.
        if base_limit_abs.is_positive() {
            match dir {
                Direction::AddToPool if base_amount_abs < base_limit_abs => {
                    return Err(EngineError::UserLimit)
                }
                Direction::RemoveFromPool if base_amount_abs > base_limit_abs => {
                    return Err(EngineError::UserLimit)
                }
                _ => {}
            }
        }

        self.commit_swap(
            ctx,
            pair,
            quote_after,
            base_after,
            skip_fluctuation_check,
            trader,
        )?;
        Ok(base_amount_abs)
    }

    /// Trade `base_amount_abs` base against the pool. Returns the absolute
    /// quote amount crossing the pool boundary.
    #[allow(clippy::too_many_arguments)]
    pub fn swap_base_for_quote(
        &mut self,
        ctx: &mut Ctx,
        pair: &AssetPair,
        dir: Direction,
        base_amount_abs: Dec,
        quote_limit_abs: Dec,
        skip_fluctuation_check: bool,
        trader: &str,
    ) -> Result<Dec, EngineError> {
        if base_amount_abs.is_negative() {
            return Err(EngineError::InvalidParams(
                "swap amount must be non-negative".into(),
            ));
        }
        if base_amount_abs.is_zero() {
            return Ok(Dec::ZERO);
        }
        let pool = self.pool(pair)?;

        let max_base = pool.base_reserve.mul(pool.config.trade_limit_ratio)?;
        if base_amount_abs > max_base {
            return Err(EngineError::OverTradingLimit);
        }

        let (quote_amount_abs, base_after, quote_after) =
            quote_out(pool, dir, base_amount_abs)?;

        if quote_limit_abs.is_positive() {
            match dir {
                // Seller of base wants at least `limit` quote out.
                Direction::AddToPool if quote_amount_abs < quote_limit_abs => {
                    return Err(EngineError::UserLimit)
                }
                // Buyer of base wants the quote cost capped at `limit`.
                Direction::RemoveFromPool if quote_amount_abs > quote_limit_abs => {
                    return Err(EngineError::UserLimit)
                }
                _ => {}
            }
        }

        self.commit_swap(
            ctx,
            pair,
            quote_after,
            base_after,
            skip_fluctuation_check,
            trader,
        )?;
        Ok(quote_amount_abs)
    }

    /// Apply computed post-swap reserves: fluctuation check, reserve write,
    /// snapshot overwrite, swap event.
    fn commit_swap(
        &mut self,
        ctx: &mut Ctx,
        pair: &AssetPair,
        quote_after: Dec,
        base_after: Dec,
        skip_fluctuation_check: bool,
        trader: &str,
    ) -> Result<(), EngineError> {
        let key = pair.key();
        let pool = self.pools.get(&key).expect("pool existence checked by caller");

        let post_price = if base_after.is_zero() {
            Dec::ZERO
        } else {
            quote_after.quo(base_after)?
        };

        if !skip_fluctuation_check {
            self.check_fluctuation_limit(ctx, pool, post_price)?;
        }

        let quote_delta = quote_after.checked_sub(pool.quote_reserve)?;
        let base_delta = base_after.checked_sub(pool.base_reserve)?;

        let pool = self.pools.get_mut(&key).expect("pool present");
        pool.quote_reserve = quote_after;
        pool.base_reserve = base_after;
        let snap_pool = pool.clone();
        self.save_snapshot(ctx, &snap_pool);

        log::debug!(
            "swap on {}: quote_delta={} base_delta={} mark={}",
            key,
            quote_delta,
            base_delta,
            post_price
        );
        ctx.emit(Event::Swap {
            pair: key,
            trader: trader.to_string(),
            quote_delta,
            base_delta,
            mark_price: post_price,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        });
        Ok(())
    }

    /// Post-swap mark must stay within the fluctuation band around the
    /// closing price of the most recent earlier block. No earlier-block
    /// snapshot (pool created this block) means nothing to compare against.
    fn check_fluctuation_limit(
        &self,
        ctx: &Ctx,
        pool: &Vpool,
        post_price: Dec,
    ) -> Result<(), EngineError> {
        let ratio = pool.config.fluctuation_limit_ratio;
        if ratio.is_zero() {
            return Ok(());
        }
        let last_prior = self
            .snapshots_for(&pool.pair.key(), ctx.block_time_ms)
            .rev()
            .find(|snap| snap.block_height < ctx.block_height);
        let Some(snap) = last_prior else {
            return Ok(());
        };
        let reference = snap.spot_price();
        let upper = reference.mul(Dec::ONE.checked_add(ratio)?)?;
        let lower = reference.mul(Dec::ONE.checked_sub(ratio)?)?;
        if post_price > upper || post_price < lower {
            return Err(EngineError::OverFluctuationLimit);
        }
        Ok(())
    }

    fn save_snapshot(&mut self, ctx: &mut Ctx, pool: &Vpool) {
        let snap = ReserveSnapshot {
            pair: pool.pair.key(),
            base_reserve: pool.base_reserve,
            quote_reserve: pool.quote_reserve,
            block_height: ctx.block_height,
            block_time_ms: ctx.block_time_ms,
        };
        ctx.emit(Event::ReserveSnapshotSaved {
            pair: snap.pair.clone(),
            base_reserve: snap.base_reserve,
            quote_reserve: snap.quote_reserve,
            block_height: snap.block_height,
            block_time_ms: snap.block_time_ms,
        });
        self.snapshots
            .insert((pool.pair.key(), ctx.block_time_ms), snap);
    }

    /// Drop snapshots older than `keep_from_ms`, keeping the newest one below
    /// the cutoff so a TWAP window edge still has a reference state.
    pub fn prune_snapshots(&mut self, keep_from_ms: u64) {
        let pairs: Vec<String> = self.pools.keys().cloned().collect();
        for pair_key in pairs {
            let old: Vec<u64> = self
                .snapshots
                .range((
                    Bound::Included((pair_key.clone(), 0)),
                    Bound::Excluded((pair_key.clone(), keep_from_ms)),
                ))
                .map(|((_, t), _)| *t)
                .collect();
            // Keep the last pre-cutoff snapshot.
            for t in old.iter().rev().skip(1) {
                self.snapshots.remove(&(pair_key.clone(), *t));
            }
        }
    }

    pub fn snapshot_count(&self, pair: &AssetPair) -> usize {
        self.snapshots_for(&pair.key(), u64::MAX).count()
    }

    fn snapshots_for(
        &self,
        pair_key: &str,
        up_to_ms: u64,
    ) -> impl DoubleEndedIterator<Item = &ReserveSnapshot> {
        self.snapshots
            .range((
                Bound::Included((pair_key.to_string(), 0)),
                Bound::Included((pair_key.to_string(), up_to_ms)),
            ))
            .map(|(_, snap)| snap)
    }

    // ---- queries ----

    /// Hypothetical base output/input for a quote swap, no mutation.
    pub fn base_for_quote(
        &self,
        pair: &AssetPair,
        dir: Direction,
        quote_amount_abs: Dec,
    ) -> Result<Dec, EngineError> {
        let pool = self.pool(pair)?;
        Ok(base_out(pool, dir, quote_amount_abs)?.0)
    }

    /// Hypothetical quote output/input for a base swap, no mutation.
    /// This is the quote-unit price of `base_amount_abs` base.
    pub fn quote_for_base(
        &self,
        pair: &AssetPair,
        dir: Direction,
        base_amount_abs: Dec,
    ) -> Result<Dec, EngineError> {
        let pool = self.pool(pair)?;
        Ok(quote_out(pool, dir, base_amount_abs)?.0)
    }

    pub fn spot_price(&self, pair: &AssetPair) -> Result<Dec, EngineError> {
        Ok(self.pool(pair)?.spot_price())
    }

    /// Time-weighted mark price over `lookback_ms` ending now.
    pub fn mark_price_twap(
        &self,
        pair: &AssetPair,
        now_ms: u64,
        lookback_ms: u64,
    ) -> Result<Dec, EngineError> {
        self.pool(pair)?;
        self.snapshot_twap(&pair.key(), now_ms, lookback_ms, |snap| {
            Ok(snap.spot_price())
        })
    }

    /// Time-weighted quote value of a hypothetical base swap over the
    /// lookback: the swap is priced against each snapshot's reserves and each
    /// result is weighted by how long that snapshot was current.
    pub fn base_asset_twap(
        &self,
        pair: &AssetPair,
        dir: Direction,
        base_amount_abs: Dec,
        now_ms: u64,
        lookback_ms: u64,
    ) -> Result<Dec, EngineError> {
        let pool = self.pool(pair)?;
        if base_amount_abs.is_zero() {
            return Ok(Dec::ZERO);
        }
        let config = pool.config;
        let pair_id = pool.pair.clone();
        self.snapshot_twap(&pair.key(), now_ms, lookback_ms, move |snap| {
            let at_snapshot = Vpool {
                pair: pair_id.clone(),
                base_reserve: snap.base_reserve,
                quote_reserve: snap.quote_reserve,
                config,
            };
            Ok(quote_out(&at_snapshot, dir, base_amount_abs)?.0)
        })
    }

    /// `|spot − index| / index ≥ maxOracleSpreadRatio`
    pub fn is_over_spread_limit(
        &self,
        pair: &AssetPair,
        index_price: Dec,
    ) -> Result<bool, EngineError> {
        let pool = self.pool(pair)?;
        if !index_price.is_positive() {
            return Err(EngineError::PricesExpired);
        }
        let spread = pool
            .spot_price()
            .checked_sub(index_price)?
            .abs()?
            .quo(index_price)?;
        Ok(spread >= pool.config.max_oracle_spread_ratio)
    }

    /// Interval-weighted fold over the snapshot history. Snapshots partition
    /// `[now - lookback, now]`; each snapshot's value is weighted by the time
    /// until the next one (the current-block snapshot gets zero weight). A
    /// lookback longer than the history is capped at the earliest snapshot.
    fn snapshot_twap(
        &self,
        pair_key: &str,
        now_ms: u64,
        lookback_ms: u64,
        value_at: impl Fn(&ReserveSnapshot) -> Result<Dec, EngineError>,
    ) -> Result<Dec, EngineError> {
        let window_start = now_ms.saturating_sub(lookback_ms);
        let mut cursor = now_ms;
        let mut weighted = Dec::ZERO;
        let mut total_ms: u64 = 0;
        let mut latest: Option<&ReserveSnapshot> = None;

        for snap in self.snapshots_for(pair_key, now_ms).rev() {
            latest.get_or_insert(snap);
            let from = snap.block_time_ms.max(window_start);
            let span = cursor.saturating_sub(from);
            weighted = weighted.checked_add(value_at(snap)?.mul_int(span as i128)?)?;
            total_ms += span;
            cursor = from;
            if snap.block_time_ms <= window_start {
                break;
            }
        }

        match latest {
            None => Err(EngineError::NoSnapshotsAvailable(pair_key.to_string())),
            Some(snap) if total_ms == 0 => value_at(snap),
            Some(_) => Ok(weighted.quo(Dec::from_int(total_ms as i128)?)?),
        }
    }
}

/// `baseAfter = k / (quote ± amt)`; returns (|Δbase|, quote_after, base_after).
fn base_out(pool: &Vpool, dir: Direction, quote_amount_abs: Dec) -> Result<(Dec, Dec, Dec), EngineError> {
    let k = pool.invariant_k()?;
    let quote_after = match dir {
        Direction::AddToPool => pool.quote_reserve.checked_add(quote_amount_abs)?,
        Direction::RemoveFromPool => pool.quote_reserve.checked_sub(quote_amount_abs)?,
    };
    if !quote_after.is_positive() {
        return Err(EngineError::ReserveAtZero);
    }
    let base_after = k.quo(quote_after)?;
    let base_amount_abs = base_after.checked_sub(pool.base_reserve)?.abs()?;
    Ok((base_amount_abs, quote_after, base_after))
}

/// `quoteAfter = k / (base ± amt)`; returns (|Δquote|, base_after, quote_after).
fn quote_out(pool: &Vpool, dir: Direction, base_amount_abs: Dec) -> Result<(Dec, Dec, Dec), EngineError> {
    let k = pool.invariant_k()?;
    let base_after = match dir {
        Direction::AddToPool => pool.base_reserve.checked_add(base_amount_abs)?,
        Direction::RemoveFromPool => pool.base_reserve.checked_sub(base_amount_abs)?,
    };
    if !base_after.is_positive() {
        return Err(EngineError::ReserveAtZero);
    }
    let quote_after = k.quo(base_after)?;
    let quote_amount_abs = quote_after.checked_sub(pool.quote_reserve)?.abs()?;
    Ok((quote_amount_abs, base_after, quote_after))
}
