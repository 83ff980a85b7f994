//! Perp engine state: positions, pair funding metadata, prepaid bad debt
//!
//! Every store is a sorted map keyed on canonical strings, so iteration is
//! deterministic. Positions are keyed `(pair, trader)`; a position reduced to
//! zero size must be removed in the same operation that zeroed it.

use std::collections::BTreeMap;
use vperp_common::{Amount, AssetPair, Dec, EngineError};

/// One trader's leveraged exposure on one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub pair: AssetPair,
    pub trader: String,
    /// Signed base units; positive = long, negative = short.
    pub size: Dec,
    /// Collateral in quote units, never negative.
    pub margin: Dec,
    /// Quote value at entry, absolute.
    pub open_notional: Dec,
    /// Pair cumulative premium fraction at last touch.
    pub last_cumulative_premium_fraction: Dec,
    /// Height of the last operation that touched this position.
    pub block_number: u64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.size.is_positive()
    }

    pub fn key(&self) -> (String, String) {
        (self.pair.key(), self.trader.clone())
    }
}

/// Per-pair funding state, written only by the funding scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairMetadata {
    pub pair: AssetPair,
    pub latest_cumulative_premium_fraction: Dec,
}

/// Engine-wide perp parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerpParams {
    /// Fraction of exchanged notional charged on liquidation, in [0,1].
    pub liquidation_fee_ratio: Dec,
    /// Fraction of |size| closed by a partial liquidation, in [0,1].
    pub partial_liquidation_ratio: Dec,
    /// Funding epoch length; premium accrues once per elapsed epoch.
    pub funding_epoch_ms: u64,
    /// Lookback for mark/index TWAPs and Twap-mode position pricing.
    pub twap_lookback_ms: u64,
}

pub const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

impl PerpParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, ratio) in [
            ("liquidation_fee_ratio", self.liquidation_fee_ratio),
            ("partial_liquidation_ratio", self.partial_liquidation_ratio),
        ] {
            if ratio.is_negative() || ratio > Dec::ONE {
                return Err(EngineError::InvalidParams(format!(
                    "{} must be in [0, 1], got {}",
                    name, ratio
                )));
            }
        }
        if self.funding_epoch_ms == 0 || self.funding_epoch_ms > DAY_MS {
            return Err(EngineError::InvalidParams(format!(
                "funding_epoch_ms must be in (0, 24h], got {}",
                self.funding_epoch_ms
            )));
        }
        if self.twap_lookback_ms == 0 {
            return Err(EngineError::InvalidParams(
                "twap_lookback_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Funding intervals per day, at least 1.
    pub fn intervals_per_day(&self) -> u64 {
        (DAY_MS / self.funding_epoch_ms).max(1)
    }
}

/// Margin left on a position after settling funding and applying a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainMargin {
    pub margin: Dec,
    pub bad_debt: Dec,
    pub funding_payment: Dec,
}

/// Owns all perp state. Cloneable so callers can snapshot for rollback.
#[derive(Debug, Clone)]
pub struct PerpKeeper {
    pub params: PerpParams,
    positions: BTreeMap<(String, String), Position>,
    pair_metadata: BTreeMap<String, PairMetadata>,
    prepaid_bad_debt: BTreeMap<String, Amount>,
    pub(crate) last_funding_ms: u64,
}

impl PerpKeeper {
    pub fn new(params: PerpParams) -> Result<Self, EngineError> {
        params.validate()?;
        Ok(Self {
            params,
            positions: BTreeMap::new(),
            pair_metadata: BTreeMap::new(),
            prepaid_bad_debt: BTreeMap::new(),
            last_funding_ms: 0,
        })
    }

    // ---- positions ----

    pub fn position(&self, pair: &AssetPair, trader: &str) -> Result<&Position, EngineError> {
        self.positions
            .get(&(pair.key(), trader.to_string()))
            .ok_or_else(|| EngineError::PositionNotFound {
                pair: pair.key(),
                trader: trader.to_string(),
            })
    }

    pub fn maybe_position(&self, pair: &AssetPair, trader: &str) -> Option<&Position> {
        self.positions.get(&(pair.key(), trader.to_string()))
    }

    /// Write back a position; zero-size positions must be removed instead.
    pub(crate) fn set_position(&mut self, position: Position) {
        debug_assert!(!position.size.is_zero(), "zero-size position persisted");
        self.positions.insert(position.key(), position);
    }

    pub(crate) fn remove_position(&mut self, pair: &AssetPair, trader: &str) {
        self.positions.remove(&(pair.key(), trader.to_string()));
    }

    /// All positions in ascending (pair, trader) order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    // ---- pair metadata ----

    /// Register a pair for funding with a zeroed cumulative premium fraction.
    /// Idempotent.
    pub fn init_pair(&mut self, pair: &AssetPair) {
        self.pair_metadata
            .entry(pair.key())
            .or_insert_with(|| PairMetadata {
                pair: pair.clone(),
                latest_cumulative_premium_fraction: Dec::ZERO,
            });
    }

    pub fn pair_metadata(&self, pair: &AssetPair) -> Result<&PairMetadata, EngineError> {
        self.pair_metadata
            .get(&pair.key())
            .ok_or_else(|| EngineError::PairNotFound(pair.key()))
    }

    pub(crate) fn set_cumulative_premium_fraction(&mut self, pair: &AssetPair, cpf: Dec) {
        if let Some(meta) = self.pair_metadata.get_mut(&pair.key()) {
            meta.latest_cumulative_premium_fraction = cpf;
        }
    }

    pub fn pair_metadatas(&self) -> impl Iterator<Item = &PairMetadata> {
        self.pair_metadata.values()
    }

    pub fn latest_cumulative_premium_fraction(
        &self,
        pair: &AssetPair,
    ) -> Result<Dec, EngineError> {
        Ok(self
            .pair_metadata(pair)?
            .latest_cumulative_premium_fraction)
    }

    // ---- prepaid bad debt ----

    pub fn prepaid_bad_debt(&self, denom: &str) -> Amount {
        self.prepaid_bad_debt.get(denom).copied().unwrap_or(0)
    }

    pub(crate) fn add_prepaid_bad_debt(&mut self, denom: &str, amount: Amount) {
        if amount > 0 {
            *self.prepaid_bad_debt.entry(denom.to_string()).or_default() += amount;
        }
    }

    /// Consume up to `amount` of prepaid credit, returning what was consumed.
    pub(crate) fn consume_prepaid_bad_debt(&mut self, denom: &str, amount: Amount) -> Amount {
        let entry = self.prepaid_bad_debt.entry(denom.to_string()).or_default();
        let consumed = amount.min(*entry);
        *entry -= consumed;
        consumed
    }

    /// Funding payment owed by the position since its last touch, then the
    /// margin left after applying `margin_delta`. Negative remainders are
    /// clamped to zero and surfaced as bad debt.
    pub fn remain_margin_with_funding(
        &self,
        position: &Position,
        margin_delta: Dec,
    ) -> Result<RemainMargin, EngineError> {
        let latest = self.latest_cumulative_premium_fraction(&position.pair)?;
        let funding_payment = latest
            .checked_sub(position.last_cumulative_premium_fraction)?
            .mul(position.size)?;
        let remaining = position
            .margin
            .checked_add(margin_delta)?
            .checked_sub(funding_payment)?;
        if remaining.is_negative() {
            Ok(RemainMargin {
                margin: Dec::ZERO,
                bad_debt: remaining.neg()?,
                funding_payment,
            })
        } else {
            Ok(RemainMargin {
                margin: remaining,
                bad_debt: Dec::ZERO,
                funding_payment,
            })
        }
    }
}
