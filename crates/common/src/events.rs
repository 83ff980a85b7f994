//! Structured engine events
//!
//! Events are append-only records collected in the per-transaction [`Ctx`]
//! and drained by the caller after commit. They are data, not log lines:
//! every variant carries the block coordinates, the pair and actor involved,
//! and the full set of monetary deltas.
//!
//! [`Ctx`]: crate::ctx::Ctx

use crate::coin::Coin;
use crate::dec::Dec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Reserves moved on a vpool.
    Swap {
        pair: String,
        trader: String,
        quote_delta: Dec,
        base_delta: Dec,
        mark_price: Dec,
        block_height: u64,
        block_time_ms: u64,
    },
    /// A reserve snapshot was written (or overwritten) for this block.
    ReserveSnapshotSaved {
        pair: String,
        base_reserve: Dec,
        quote_reserve: Dec,
        block_height: u64,
        block_time_ms: u64,
    },
    /// Any position mutation except liquidation.
    PositionChanged {
        pair: String,
        trader: String,
        margin: Dec,
        open_notional: Dec,
        size: Dec,
        exchanged_notional: Dec,
        exchanged_size: Dec,
        realized_pnl: Dec,
        unrealized_pnl_after: Dec,
        funding_payment: Dec,
        bad_debt: Dec,
        mark_price: Dec,
        block_height: u64,
        block_time_ms: u64,
    },
    PositionLiquidated {
        pair: String,
        trader: String,
        liquidator: String,
        exchanged_notional: Dec,
        exchanged_size: Dec,
        fee_to_liquidator: Coin,
        fee_to_ecosystem_fund: Coin,
        bad_debt: Dec,
        margin: Dec,
        mark_price: Dec,
        block_height: u64,
        block_time_ms: u64,
    },
    /// Forced settlement of a position outside the normal close path.
    PositionSettled {
        pair: String,
        trader: String,
        settled: Vec<Coin>,
        block_height: u64,
        block_time_ms: u64,
    },
    FundingRateChanged {
        pair: String,
        mark_twap: Dec,
        index_twap: Dec,
        premium_fraction: Dec,
        cumulative_premium_fraction: Dec,
        block_height: u64,
        block_time_ms: u64,
    },
    Mint {
        user: String,
        stable: Coin,
        coll_in: Coin,
        gov_in: Coin,
        fees: Vec<Coin>,
        block_height: u64,
        block_time_ms: u64,
    },
    Burn {
        user: String,
        stable: Coin,
        coll_out: Coin,
        gov_out: Coin,
        fees: Vec<Coin>,
        block_height: u64,
        block_time_ms: u64,
    },
    Recollateralize {
        user: String,
        coll_in: Coin,
        gov_out: Coin,
        block_height: u64,
        block_time_ms: u64,
    },
    Buyback {
        user: String,
        gov_in: Coin,
        coll_out: Coin,
        block_height: u64,
        block_time_ms: u64,
    },
}
