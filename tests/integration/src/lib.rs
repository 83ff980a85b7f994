//! In-process test harness
//!
//! Bundles the keepers with the in-memory collaborators behind the same
//! transactional wrapper a real host would provide: each message executes
//! against the live state and is rolled back wholesale on error. Blocks are
//! advanced explicitly so tests control time and epoch boundaries.

use vperp_common::{
    mem::{MemBank, MemOracle, MemSpot},
    AssetPair, Coin, Ctx, Dec, EngineError, Event,
};
use vperp_perp::{PerpKeeper, PerpParams};
use vperp_stable::{StableKeeper, StableParams};
use vperp_vpool::{VpoolConfig, VpoolKeeper};

pub const QUOTE: &str = "unusd";
pub const BASE: &str = "ubtc";
pub const COLL: &str = "uusdc";
pub const GOV: &str = "ugov";

#[derive(Debug, Clone)]
pub struct App {
    pub vpool: VpoolKeeper,
    pub perp: PerpKeeper,
    pub stable: StableKeeper,
    pub bank: MemBank,
    pub oracle: MemOracle,
    pub spot: MemSpot,
    pub height: u64,
    pub time_ms: u64,
    pub block_ms: u64,
    pub committed_events: Vec<Event>,
}

pub fn dec(s: &str) -> Dec {
    s.parse().expect("test decimal literal")
}

pub fn perp_params() -> PerpParams {
    PerpParams {
        liquidation_fee_ratio: dec("0.05"),
        partial_liquidation_ratio: dec("0.25"),
        funding_epoch_ms: 60 * 60 * 1_000,
        twap_lookback_ms: 15 * 60 * 1_000,
    }
}

pub fn stable_params() -> StableParams {
    StableParams {
        stable_denom: QUOTE.into(),
        coll_denom: COLL.into(),
        gov_denom: GOV.into(),
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

impl App {
    /// Fresh app with a single ubtc:unusd pool at mark 50_000, funded
    /// traders, an index post at genesis and a valid collateral ratio.
    pub fn bootstrap() -> (Self, AssetPair) {
        let pair = AssetPair::new(BASE, QUOTE).expect("test pair");
        let mut stable = StableKeeper::new(stable_params()).expect("stable params");
        stable.set_coll_ratio(dec("0.9")).expect("ratio in range");
        let mut app = Self {
            vpool: VpoolKeeper::new(),
            perp: PerpKeeper::new(perp_params()).expect("perp params"),
            stable,
            bank: MemBank::new(),
            oracle: MemOracle::new(),
            spot: MemSpot::new(),
            height: 0,
            time_ms: 0,
            block_ms: 5_000,
            committed_events: Vec::new(),
        };

        let mut ctx = Ctx::new(0, 0);
        app.vpool
            .create_pool(
                &mut ctx,
                pair.clone(),
                dec("10000000"),
                dec("200"),
                VpoolConfig {
                    trade_limit_ratio: dec("0.1"),
                    fluctuation_limit_ratio: Dec::ZERO,
                    max_oracle_spread_ratio: dec("0.3"),
                    maintenance_margin_ratio: dec("0.0625"),
                    max_leverage: dec("10"),
                },
            )
            .expect("pool creation");
        app.committed_events.extend(ctx.take_events());

        for trader in ["alice", "bob", "whale"] {
            app.bank.fund(trader, &Coin::new(QUOTE, 1_000_000));
        }
        app.bank.fund("carol", &Coin::new(COLL, 10_000_000));
        app.bank.fund("carol", &Coin::new(GOV, 10_000_000));

        app.oracle.set_price(&pair, dec("50000"), 0);
        app.oracle
            .set_price(&AssetPair::new(COLL, QUOTE).expect("pair"), Dec::ONE, 0);
        app.oracle
            .set_price(&AssetPair::new(GOV, QUOTE).expect("pair"), dec("10"), 0);

        (app, pair)
    }

    pub fn begin_block(&mut self) -> Ctx {
        self.height += 1;
        self.time_ms += self.block_ms;
        Ctx::new(self.height, self.time_ms)
    }

    /// Jump the clock forward, then open the next block.
    pub fn begin_block_at(&mut self, time_ms: u64) -> Ctx {
        assert!(time_ms > self.time_ms, "blocks must move forward");
        self.height += 1;
        self.time_ms = time_ms;
        Ctx::new(self.height, self.time_ms)
    }

    /// Post an index price at the current block time.
    pub fn post_index(&mut self, pair: &AssetPair, price: Dec) {
        self.oracle.set_price(pair, price, self.time_ms);
    }

    /// Run one message transactionally: on error, state and pending events
    /// are restored to their pre-message values.
    pub fn execute<T, F>(&mut self, ctx: &mut Ctx, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut App, &mut Ctx) -> Result<T, EngineError>,
    {
        let state_snapshot = self.clone();
        let ctx_snapshot = ctx.clone();
        match op(self, ctx) {
            Ok(value) => Ok(value),
            Err(err) => {
                *self = state_snapshot;
                *ctx = ctx_snapshot;
                Err(err)
            }
        }
    }

    /// End-of-block hooks in host order: funding epoch, collateral-ratio
    /// refresh, snapshot pruning. Drains the block's events.
    pub fn end_block(&mut self, mut ctx: Ctx) {
        self.perp.after_epoch(&mut ctx, &self.vpool, &self.oracle);
        if let Err(err) = self.stable.refresh_collateral_ratio(&ctx, &self.oracle) {
            log::warn!("collateral ratio refresh failed: {}", err);
        }
        self.vpool
            .prune_snapshots(self.time_ms.saturating_sub(2 * 60 * 60 * 1_000));
        self.committed_events.extend(ctx.take_events());
    }

    /// Total of `denom` across the given addresses plus all module accounts.
    pub fn total_held(&self, addrs: &[&str], denom: &str) -> i128 {
        use vperp_common::{modules, BankPort};
        let mut total = 0;
        for addr in addrs {
            total += self.bank.balance(addr, denom);
        }
        for module in [
            modules::VAULT,
            modules::PERP_EF,
            modules::FEE_POOL,
            modules::STABLE,
        ] {
            total += vperp_common::mem::module_balance(&self.bank, module, denom);
        }
        total
    }
}
