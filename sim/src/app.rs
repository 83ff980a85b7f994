//! In-process application state
//!
//! Bundles the three keepers with the in-memory collaborators and provides
//! the transactional wrapper: every message runs against the live state, and
//! on error the pre-message snapshot is restored, so a rejected message
//! leaves no partial mutation behind. Clone is cheap enough here for a sim;
//! a real host would use a store with native snapshots.

use vperp_common::{mem::{MemBank, MemOracle, MemSpot}, Ctx, EngineError};
use vperp_perp::PerpKeeper;
use vperp_stable::StableKeeper;
use vperp_vpool::VpoolKeeper;

#[derive(Debug, Clone)]
pub struct App {
    pub vpool: VpoolKeeper,
    pub perp: PerpKeeper,
    pub stable: StableKeeper,
    pub bank: MemBank,
    pub oracle: MemOracle,
    pub spot: MemSpot,
}

impl App {
    pub fn new(perp: PerpKeeper, stable: StableKeeper) -> Self {
        Self {
            vpool: VpoolKeeper::new(),
            perp,
            stable,
            bank: MemBank::new(),
            oracle: MemOracle::new(),
            spot: MemSpot::new(),
        }
    }

    /// Run one message transactionally. Returns whether it committed; a
    /// rejected message rolls back state and its events, and is logged.
    pub fn execute<F>(&mut self, ctx: &mut Ctx, label: &str, op: F) -> bool
    where
        F: FnOnce(&mut App, &mut Ctx) -> Result<(), EngineError>,
    {
        let state_snapshot = self.clone();
        let ctx_snapshot = ctx.clone();
        match op(self, ctx) {
            Ok(()) => {
                log::info!("block {}: {} committed", ctx.block_height, label);
                true
            }
            Err(err) => {
                *self = state_snapshot;
                *ctx = ctx_snapshot;
                if err.is_user_error() {
                    log::warn!("block {}: {} rejected: {}", ctx.block_height, label, err);
                } else {
                    log::error!("block {}: {} failed: {}", ctx.block_height, label, err);
                }
                false
            }
        }
    }

    /// End-of-block hooks, after the transaction sequence: funding epoch,
    /// collateral-ratio refresh, snapshot pruning.
    pub fn end_block(&mut self, ctx: &mut Ctx, snapshot_retention_ms: u64) {
        self.perp.after_epoch(ctx, &self.vpool, &self.oracle);
        if let Err(err) = self.stable.refresh_collateral_ratio(ctx, &self.oracle) {
            log::error!(
                "block {}: collateral ratio refresh failed: {}",
                ctx.block_height,
                err
            );
        }
        self.vpool
            .prune_snapshots(ctx.block_time_ms.saturating_sub(snapshot_retention_ms));
    }
}
