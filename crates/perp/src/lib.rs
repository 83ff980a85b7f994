//! Perpetual-futures position engine
//!
//! Positions trade against the virtual pools in `vperp-vpool`; collateral
//! lives in the vault module account behind the bank port, with the
//! insurance fund as backstop. Funding accrues per epoch from the
//! mark/index TWAP gap and settles lazily whenever a position is touched.

pub mod engine;
pub mod funding;
pub mod liquidate;
pub mod margin;
pub mod state;

pub use engine::{PnlCalcOption, PnlPreference, PositionResp, Side};
pub use liquidate::LiquidateResp;
pub use state::{PairMetadata, PerpKeeper, PerpParams, Position, RemainMargin, DAY_MS};
