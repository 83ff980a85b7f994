//! Algorithmic stablecoin module: fractional collateral backing with a
//! peg-tracking collateral-ratio controller, mint/burn against collateral
//! plus governance tokens, and recollateralize/buyback rebalancing paths.

pub mod controller;
pub mod mint_burn;
pub mod params;
pub mod rebalance;

pub use controller::StableKeeper;
pub use mint_burn::{BurnResp, MintResp};
pub use params::StableParams;
