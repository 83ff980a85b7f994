//! Collaborator ports
//!
//! The engine never touches collaborator state directly; everything external
//! (oracle reports, balances, module accounts, the spot AMM used to price the
//! governance token) sits behind one of these traits. Dispatch is dynamic at
//! the port seams only; domain objects stay concrete.

use crate::coin::Coin;
use crate::dec::{Amount, Dec};
use crate::error::EngineError;
use crate::pair::AssetPair;

/// Module account names owned by the engine.
pub mod modules {
    /// Holds trader collateral for open positions.
    pub const VAULT: &str = "vault";
    /// Insurance / ecosystem fund: covers bad debt, receives liquidation fees.
    pub const PERP_EF: &str = "perp_ef";
    /// Treasury pool receiving the non-insurance share of stablecoin fees.
    pub const FEE_POOL: &str = "fee_pool";
    /// Stablecoin module: holds collateral backing and mints/burns stable.
    pub const STABLE: &str = "stable";
}

/// Read interface of the external price oracle.
pub trait OraclePort {
    /// Latest valid index price for the pair.
    fn price(&self, pair: &AssetPair, now_ms: u64) -> Result<Dec, EngineError>;

    /// Time-weighted index price over `lookback_ms` ending at `now_ms`.
    fn twap(&self, pair: &AssetPair, now_ms: u64, lookback_ms: u64) -> Result<Dec, EngineError>;

    /// Whether an unexpired report exists for the pair.
    fn is_active(&self, pair: &AssetPair, now_ms: u64) -> bool;
}

/// Balance mutation primitives of the bank subsystem. All engine money
/// movement goes through these; the engine holds no balances of its own.
pub trait BankPort {
    fn send_account_to_module(
        &mut self,
        from: &str,
        module: &str,
        coin: &Coin,
    ) -> Result<(), EngineError>;

    fn send_module_to_account(
        &mut self,
        module: &str,
        to: &str,
        coin: &Coin,
    ) -> Result<(), EngineError>;

    fn send_module_to_module(
        &mut self,
        from: &str,
        to: &str,
        coin: &Coin,
    ) -> Result<(), EngineError>;

    /// Mint `coin` into a module account, growing supply.
    fn mint(&mut self, module: &str, coin: &Coin) -> Result<(), EngineError>;

    /// Burn `coin` out of a module account, shrinking supply.
    fn burn(&mut self, module: &str, coin: &Coin) -> Result<(), EngineError>;

    fn balance(&self, addr: &str, denom: &str) -> Amount;

    fn supply(&self, denom: &str) -> Amount;
}

/// Account subsystem: resolves module names to addresses.
pub trait AccountPort {
    fn module_address(&self, module: &str) -> Result<String, EngineError>;
}

/// Spot AMM, consumed by the stablecoin controller to price the governance
/// token against the stable denom.
pub trait SpotPort {
    fn pool_id(&self, denom_a: &str, denom_b: &str) -> Result<u64, EngineError>;

    /// Price of one `denom_in` in `denom_out` units for the given pool.
    fn spot_price(&self, pool_id: u64, denom_in: &str, denom_out: &str)
        -> Result<Dec, EngineError>;
}
