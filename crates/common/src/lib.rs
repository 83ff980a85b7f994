//! Shared primitives for the vperp engine workspace: fixed-point decimals,
//! asset pairs, coins, the per-transaction context, the engine error enum,
//! structured events, collaborator ports and their in-memory adapters.

pub mod coin;
pub mod ctx;
pub mod dec;
pub mod error;
pub mod events;
pub mod mem;
pub mod pair;
pub mod ports;

pub use coin::Coin;
pub use ctx::Ctx;
pub use dec::{Amount, Dec, MathError, DEC_DIGITS, SCALE};
pub use error::EngineError;
pub use events::Event;
pub use pair::AssetPair;
pub use ports::{modules, AccountPort, BankPort, OraclePort, SpotPort};
