//! Virtual AMM: constant-product reserve accounting, swap pricing,
//! trade/fluctuation guards and time-weighted average prices over a
//! snapshot history. Reserves are bookkeeping only; no tokens are held.

pub mod keeper;
pub mod snapshot;
pub mod state;

pub use keeper::VpoolKeeper;
pub use snapshot::ReserveSnapshot;
pub use state::{Direction, Vpool, VpoolConfig};
