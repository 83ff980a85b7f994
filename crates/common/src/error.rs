//! Engine-wide error type
//!
//! One enum for the whole workspace, split into four classes: user
//! errors (operation rejected, state untouched), config errors (fatal at
//! setup), data errors (internal consistency) and collaborator errors
//! surfaced from the bank/oracle ports. Framework rollback discards any
//! partial mutation when one of these propagates out of an entry point.

use crate::dec::MathError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ---- user errors ----
    #[error("swap output breaches user limit")]
    UserLimit,
    #[error("quote amount exceeds trading limit")]
    OverTradingLimit,
    #[error("post-swap mark price breaches fluctuation limit")]
    OverFluctuationLimit,
    #[error("insufficient balance: need {needed} {denom}, have {available}")]
    NotEnoughBalance {
        denom: String,
        needed: i128,
        available: i128,
    },
    #[error("leverage {requested} exceeds pool maximum {max}")]
    LeverageTooHigh { requested: String, max: String },
    #[error("margin ratio {ratio} below initial requirement {required}")]
    MarginRatioTooLow { ratio: String, required: String },
    #[error("margin is higher than maintenance requirement")]
    MarginHighEnough,
    #[error("no position for {trader} on {pair}")]
    PositionNotFound { pair: String, trader: String },
    #[error("free collateral would be negative")]
    FreeCollateralNegative,
    #[error("removing margin would cause bad debt")]
    RemoveMarginCausesBadDebt,
    #[error("position carries bad debt")]
    BadDebtWouldOccur,
    #[error("collateral ratio is not valid")]
    NoValidCollateralRatio,
    #[error("oracle prices are expired or missing")]
    PricesExpired,
    #[error("protocol is sufficiently collateralized")]
    ProtocolSufficientlyCollateralized,
    #[error("protocol has no collateral surplus to buy back")]
    ProtocolBalanced,
    #[error("oracle {oracle} is not whitelisted for {pair}")]
    NotWhitelistedOracle { oracle: String, pair: String },
    /// Malformed pair identity in caller input.
    #[error("invalid pair: {0}")]
    InvalidPair(String),

    // ---- config errors ----
    #[error("invalid pool creation args: {0}")]
    InvalidCreatePoolArgs(String),
    #[error("invalid parameter: {0}")]
    InvalidParams(String),

    // ---- data errors ----
    #[error("no vpool for pair {0}")]
    PairNotFound(String),
    #[error("swap would drain a reserve to zero")]
    ReserveAtZero,
    #[error("no reserve snapshots available for {0}")]
    NoSnapshotsAvailable(String),
    #[error("position has zero size")]
    PositionZero,
    #[error(transparent)]
    Math(#[from] MathError),

    // ---- collaborator errors ----
    #[error("unknown module account {0}")]
    UnknownModule(String),
    #[error("no spot pool for {0}/{1}")]
    NoSpotPool(String, String),
}

impl EngineError {
    /// User errors reject the operation without implying an engine bug.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            EngineError::PairNotFound(_)
                | EngineError::ReserveAtZero
                | EngineError::NoSnapshotsAvailable(_)
                | EngineError::PositionZero
                | EngineError::Math(_)
                | EngineError::InvalidCreatePoolArgs(_)
                | EngineError::InvalidParams(_)
                | EngineError::UnknownModule(_)
                | EngineError::NoSpotPool(_, _)
        )
    }
}
