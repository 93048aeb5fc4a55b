use flexlev_core::types::CallerId;
use flexlev_core::{MathError, SettingsError};
use thiserror::Error;

/// Every rejection an engine operation can surface. Each aborts the whole
/// call with no partial state mutation; retry is the caller's business.
#[derive(Debug, Error)]
pub enum EngineError {
    // State errors
    #[error("exchange {0:?} is not enabled")]
    InvalidExchange(String),

    #[error("cooldown not elapsed for exchange {exchange:?}")]
    CooldownNotElapsed { exchange: String },

    #[error("rebalance interval not elapsed and leverage ratio within bounds")]
    RebalanceNotDue,

    #[error("not in TWAP state; call rebalance instead")]
    NotInTwap,

    #[error("TWAP rebalance in progress; call iterate_rebalance instead")]
    TwapInProgress,

    #[error("a rebalance is currently in progress")]
    RebalanceInProgress,

    // Precondition errors
    #[error("must be below incentivized leverage ratio")]
    AboveIncentivizedRatio,

    #[error("must be above incentivized leverage ratio")]
    BelowIncentivizedRatio,

    #[error("debt must be 0")]
    DebtMustBeZero,

    #[error("borrow balance must exist")]
    BorrowBalanceMustExist,

    #[error("collateral balance must be greater than 0")]
    ZeroCollateral,

    #[error("token supply must be greater than 0")]
    ZeroSupply,

    #[error("bounds override must widen the methodology band")]
    InvalidBoundsOverride,

    // Authorization errors
    #[error("caller {0} is not authorized for this operation")]
    Unauthorized(CallerId),

    // Wrapped taxonomies
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error("collaborator call failed: {0}")]
    Collaborator(#[source] anyhow::Error),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Collaborator(err)
    }
}
