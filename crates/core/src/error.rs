use rust_decimal::Decimal;
use thiserror::Error;

/// Failures of the fixed-point leverage arithmetic. All multiply/divide
/// steps are overflow-checked; none of these are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("decimal overflow in leverage arithmetic")]
    Overflow,

    #[error("division by zero in leverage arithmetic")]
    DivisionByZero,

    /// The leverage ratio is undefined: the position is at or past the
    /// point where debt covers collateral.
    #[error("collateral value {collateral} does not exceed borrow value {borrow}")]
    NonPositiveEquity {
        collateral: Decimal,
        borrow: Decimal,
    },

    #[error("amount {0} cannot be represented in base units")]
    AmountOutOfRange(Decimal),
}

/// Rejections raised by the settings validators. A failed mutation leaves
/// the previous settings intact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("leverage bounds are invalid: min {min}, target {target}, max {max}")]
    InvalidLeverageBounds {
        min: Decimal,
        target: Decimal,
        max: Decimal,
    },

    #[error("recentering speed {0} must be within (0, 1]")]
    InvalidRecenteringSpeed(Decimal),

    #[error("slippage tolerance {0} must be less than 100%")]
    InvalidSlippage(Decimal),

    #[error("unutilized leverage percentage {0} must be less than 100%")]
    InvalidUnutilizedLeverage(Decimal),

    #[error("max TWAP trade size must not be 0")]
    ZeroMaxTradeSize,

    #[error("incentivized leverage ratio {incentivized} must exceed max leverage ratio {max}")]
    IncentivizedRatioTooLow { incentivized: Decimal, max: Decimal },

    #[error(
        "incentivized TWAP cooldown ({incentivized_secs}s) must be shorter than the TWAP cooldown ({twap_secs}s)"
    )]
    IncentivizedCooldownTooLong {
        incentivized_secs: u64,
        twap_secs: u64,
    },

    #[error(
        "rebalance interval ({interval_secs}s) must not be shorter than the TWAP cooldown ({twap_secs}s)"
    )]
    RebalanceIntervalTooShort { interval_secs: u64, twap_secs: u64 },

    #[error("exchange {0:?} is already enabled")]
    ExchangeAlreadyEnabled(String),

    #[error("exchange {0:?} is not enabled")]
    ExchangeNotEnabled(String),
}
