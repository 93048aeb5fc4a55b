//! Engine settings structs and their cross-field validators.
//!
//! Settings are created once at engine construction and replaced only
//! through validated setters; a rejected mutation leaves the previous
//! values untouched.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SettingsError;
use crate::types::Asset;

/// Immutable per-deployment strategy wiring: which asset is supplied as
/// collateral and which is borrowed against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySettings {
    pub collateral_asset: Asset,
    pub borrow_asset: Asset,
}

/// The leverage methodology: where the ratio should sit, how wide the
/// band around it is, and how aggressively each rebalance recenters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologySettings {
    pub target_leverage_ratio: Decimal,
    pub min_leverage_ratio: Decimal,
    pub max_leverage_ratio: Decimal,
    /// Fraction of the gap to target closed per rebalance, in (0, 1].
    pub recentering_speed: Decimal,
    /// Minimum seconds between non-emergency rebalances.
    pub rebalance_interval_secs: u64,
}

impl MethodologySettings {
    #[must_use]
    pub fn rebalance_interval(&self) -> Duration {
        Duration::seconds(self.rebalance_interval_secs as i64)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.min_leverage_ratio < Decimal::ONE
            || self.min_leverage_ratio > self.target_leverage_ratio
            || self.target_leverage_ratio > self.max_leverage_ratio
        {
            return Err(SettingsError::InvalidLeverageBounds {
                min: self.min_leverage_ratio,
                target: self.target_leverage_ratio,
                max: self.max_leverage_ratio,
            });
        }
        if self.recentering_speed <= Decimal::ZERO || self.recentering_speed > Decimal::ONE {
            return Err(SettingsError::InvalidRecenteringSpeed(
                self.recentering_speed,
            ));
        }
        Ok(())
    }
}

/// Trade-execution parameters shared by every non-emergency operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Safety margin of borrow capacity kept unused, as a fraction < 1.
    pub unutilized_leverage_percentage: Decimal,
    /// Seconds an exchange must rest between TWAP chunks.
    pub twap_cooldown_secs: u64,
    /// Fraction < 1 of expected proceeds tolerated as slippage.
    pub slippage_tolerance: Decimal,
}

impl ExecutionSettings {
    #[must_use]
    pub fn twap_cooldown(&self) -> Duration {
        Duration::seconds(self.twap_cooldown_secs as i64)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.unutilized_leverage_percentage >= Decimal::ONE
            || self.unutilized_leverage_percentage < Decimal::ZERO
        {
            return Err(SettingsError::InvalidUnutilizedLeverage(
                self.unutilized_leverage_percentage,
            ));
        }
        if self.slippage_tolerance >= Decimal::ONE || self.slippage_tolerance < Decimal::ZERO {
            return Err(SettingsError::InvalidSlippage(self.slippage_tolerance));
        }
        Ok(())
    }
}

/// Parameters of the emergency ripcord path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncentiveSettings {
    /// Ratio at which the ripcord becomes callable. Must exceed the
    /// methodology's max leverage ratio.
    pub incentivized_leverage_ratio: Decimal,
    pub incentivized_slippage_tolerance: Decimal,
    /// Shortened per-exchange cooldown for emergency chunks.
    pub incentivized_twap_cooldown_secs: u64,
    /// Ether paid per ripcord call, bounded by the engine's balance.
    pub ether_reward: Decimal,
}

impl IncentiveSettings {
    #[must_use]
    pub fn incentivized_twap_cooldown(&self) -> Duration {
        Duration::seconds(self.incentivized_twap_cooldown_secs as i64)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.incentivized_slippage_tolerance >= Decimal::ONE
            || self.incentivized_slippage_tolerance < Decimal::ZERO
        {
            return Err(SettingsError::InvalidSlippage(
                self.incentivized_slippage_tolerance,
            ));
        }
        Ok(())
    }
}

/// Per-exchange execution parameters and the exchange's own trade clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Largest collateral notional (base units) one normal call may trade.
    pub twap_max_trade_size: u128,
    /// Largest collateral notional (base units) one ripcord call may trade.
    pub incentivized_twap_max_trade_size: u128,
    /// When this exchange last executed a chunk. Runtime state, never read
    /// from configuration.
    #[serde(skip)]
    pub exchange_last_trade_timestamp: Option<DateTime<Utc>>,
    /// Opaque routing payload handed to the trade adapter on lever trades.
    #[serde(default)]
    pub lever_payload: Value,
    /// Opaque routing payload handed to the trade adapter on delever trades.
    #[serde(default)]
    pub delever_payload: Value,
}

impl ExchangeSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.twap_max_trade_size == 0 {
            return Err(SettingsError::ZeroMaxTradeSize);
        }
        Ok(())
    }
}

/// Re-checks every invariant that spans more than one settings struct.
/// Run by the constructor and by each settings mutator.
pub fn validate_cross_settings(
    methodology: &MethodologySettings,
    execution: &ExecutionSettings,
    incentive: &IncentiveSettings,
) -> Result<(), SettingsError> {
    methodology.validate()?;
    execution.validate()?;
    incentive.validate()?;

    if incentive.incentivized_leverage_ratio <= methodology.max_leverage_ratio {
        return Err(SettingsError::IncentivizedRatioTooLow {
            incentivized: incentive.incentivized_leverage_ratio,
            max: methodology.max_leverage_ratio,
        });
    }
    if incentive.incentivized_twap_cooldown_secs >= execution.twap_cooldown_secs {
        return Err(SettingsError::IncentivizedCooldownTooLong {
            incentivized_secs: incentive.incentivized_twap_cooldown_secs,
            twap_secs: execution.twap_cooldown_secs,
        });
    }
    if methodology.rebalance_interval_secs < execution.twap_cooldown_secs {
        return Err(SettingsError::RebalanceIntervalTooShort {
            interval_secs: methodology.rebalance_interval_secs,
            twap_secs: execution.twap_cooldown_secs,
        });
    }
    Ok(())
}
