//! Simulation configuration.
//!
//! Loaded from TOML with `FLEXLEV_`-prefixed environment overrides. Trade
//! caps are configured in whole collateral tokens and converted to base
//! units when the engine is wired up.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use flexlev_core::settings::validate_cross_settings;
use flexlev_core::types::Asset;
use flexlev_core::{
    ExecutionSettings, IncentiveSettings, MethodologySettings, SettingsError, StrategySettings,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub strategy: StrategySettings,
    pub methodology: MethodologySettings,
    pub execution: ExecutionSettings,
    pub incentive: IncentiveSettings,
    pub exchanges: Vec<ExchangeConfig>,
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    /// Normal per-call cap in whole collateral tokens.
    pub twap_max_trade_size: Decimal,
    /// Ripcord per-call cap in whole collateral tokens.
    pub incentivized_twap_max_trade_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Collateral supplied before engaging, in whole tokens.
    pub initial_collateral: Decimal,
    /// Quote price of the borrow asset, held flat through the run.
    pub borrow_price: Decimal,
    /// Collateral price path, one step per simulation tick.
    pub collateral_prices: Vec<Decimal>,
    pub max_ltv: Decimal,
    pub liquidation_threshold: Decimal,
    /// Leveraged-token supply, whole tokens.
    pub total_supply: Decimal,
    /// Seconds the clock advances per tick.
    pub step_secs: u64,
    /// Ether preloaded into the reward vault for ripcord payouts.
    #[serde(default)]
    pub ether_funding: Decimal,
}

impl SimulationConfig {
    /// Re-runs every settings invariant the engine itself enforces, so a
    /// config can be vetted before a run.
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_cross_settings(&self.methodology, &self.execution, &self.incentive)?;
        for exchange in &self.exchanges {
            if exchange.twap_max_trade_size <= Decimal::ZERO {
                return Err(SettingsError::ZeroMaxTradeSize);
            }
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    /// A 2x WETH/USDC strategy walking through a drawdown deep enough to
    /// cross the ripcord threshold, then recovering.
    fn default() -> Self {
        Self {
            strategy: StrategySettings {
                collateral_asset: Asset::new("WETH", 18),
                borrow_asset: Asset::new("USDC", 6),
            },
            methodology: MethodologySettings {
                target_leverage_ratio: dec!(2.0),
                min_leverage_ratio: dec!(1.7),
                max_leverage_ratio: dec!(2.3),
                recentering_speed: dec!(0.05),
                rebalance_interval_secs: 86_400,
            },
            execution: ExecutionSettings {
                unutilized_leverage_percentage: dec!(0.01),
                twap_cooldown_secs: 300,
                slippage_tolerance: dec!(0.005),
            },
            incentive: IncentiveSettings {
                incentivized_leverage_ratio: dec!(2.6),
                incentivized_slippage_tolerance: dec!(0.02),
                incentivized_twap_cooldown_secs: 60,
                ether_reward: dec!(1),
            },
            exchanges: vec![ExchangeConfig {
                name: "uniswap".to_string(),
                twap_max_trade_size: dec!(25),
                incentivized_twap_max_trade_size: dec!(50),
            }],
            market: MarketConfig {
                initial_collateral: dec!(100),
                borrow_price: Decimal::ONE,
                collateral_prices: vec![
                    dec!(1000),
                    dec!(980),
                    dec!(940),
                    dec!(880),
                    dec!(820),
                    dec!(760),
                    dec!(800),
                    dec!(860),
                    dec!(930),
                    dec!(1000),
                ],
                max_ltv: dec!(0.8),
                liquidation_threshold: dec!(0.825),
                total_supply: dec!(50),
                step_secs: 3_600,
                ether_funding: dec!(10),
            },
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads a simulation configuration by merging the TOML file with
    /// `FLEXLEV_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<SimulationConfig> {
        let config: SimulationConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FLEXLEV_"))
            .extract()?;
        Ok(config)
    }
}
