pub mod error;
pub mod math;
pub mod settings;
pub mod traits;
pub mod types;

pub use error::{MathError, SettingsError};
pub use settings::{
    ExchangeSettings, ExecutionSettings, IncentiveSettings, MethodologySettings, StrategySettings,
};
pub use traits::{
    Clock, LendingMarket, PositionAccounting, PriceOracle, SystemClock, TradeAdapter,
};
pub use types::{Asset, CallerId, ChunkRebalanceQuote, RebalanceAction, TradeDirection};
