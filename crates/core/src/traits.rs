//! Collaborator seams.
//!
//! The engine consumes its external collaborators — the lending market,
//! the price oracle, the exchange trade adapter, and the leveraged-token
//! accounting module — through these narrow async interfaces. Amounts
//! cross the seam as raw base units of the named asset; fractions and
//! prices are `Decimal`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::types::Asset;

/// Position accessor and action surface of the lending protocol.
#[async_trait]
pub trait LendingMarket: Send + Sync {
    async fn supply_balance(&self, asset: &Asset) -> Result<u128>;
    async fn borrow_balance(&self, asset: &Asset) -> Result<u128>;

    /// Loan-to-value cap applied when opening new borrows, as a fraction.
    async fn max_ltv(&self, asset: &Asset) -> Result<Decimal>;

    /// Liquidation threshold for the collateral asset, as a fraction.
    async fn liquidation_threshold(&self, asset: &Asset) -> Result<Decimal>;

    async fn supply(&self, asset: &Asset, amount: u128) -> Result<()>;
    async fn withdraw(&self, asset: &Asset, amount: u128) -> Result<()>;
    async fn borrow(&self, asset: &Asset, amount: u128) -> Result<()>;
    async fn repay(&self, asset: &Asset, amount: u128) -> Result<()>;

    /// Selects the lending market's efficiency-mode category for the
    /// position, where the protocol supports one.
    async fn set_emode_category(&self, category_id: u8) -> Result<()>;
}

/// Price feed returning the value of one whole token in the common quote
/// currency.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self, asset: &Asset) -> Result<Decimal>;
}

/// Swap executor. Routing internals live behind this seam; the opaque
/// `routing` payload is carried from the exchange settings untouched.
#[async_trait]
pub trait TradeAdapter: Send + Sync {
    /// Sells `sell_amount` base units of `sell` for `buy`, failing if the
    /// proceeds would land under `min_receive`. Returns the amount
    /// actually received, in base units of `buy`.
    async fn trade(
        &self,
        exchange_name: &str,
        sell: &Asset,
        buy: &Asset,
        sell_amount: u128,
        min_receive: u128,
        routing: &Value,
    ) -> Result<u128>;
}

/// Issuance/accounting module of the leveraged token.
#[async_trait]
pub trait PositionAccounting: Send + Sync {
    /// Outstanding leveraged-token supply in whole tokens.
    async fn total_supply(&self) -> Result<Decimal>;

    /// Records the external debt position per leveraged-token share after
    /// a trade action. Debt is recorded as a negative unit count.
    async fn record_debt_position_units(&self, asset: &Asset, units_per_share: Decimal)
        -> Result<()>;
}

/// Time source for cooldown and interval arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
