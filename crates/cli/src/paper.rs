//! Paper collaborators.
//!
//! In-memory stand-ins for the lending market, oracle, exchange, and
//! accounting module, good enough to drive the engine through a full
//! price path without touching any external venue.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use flexlev_core::math;
use flexlev_core::traits::{
    Clock, LendingMarket, PositionAccounting, PriceOracle, TradeAdapter,
};
use flexlev_core::types::Asset;

/// A clock the simulation advances by hand.
pub struct SimClock {
    now: Mutex<DateTime<Utc>>,
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs as i64);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct LendingBook {
    supplied: u128,
    borrowed: u128,
}

/// Single-position lending market with fixed risk parameters.
pub struct PaperLendingMarket {
    book: RwLock<LendingBook>,
    max_ltv: Decimal,
    liquidation_threshold: Decimal,
    emode: RwLock<Option<u8>>,
}

impl PaperLendingMarket {
    #[must_use]
    pub fn new(max_ltv: Decimal, liquidation_threshold: Decimal) -> Self {
        Self {
            book: RwLock::new(LendingBook::default()),
            max_ltv,
            liquidation_threshold,
            emode: RwLock::new(None),
        }
    }

    pub async fn seed_collateral(&self, amount: u128) {
        self.book.write().await.supplied = amount;
    }

    pub async fn borrowed(&self) -> u128 {
        self.book.read().await.borrowed
    }
}

#[async_trait]
impl LendingMarket for PaperLendingMarket {
    async fn supply_balance(&self, _asset: &Asset) -> Result<u128> {
        Ok(self.book.read().await.supplied)
    }

    async fn borrow_balance(&self, _asset: &Asset) -> Result<u128> {
        Ok(self.book.read().await.borrowed)
    }

    async fn max_ltv(&self, _asset: &Asset) -> Result<Decimal> {
        Ok(self.max_ltv)
    }

    async fn liquidation_threshold(&self, _asset: &Asset) -> Result<Decimal> {
        Ok(self.liquidation_threshold)
    }

    async fn supply(&self, asset: &Asset, amount: u128) -> Result<()> {
        self.book.write().await.supplied += amount;
        debug!(asset = %asset, amount, "paper supply");
        Ok(())
    }

    async fn withdraw(&self, asset: &Asset, amount: u128) -> Result<()> {
        let mut book = self.book.write().await;
        if amount > book.supplied {
            bail!("withdraw {amount} exceeds supplied {}", book.supplied);
        }
        book.supplied -= amount;
        debug!(asset = %asset, amount, "paper withdraw");
        Ok(())
    }

    async fn borrow(&self, asset: &Asset, amount: u128) -> Result<()> {
        self.book.write().await.borrowed += amount;
        debug!(asset = %asset, amount, "paper borrow");
        Ok(())
    }

    async fn repay(&self, asset: &Asset, amount: u128) -> Result<()> {
        let mut book = self.book.write().await;
        if amount > book.borrowed {
            bail!("repay {amount} exceeds borrowed {}", book.borrowed);
        }
        book.borrowed -= amount;
        debug!(asset = %asset, amount, "paper repay");
        Ok(())
    }

    async fn set_emode_category(&self, category_id: u8) -> Result<()> {
        *self.emode.write().await = Some(category_id);
        Ok(())
    }
}

/// Price feed fed by the simulation's scripted path.
pub struct ScriptedOracle {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl ScriptedOracle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .write()
            .await
            .insert(symbol.to_string(), price);
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for ScriptedOracle {
    async fn price(&self, asset: &Asset) -> Result<Decimal> {
        self.prices
            .read()
            .await
            .get(&asset.symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no scripted price for {}", asset.symbol))
    }
}

/// Fills every order at the oracle price and logs the paper fill.
pub struct PaperExchange {
    oracle: Arc<ScriptedOracle>,
}

impl PaperExchange {
    #[must_use]
    pub fn new(oracle: Arc<ScriptedOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl TradeAdapter for PaperExchange {
    async fn trade(
        &self,
        exchange_name: &str,
        sell: &Asset,
        buy: &Asset,
        sell_amount: u128,
        min_receive: u128,
        _routing: &Value,
    ) -> Result<u128> {
        let sell_price = self.oracle.price(sell).await?;
        let buy_price = self.oracle.price(buy).await?;
        let sold = math::units_to_decimal(sell_amount, sell)?;
        let proceeds = math::convert_amount(sold, sell_price, buy_price)?;
        let received = math::decimal_to_units(proceeds, buy)?;
        if received < min_receive {
            bail!("paper fill {received} below min receive {min_receive}");
        }

        info!(
            exchange = exchange_name,
            sell = %sell,
            buy = %buy,
            sold = sell_amount,
            received,
            "paper fill simulated"
        );
        Ok(received)
    }
}

/// Fixed-supply accounting stub that remembers the last recorded
/// per-share debt position.
pub struct PaperAccounting {
    supply: Decimal,
    recorded_units: RwLock<Decimal>,
}

impl PaperAccounting {
    #[must_use]
    pub fn new(supply: Decimal) -> Self {
        Self {
            supply,
            recorded_units: RwLock::new(Decimal::ZERO),
        }
    }

    pub async fn debt_units_per_share(&self) -> Decimal {
        *self.recorded_units.read().await
    }
}

#[async_trait]
impl PositionAccounting for PaperAccounting {
    async fn total_supply(&self) -> Result<Decimal> {
        Ok(self.supply)
    }

    async fn record_debt_position_units(
        &self,
        asset: &Asset,
        units_per_share: Decimal,
    ) -> Result<()> {
        *self.recorded_units.write().await = units_per_share;
        debug!(asset = %asset, units = %units_per_share, "debt position recorded");
        Ok(())
    }
}
