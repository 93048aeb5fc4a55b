//! Name-keyed exchange registry.
//!
//! Each enabled exchange carries its own trade-size caps and its own
//! cooldown clock, so keepers can alternate between venues while the
//! global clock advances on every trade. Enumeration preserves the order
//! exchanges were enabled in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use flexlev_core::{ExchangeSettings, SettingsError};

#[derive(Debug, Clone, Default)]
pub struct ExchangeRegistry {
    order: Vec<String>,
    exchanges: HashMap<String, ExchangeSettings>,
}

impl ExchangeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables a new exchange. A zero normal trade cap is rejected here —
    /// it would permanently stall the TWAP loop.
    pub fn add(&mut self, name: &str, settings: ExchangeSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        if self.exchanges.contains_key(name) {
            return Err(SettingsError::ExchangeAlreadyEnabled(name.to_string()));
        }
        let mut settings = settings;
        // A fresh exchange has never traded, whatever the caller passed.
        settings.exchange_last_trade_timestamp = None;
        self.order.push(name.to_string());
        self.exchanges.insert(name.to_string(), settings);
        Ok(())
    }

    /// Replaces an enabled exchange's parameters. The exchange's cooldown
    /// clock survives the update.
    pub fn update(&mut self, name: &str, settings: ExchangeSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let existing = self
            .exchanges
            .get_mut(name)
            .ok_or_else(|| SettingsError::ExchangeNotEnabled(name.to_string()))?;
        let last_trade = existing.exchange_last_trade_timestamp;
        *existing = settings;
        existing.exchange_last_trade_timestamp = last_trade;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ExchangeSettings, SettingsError> {
        let removed = self
            .exchanges
            .remove(name)
            .ok_or_else(|| SettingsError::ExchangeNotEnabled(name.to_string()))?;
        self.order.retain(|n| n != name);
        Ok(removed)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExchangeSettings> {
        self.exchanges.get(name)
    }

    /// Enabled exchange names in insertion order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Enabled exchanges with their settings, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExchangeSettings)> {
        self.order
            .iter()
            .filter_map(|name| self.exchanges.get(name).map(|s| (name.as_str(), s)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Stamps the exchange's cooldown clock after a successful trade.
    pub fn record_trade(&mut self, name: &str, at: DateTime<Utc>) -> Result<(), SettingsError> {
        let settings = self
            .exchanges
            .get_mut(name)
            .ok_or_else(|| SettingsError::ExchangeNotEnabled(name.to_string()))?;
        settings.exchange_last_trade_timestamp = Some(at);
        Ok(())
    }
}
