use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An asset known to the engine, identified by symbol together with its
/// native decimal precision. Balances cross the collaborator seams as raw
/// base units; `decimals` is what reconciles them with the common
/// fixed-point scale used by the leverage arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub decimals: u32,
}

impl Asset {
    #[must_use]
    pub fn new(symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Identity of an external caller invoking an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(pub String);

impl CallerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The next action a keeper should take for a given exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceAction {
    None,
    Rebalance,
    Iterate,
    Ripcord,
}

/// Which side of the position a trade moves.
///
/// `Lever` borrows the debt asset and buys collateral; `Delever` sells
/// collateral and repays debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Lever,
    Delever,
}

/// Result row of the chunk-notional query: the bounded notional one
/// exchange would trade right now, denominated in base units of the asset
/// being sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRebalanceQuote {
    pub exchange_name: String,
    pub direction: TradeDirection,
    pub sell_asset: Asset,
    pub buy_asset: Asset,
    pub sell_amount: u128,
}

/// Snapshot of the leveraged position in common-value terms, as read from
/// the lending market and oracle collaborators at the start of an
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// Collateral balance in whole tokens.
    pub collateral_balance: Decimal,
    /// Borrow balance in whole tokens.
    pub borrow_balance: Decimal,
    /// Collateral balance in raw base units.
    pub collateral_balance_raw: u128,
    /// Borrow balance in raw base units.
    pub borrow_balance_raw: u128,
    /// Oracle price of one whole collateral token.
    pub collateral_price: Decimal,
    /// Oracle price of one whole borrow token.
    pub borrow_price: Decimal,
    /// Collateral balance priced in the common quote currency.
    pub collateral_value: Decimal,
    /// Borrow balance priced in the common quote currency.
    pub borrow_value: Decimal,
    /// Leveraged-token supply in whole tokens.
    pub total_supply: Decimal,
}
