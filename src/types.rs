//! Exchange-agnostic types shared by the client, markets and the engine
//!
//! Transfer records (`MarketDescriptor`, `OrderDto`, `Balance`) are what an
//! [`ExchangeClient`](crate::exchange::ExchangeClient) hands back; protocol
//! wire shapes stay inside the exchange binding.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange-assigned order identifier
pub type OrderId = u64;

/// Case-insensitive asset ticker, stored uppercased
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(ticker: &str) -> Self {
        Self(ticker.to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Symbol {
    fn from(ticker: String) -> Self {
        Self::new(&ticker)
    }
}

impl From<&str> for Symbol {
    fn from(ticker: &str) -> Self {
        Self::new(ticker)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Identity of a market: (asset, quote)
pub type MarketKey = (Symbol, Symbol);

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type as submitted to the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Limit,
    Market,
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
}

impl OrderStatus {
    /// Whether the exchange still considers the order live
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::PendingCancel
        )
    }
}

/// Static description of a tradable market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub asset: Symbol,
    pub quote: Symbol,
    /// Exchange symbol string, e.g. "BTCUSDT"
    pub symbol: String,
    /// Decimal places allowed for quantities
    pub asset_precision: u32,
    /// Decimal places allowed for prices
    pub quote_precision: u32,
}

impl MarketDescriptor {
    pub fn key(&self) -> MarketKey {
        (self.asset.clone(), self.quote.clone())
    }
}

impl fmt::Display for MarketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.asset, self.quote)
    }
}

/// A single execution from the trade stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeUpdate {
    pub asset: Symbol,
    pub quote: Symbol,
    pub price: Decimal,
    pub quantity: Decimal,
    pub buy_order_id: Option<OrderId>,
    pub sell_order_id: Option<OrderId>,
}

impl TradeUpdate {
    pub fn key(&self) -> MarketKey {
        (self.asset.clone(), self.quote.clone())
    }

    /// Whether this execution filled (part of) the given order
    pub fn involves(&self, order_id: OrderId) -> bool {
        self.buy_order_id == Some(order_id) || self.sell_order_id == Some(order_id)
    }
}

/// Authoritative order snapshot returned by the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDto {
    pub id: OrderId,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub cumulative_quote_quantity: Decimal,
}

impl OrderDto {
    /// Average execution price, zero while nothing has executed
    pub fn avg_fill_price(&self) -> Decimal {
        if self.executed_quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.cumulative_quote_quantity / self.executed_quantity
        }
    }
}

/// Result of one cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The exchange confirmed the cancel
    Canceled,
    /// The exchange answered with an error, e.g. the order is already gone
    Rejected,
    /// No answer from the exchange; worth another attempt
    Unreachable,
}

/// Free and locked holdings of one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub asset: Symbol,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Decimal places implied by an increment string such as "0.00100000".
///
/// Counts up to the first significant digit after the decimal point; an
/// increment of one or more allows no decimals. Returns `None` when the
/// string is not a positive number.
pub fn precision_of(increment: &str) -> Option<u32> {
    let value = Decimal::from_str(increment.trim()).ok()?;
    if value <= Decimal::ZERO {
        return None;
    }
    if value >= Decimal::ONE {
        return Some(0);
    }

    let (_, fraction) = increment.trim().split_once('.')?;
    fraction
        .chars()
        .position(|c| c != '0')
        .map(|position| position as u32 + 1)
}

/// Round towards zero to `dp` decimal places
pub fn round_down(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

/// Round away from zero to `dp` decimal places
pub fn round_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::AwayFromZero)
}
