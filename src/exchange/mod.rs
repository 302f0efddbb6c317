//! Exchange capability interface
//!
//! Markets, orders and the engine only ever see `dyn ExchangeClient`.
//! Exchange failures never cross this boundary as errors: implementations
//! log them and answer `None`, `false` or an empty list. The one exception is
//! [`ExchangeClient::get_stream`], which rejects malformed batches up front.

pub mod binance;

pub use binance::BinanceClient;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{Balance, CancelOutcome, MarketDescriptor, OrderDto, OrderId, Side};
use crate::websocket::Subscription;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Discover tradable markets and their quantization precision
    async fn fetch_markets(&self) -> Vec<MarketDescriptor>;

    async fn create_limit_order(
        &self,
        market: &MarketDescriptor,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Option<OrderDto>;

    async fn create_market_order(
        &self,
        market: &MarketDescriptor,
        side: Side,
        quantity: Decimal,
    ) -> Option<OrderDto>;

    /// One cancel attempt. Only [`CancelOutcome::Unreachable`] is worth
    /// retrying.
    async fn cancel_order(&self, market: &MarketDescriptor, id: OrderId) -> CancelOutcome;

    /// Cancel every open order on one market
    async fn cancel_all_orders(&self, market: &MarketDescriptor) -> bool;

    /// Authoritative snapshot of one order
    async fn get_order(&self, market: &MarketDescriptor, id: OrderId) -> Option<OrderDto>;

    async fn balances(&self) -> Option<Vec<Balance>>;

    /// Re-measure the offset between the local and the exchange clock
    async fn sync_clock(&self) -> bool;

    /// Open a trade subscription covering `markets`.
    ///
    /// Fails without connecting when `markets` is empty or larger than
    /// [`max_markets_per_stream`](Self::max_markets_per_stream).
    async fn get_stream(&self, markets: &[MarketDescriptor]) -> Result<Subscription>;

    fn max_markets_per_stream(&self) -> usize;
}
