//! Market module
//!
//! A market holds the last traded price of one (asset, quote) pair, fans
//! trade updates out to its listeners, and places quantized orders.

mod order;

pub use order::{Order, OrderCallback, OrderState};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, trace, warn};

use crate::exchange::ExchangeClient;
use crate::retry::RetryPolicy;
use crate::types::{round_down, round_up, MarketDescriptor, OrderKind, Side, TradeUpdate};

/// Handle returned by listener registration
pub type ListenerId = u64;

/// Called with the new price whenever it changes
pub type PriceListener = Arc<dyn Fn(&MarketDescriptor, Decimal) + Send + Sync>;

/// Called for every trade on the market
pub type TradeListener = Arc<dyn Fn(&TradeUpdate) + Send + Sync>;

/// How orders created by a market are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSettings {
    /// Period of authoritative order polling
    pub poll_interval: Duration,
    pub cancel_retry: RetryPolicy,
    /// Bound on the best-effort cancel run by [`Order::close`]
    pub close_timeout: Duration,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            cancel_retry: RetryPolicy::default(),
            close_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Market {
    descriptor: MarketDescriptor,
    client: Arc<dyn ExchangeClient>,
    settings: OrderSettings,
    current_price: Mutex<Option<Decimal>>,
    price_listeners: Mutex<Vec<(ListenerId, PriceListener)>>,
    trade_listeners: Mutex<Vec<(ListenerId, TradeListener)>>,
    next_listener_id: AtomicU64,
}

impl Market {
    pub fn new(
        descriptor: MarketDescriptor,
        client: Arc<dyn ExchangeClient>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            descriptor,
            client,
            settings,
            current_price: Mutex::new(None),
            price_listeners: Mutex::new(Vec::new()),
            trade_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn descriptor(&self) -> &MarketDescriptor {
        &self.descriptor
    }

    /// Last traded price, `None` until the first trade arrives
    pub fn current_price(&self) -> Option<Decimal> {
        *self.current_price.lock()
    }

    pub(crate) fn client(&self) -> &Arc<dyn ExchangeClient> {
        &self.client
    }

    pub(crate) fn settings(&self) -> &OrderSettings {
        &self.settings
    }

    /// Apply one trade: update the price if it moved, then notify listeners.
    ///
    /// Listeners run against a snapshot of the registrations, so they may
    /// unregister themselves while being called. A panicking listener is
    /// logged and skipped. Returns the number of listeners that failed.
    pub fn update(&self, update: &TradeUpdate) -> usize {
        let price_changed = {
            let mut current = self.current_price.lock();
            if *current == Some(update.price) {
                false
            } else {
                *current = Some(update.price);
                true
            }
        };

        let mut failures = 0;

        if price_changed {
            trace!(market = %self.descriptor, price = %update.price, "Price changed");
            let listeners: Vec<PriceListener> = self
                .price_listeners
                .lock()
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            for listener in listeners {
                if !self.isolate(|| listener(&self.descriptor, update.price)) {
                    failures += 1;
                }
            }
        }

        let listeners: Vec<TradeListener> = self
            .trade_listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if !self.isolate(|| listener(update)) {
                failures += 1;
            }
        }

        failures
    }

    fn isolate(&self, call: impl FnOnce()) -> bool {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(()) => true,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown".to_string());
                error!(market = %self.descriptor, reason = %reason, "Listener panicked");
                false
            }
        }
    }

    fn next_id(&self) -> ListenerId {
        self.next_listener_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_price_listener(&self, listener: PriceListener) -> ListenerId {
        let id = self.next_id();
        self.price_listeners.lock().push((id, listener));
        id
    }

    pub fn unregister_price_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.price_listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn register_trade_listener(&self, listener: TradeListener) -> ListenerId {
        let id = self.next_id();
        self.trade_listeners.lock().push((id, listener));
        id
    }

    pub fn unregister_trade_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.trade_listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn trade_listener_count(&self) -> usize {
        self.trade_listeners.lock().len()
    }

    /// Round a price to the market's precision: down for buys, up for sells
    pub fn quantize_price(&self, side: Side, price: Decimal) -> Decimal {
        match side {
            Side::Buy => round_down(price, self.descriptor.quote_precision),
            Side::Sell => round_up(price, self.descriptor.quote_precision),
        }
    }

    /// Round a quantity to the market's precision: up for buys, down for sells
    pub fn quantize_quantity(&self, side: Side, quantity: Decimal) -> Decimal {
        match side {
            Side::Buy => round_up(quantity, self.descriptor.asset_precision),
            Side::Sell => round_down(quantity, self.descriptor.asset_precision),
        }
    }

    /// Place a limit order. A rejected placement yields a `Faulted` order.
    pub async fn create_limit_order(
        self: &Arc<Self>,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Order {
        let price = self.quantize_price(side, price);
        let quantity = self.quantize_quantity(side, quantity);

        match self
            .client
            .create_limit_order(&self.descriptor, side, price, quantity)
            .await
        {
            Some(dto) => Order::open(self.clone(), OrderKind::Limit, side, Some(price), quantity, dto),
            None => {
                warn!(market = %self.descriptor, side = %side, price = %price, quantity = %quantity, "Limit order placement failed");
                Order::faulted(self.clone(), OrderKind::Limit, side, Some(price), quantity)
            }
        }
    }

    /// Place a market order. A rejected placement yields a `Faulted` order.
    pub async fn create_market_order(self: &Arc<Self>, side: Side, quantity: Decimal) -> Order {
        let quantity = self.quantize_quantity(side, quantity);

        match self
            .client
            .create_market_order(&self.descriptor, side, quantity)
            .await
        {
            Some(dto) => Order::open(self.clone(), OrderKind::Market, side, None, quantity, dto),
            None => {
                warn!(market = %self.descriptor, side = %side, quantity = %quantity, "Market order placement failed");
                Order::faulted(self.clone(), OrderKind::Market, side, None, quantity)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::exchange::MockExchangeClient;
    use crate::types::{OrderDto, OrderStatus, Symbol};

    pub fn descriptor(asset: &str, quote: &str) -> MarketDescriptor {
        MarketDescriptor {
            asset: Symbol::new(asset),
            quote: Symbol::new(quote),
            symbol: format!("{}{}", asset, quote).to_uppercase(),
            asset_precision: 3,
            quote_precision: 2,
        }
    }

    pub fn market_with(client: MockExchangeClient, settings: OrderSettings) -> Arc<Market> {
        Arc::new(Market::new(descriptor("btc", "usdt"), Arc::new(client), settings))
    }

    pub fn trade(price: Decimal, quantity: Decimal) -> TradeUpdate {
        TradeUpdate {
            asset: Symbol::new("BTC"),
            quote: Symbol::new("USDT"),
            price,
            quantity,
            buy_order_id: None,
            sell_order_id: None,
        }
    }

    pub fn dto(id: u64, status: OrderStatus, executed: Decimal, quote: Decimal) -> OrderDto {
        OrderDto {
            id,
            status,
            executed_quantity: executed,
            cumulative_quote_quantity: quote,
        }
    }
}
