//! Order lifecycle tracking
//!
//! An order is Open until it is Filled or Canceled; an order whose placement
//! failed starts out Faulted. Fills arrive from two directions: trade updates
//! matching the order id (pushed by the market) and a periodic authoritative
//! poll of the exchange, which catches fills the stream missed.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use super::{ListenerId, Market, OrderSettings};
use crate::types::{CancelOutcome, OrderDto, OrderId, OrderKind, OrderStatus, Side, TradeUpdate};

/// Fire-once terminal callback
pub type OrderCallback = Box<dyn FnOnce(&Order) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Filled,
    Canceled,
    Faulted,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::Open)
    }
}

struct Progress {
    state: OrderState,
    executed_quantity: Decimal,
    avg_fill_price: Decimal,
    on_filled: Vec<OrderCallback>,
    on_canceled: Vec<OrderCallback>,
    listener: Option<ListenerId>,
}

/// What is left to do once an order reached a terminal state
struct Settled {
    callbacks: Vec<OrderCallback>,
    listener: Option<ListenerId>,
}

impl Progress {
    fn settle(&mut self, state: OrderState) -> Settled {
        self.state = state;
        let filled = std::mem::take(&mut self.on_filled);
        let canceled = std::mem::take(&mut self.on_canceled);
        Settled {
            callbacks: if state == OrderState::Filled { filled } else { canceled },
            listener: self.listener.take(),
        }
    }
}

struct OrderInner {
    id: Option<OrderId>,
    market: Arc<Market>,
    kind: OrderKind,
    side: Side,
    target_price: Option<Decimal>,
    target_quantity: Decimal,
    settings: OrderSettings,
    progress: Mutex<Progress>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for OrderInner {
    fn drop(&mut self) {
        if let Some(listener) = self.progress.get_mut().listener.take() {
            self.market.unregister_trade_listener(listener);
        }
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}

/// Shared handle to one order
#[derive(Clone)]
pub struct Order {
    inner: Arc<OrderInner>,
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("id", &self.inner.id)
            .field("market", &self.inner.market.descriptor().symbol)
            .field("side", &self.inner.side)
            .field("state", &self.state())
            .field("executed_quantity", &self.executed_quantity())
            .finish()
    }
}

impl Order {
    /// Track an order the exchange accepted
    pub(crate) fn open(
        market: Arc<Market>,
        kind: OrderKind,
        side: Side,
        target_price: Option<Decimal>,
        target_quantity: Decimal,
        placed: OrderDto,
    ) -> Self {
        let settings = *market.settings();
        let order = Self::build(
            market,
            Some(placed.id),
            kind,
            side,
            target_price,
            target_quantity,
            settings,
            OrderState::Open,
        );

        info!(
            order_id = placed.id,
            market = %order.inner.market.descriptor(),
            side = %side,
            quantity = %target_quantity,
            "Tracking order"
        );

        // The placement reply may already report fills (typical for market orders)
        order.reconcile(placed);
        if order.is_terminal() {
            return order;
        }

        let weak = Arc::downgrade(&order.inner);
        let listener = order
            .inner
            .market
            .register_trade_listener(Arc::new(move |update: &TradeUpdate| {
                if let Some(inner) = weak.upgrade() {
                    Order { inner }.on_trade(update);
                }
            }));
        order.inner.progress.lock().listener = Some(listener);

        *order.inner.poller.lock() = Some(spawn_poller(Arc::downgrade(&order.inner), settings.poll_interval));
        order
    }

    /// An order whose placement failed; inert from the start
    pub(crate) fn faulted(
        market: Arc<Market>,
        kind: OrderKind,
        side: Side,
        target_price: Option<Decimal>,
        target_quantity: Decimal,
    ) -> Self {
        let settings = *market.settings();
        Self::build(
            market,
            None,
            kind,
            side,
            target_price,
            target_quantity,
            settings,
            OrderState::Faulted,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        market: Arc<Market>,
        id: Option<OrderId>,
        kind: OrderKind,
        side: Side,
        target_price: Option<Decimal>,
        target_quantity: Decimal,
        settings: OrderSettings,
        state: OrderState,
    ) -> Self {
        Self {
            inner: Arc::new(OrderInner {
                id,
                market,
                kind,
                side,
                target_price,
                target_quantity,
                settings,
                progress: Mutex::new(Progress {
                    state,
                    executed_quantity: Decimal::ZERO,
                    avg_fill_price: Decimal::ZERO,
                    on_filled: Vec::new(),
                    on_canceled: Vec::new(),
                    listener: None,
                }),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Exchange order id; `None` for a faulted order
    pub fn id(&self) -> Option<OrderId> {
        self.inner.id
    }

    pub fn market(&self) -> &Arc<Market> {
        &self.inner.market
    }

    pub fn kind(&self) -> OrderKind {
        self.inner.kind
    }

    pub fn side(&self) -> Side {
        self.inner.side
    }

    /// Submitted (quantized) price; `None` for market orders
    pub fn target_price(&self) -> Option<Decimal> {
        self.inner.target_price
    }

    pub fn target_quantity(&self) -> Decimal {
        self.inner.target_quantity
    }

    pub fn state(&self) -> OrderState {
        self.inner.progress.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn executed_quantity(&self) -> Decimal {
        self.inner.progress.lock().executed_quantity
    }

    pub fn avg_fill_price(&self) -> Decimal {
        self.inner.progress.lock().avg_fill_price
    }

    /// Run `callback` once the order is filled, or right away if it already is
    pub fn when_filled<F>(&self, callback: F)
    where
        F: FnOnce(&Order) + Send + 'static,
    {
        let mut progress = self.inner.progress.lock();
        let state = progress.state;
        match state {
            OrderState::Open => progress.on_filled.push(Box::new(callback)),
            OrderState::Filled => {
                drop(progress);
                callback(self);
            }
            OrderState::Canceled | OrderState::Faulted => {}
        }
    }

    /// Run `callback` once the order is canceled, or right away if it already is
    pub fn when_canceled<F>(&self, callback: F)
    where
        F: FnOnce(&Order) + Send + 'static,
    {
        let mut progress = self.inner.progress.lock();
        let state = progress.state;
        match state {
            OrderState::Open => progress.on_canceled.push(Box::new(callback)),
            OrderState::Canceled => {
                drop(progress);
                callback(self);
            }
            OrderState::Filled | OrderState::Faulted => {}
        }
    }

    /// Cancel the order. No-op unless it is Open.
    ///
    /// The order counts as Canceled from the moment this is called. The
    /// exchange request is retried per the market's cancel policy while the
    /// exchange is unreachable; a rejection is not retried. Cancel callbacks
    /// fire whether or not the exchange confirmed it.
    pub async fn cancel(&self) {
        self.cancel_within(None).await;
    }

    /// Best-effort cancel whose exchange requests are bounded by the
    /// configured close timeout, then stop background polling. Call this
    /// before letting go of an order.
    pub async fn close(&self) {
        self.cancel_within(Some(self.inner.settings.close_timeout)).await;
        if let Some(poller) = self.inner.poller.lock().take() {
            poller.abort();
        }
    }

    async fn cancel_within(&self, limit: Option<Duration>) {
        let Some(id) = self.mark_canceled() else {
            return;
        };
        let descriptor = self.inner.market.descriptor();

        let outcome = match limit {
            Some(limit) => match timeout(limit, self.request_cancel(id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(order_id = id, market = %descriptor, "Cancel request timed out");
                    CancelOutcome::Unreachable
                }
            },
            None => self.request_cancel(id).await,
        };

        match outcome {
            CancelOutcome::Canceled => info!(order_id = id, market = %descriptor, "Order canceled"),
            CancelOutcome::Rejected => warn!(order_id = id, market = %descriptor, "Cancel rejected by exchange"),
            CancelOutcome::Unreachable => {
                warn!(order_id = id, market = %descriptor, "Cancel not confirmed by exchange")
            }
        }

        let settled = self.inner.progress.lock().settle(OrderState::Canceled);
        self.complete(settled);
    }

    /// Move an Open order to Canceled. Returns its id if this call did so.
    fn mark_canceled(&self) -> Option<OrderId> {
        let id = self.inner.id?;
        let mut progress = self.inner.progress.lock();
        if progress.state != OrderState::Open {
            return None;
        }
        progress.state = OrderState::Canceled;
        Some(id)
    }

    /// Send the cancel, retrying while the exchange is unreachable. Returns
    /// the last outcome.
    async fn request_cancel(&self, id: OrderId) -> CancelOutcome {
        let client = self.inner.market.client();
        let descriptor = self.inner.market.descriptor();
        let last = Mutex::new(CancelOutcome::Unreachable);
        let last_ref = &last;

        self.inner
            .settings
            .cancel_retry
            .run(move || async move {
                let outcome = client.cancel_order(descriptor, id).await;
                *last_ref.lock() = outcome;
                outcome == CancelOutcome::Unreachable
            })
            .await;

        last.into_inner()
    }

    fn on_trade(&self, update: &TradeUpdate) {
        let Some(id) = self.inner.id else {
            return;
        };
        if !update.involves(id) {
            return;
        }

        let target = self.inner.target_quantity;
        let settled = {
            let mut progress = self.inner.progress.lock();
            if progress.state != OrderState::Open {
                return;
            }

            progress.executed_quantity += update.quantity;
            // Weighted against the requested quantity, exact only when the
            // fills add up to exactly `target`
            if !target.is_zero() {
                progress.avg_fill_price += update.price * (update.quantity / target);
            }
            debug!(
                order_id = id,
                executed = %progress.executed_quantity,
                target = %target,
                "Order fill from stream"
            );

            if progress.executed_quantity >= target {
                Some(progress.settle(OrderState::Filled))
            } else {
                None
            }
        };

        if let Some(settled) = settled {
            info!(order_id = id, avg_price = %self.avg_fill_price(), "Order filled");
            self.complete(settled);
        }
    }

    /// Apply an authoritative snapshot from the exchange
    fn reconcile(&self, snapshot: OrderDto) {
        let settled = {
            let mut progress = self.inner.progress.lock();
            if progress.state != OrderState::Open {
                return;
            }

            if snapshot.executed_quantity >= progress.executed_quantity {
                progress.executed_quantity = snapshot.executed_quantity;
                progress.avg_fill_price = snapshot.avg_fill_price();
            }

            match snapshot.status {
                OrderStatus::Filled => Some(progress.settle(OrderState::Filled)),
                OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::ExpiredInMatch => Some(progress.settle(OrderState::Canceled)),
                OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::PendingCancel => None,
            }
        };

        if let Some(settled) = settled {
            info!(order_id = snapshot.id, status = ?snapshot.status, "Order settled by exchange snapshot");
            self.complete(settled);
        }
    }

    fn complete(&self, settled: Settled) {
        if let Some(listener) = settled.listener {
            self.inner.market.unregister_trade_listener(listener);
        }
        for callback in settled.callbacks {
            callback(self);
        }
    }
}

/// Poll the exchange for the order's state until it is terminal or released
fn spawn_poller(order: Weak<OrderInner>, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;

            let Some(inner) = order.upgrade() else {
                break;
            };
            let order = Order { inner };
            let Some(id) = order.id() else {
                break;
            };
            if order.is_terminal() {
                break;
            }

            let market = order.market();
            match market.client().get_order(market.descriptor(), id).await {
                Some(snapshot) => order.reconcile(snapshot),
                None => debug!(order_id = id, "Order poll returned nothing"),
            }

            if order.is_terminal() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::exchange::MockExchangeClient;
    use crate::retry::RetryPolicy;
    use rust_decimal_macros::dec;

    const ORDER_ID: u64 = 7;

    fn settings() -> OrderSettings {
        OrderSettings {
            poll_interval: Duration::from_secs(3600),
            cancel_retry: RetryPolicy::new(Duration::from_millis(10), 5),
            close_timeout: Duration::from_secs(1),
        }
    }

    fn placing(client: &mut MockExchangeClient) {
        client
            .expect_create_limit_order()
            .returning(|_, _, _, _| Some(dto(ORDER_ID, OrderStatus::New, dec!(0), dec!(0))));
    }

    fn fill(price: Decimal, quantity: Decimal) -> TradeUpdate {
        TradeUpdate {
            buy_order_id: Some(ORDER_ID),
            ..trade(price, quantity)
        }
    }

    fn recorder() -> (Arc<Mutex<u32>>, impl Fn() -> Box<dyn FnOnce(&Order) + Send>) {
        let calls = Arc::new(Mutex::new(0u32));
        let c = calls.clone();
        (calls, move || {
            let c = c.clone();
            Box::new(move |_: &Order| *c.lock() += 1)
        })
    }

    #[tokio::test]
    async fn test_stream_fills_complete_order_exactly_once() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(2)).await;

        let (fills, callback) = recorder();
        order.when_filled(callback());

        let mut last = order.executed_quantity();
        for update in [fill(dec!(100), dec!(0.5)), trade(dec!(100), dec!(5)), fill(dec!(102), dec!(0.5))] {
            market.update(&update);
            assert!(order.executed_quantity() >= last);
            last = order.executed_quantity();
        }
        assert_eq!(order.state(), OrderState::Open);
        assert_eq!(order.executed_quantity(), dec!(1));

        market.update(&fill(dec!(101), dec!(1)));
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(*fills.lock(), 1);
        // 100 * 0.25 + 102 * 0.25 + 101 * 0.5
        assert_eq!(order.avg_fill_price(), dec!(101));
        assert_eq!(market.trade_listener_count(), 0);

        order.on_trade(&fill(dec!(99), dec!(1)));
        assert_eq!(order.executed_quantity(), dec!(2));
        assert_eq!(*fills.lock(), 1);

        order.when_filled(callback());
        assert_eq!(*fills.lock(), 2);
    }

    #[tokio::test]
    async fn test_sell_side_fill_matches_seller_id() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Sell, dec!(100), dec!(1)).await;

        market.update(&TradeUpdate {
            sell_order_id: Some(ORDER_ID),
            ..trade(dec!(100), dec!(1.5))
        });
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.executed_quantity(), dec!(1.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_retries_and_fires_callbacks_once() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        let mut attempts = 0;
        client.expect_cancel_order().times(3).returning(move |_, id| {
            assert_eq!(id, ORDER_ID);
            attempts += 1;
            if attempts == 3 {
                CancelOutcome::Canceled
            } else {
                CancelOutcome::Unreachable
            }
        });
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        let (cancels, callback) = recorder();
        let (fills, fill_callback) = recorder();
        order.when_canceled(callback());
        order.when_filled(fill_callback());

        order.cancel().await;
        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(*cancels.lock(), 1);
        assert_eq!(market.trade_listener_count(), 0);

        order.cancel().await;
        market.update(&fill(dec!(100), dec!(1)));
        assert_eq!(*cancels.lock(), 1);
        assert_eq!(*fills.lock(), 0);
        assert_eq!(order.executed_quantity(), dec!(0));

        order.when_canceled(callback());
        assert_eq!(*cancels.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_fires_callbacks_even_when_exchange_never_confirms() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client
            .expect_cancel_order()
            .times(5)
            .returning(|_, _| CancelOutcome::Unreachable);
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        let (cancels, callback) = recorder();
        order.when_canceled(callback());
        order.cancel().await;

        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(*cancels.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rejection_is_not_retried() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client
            .expect_cancel_order()
            .times(1)
            .returning(|_, _| CancelOutcome::Rejected);
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        let (cancels, callback) = recorder();
        order.when_canceled(callback());
        order.cancel().await;

        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(*cancels.lock(), 1);
        assert_eq!(market.trade_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_fill_is_noop() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client.expect_cancel_order().never();
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        market.update(&fill(dec!(100), dec!(1)));
        order.cancel().await;
        assert_eq!(order.state(), OrderState::Filled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reconciles_missed_fill() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client
            .expect_get_order()
            .returning(|_, id| Some(dto(id, OrderStatus::Filled, dec!(2), dec!(205))));
        let market = market_with(
            client,
            OrderSettings {
                poll_interval: Duration::from_secs(1),
                ..settings()
            },
        );
        let order = market.create_limit_order(Side::Buy, dec!(103), dec!(2)).await;

        let (fills, callback) = recorder();
        order.when_filled(callback());
        market.update(&fill(dec!(102), dec!(0.5)));

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.executed_quantity(), dec!(2));
        assert_eq!(order.avg_fill_price(), dec!(102.5));
        assert_eq!(*fills.lock(), 1);
        assert_eq!(market.trade_listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reports_external_cancel() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client
            .expect_get_order()
            .returning(|_, id| Some(dto(id, OrderStatus::Canceled, dec!(0), dec!(0))));
        client.expect_cancel_order().never();
        let market = market_with(
            client,
            OrderSettings {
                poll_interval: Duration::from_secs(1),
                ..settings()
            },
        );
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        let (cancels, callback) = recorder();
        order.when_canceled(callback());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(*cancels.lock(), 1);
    }

    #[tokio::test]
    async fn test_immediately_filled_market_order() {
        let mut client = MockExchangeClient::new();
        client
            .expect_create_market_order()
            .returning(|_, _, _| Some(dto(ORDER_ID, OrderStatus::Filled, dec!(1), dec!(100))));
        let market = market_with(client, settings());

        let order = market.create_market_order(Side::Buy, dec!(1)).await;
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.avg_fill_price(), dec!(100));
        assert_eq!(market.trade_listener_count(), 0);

        let (fills, callback) = recorder();
        order.when_filled(callback());
        assert_eq!(*fills.lock(), 1);
    }

    #[tokio::test]
    async fn test_faulted_order_is_inert() {
        let mut client = MockExchangeClient::new();
        client.expect_create_limit_order().returning(|_, _, _, _| None);
        client.expect_cancel_order().never();
        let market = market_with(client, settings());

        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;
        let (calls, callback) = recorder();
        order.when_filled(callback());
        order.when_canceled(callback());
        order.cancel().await;

        assert_eq!(order.state(), OrderState::Faulted);
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_close_cancels_open_order() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client
            .expect_cancel_order()
            .times(1)
            .returning(|_, _| CancelOutcome::Canceled);
        let market = market_with(client, settings());
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        order.close().await;
        assert_eq!(order.state(), OrderState::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_settles_when_retries_outlast_timeout() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        client
            .expect_cancel_order()
            .returning(|_, _| CancelOutcome::Unreachable);
        let market = market_with(
            client,
            OrderSettings {
                cancel_retry: RetryPolicy::new(Duration::from_millis(500), 5),
                close_timeout: Duration::from_secs(5),
                ..settings()
            },
        );
        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;

        let (cancels, callback) = recorder();
        order.when_canceled(callback());

        let started = Instant::now();
        order.close().await;

        // 0.5 + 1 + 2 + 4 s of backoff would exceed the 5 s bound
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(*cancels.lock(), 1);
        assert_eq!(market.trade_listener_count(), 0);
        assert!(order.inner.poller.lock().is_none());
    }

    #[tokio::test]
    async fn test_releasing_order_unregisters_listener() {
        let mut client = MockExchangeClient::new();
        placing(&mut client);
        let market = market_with(client, settings());

        let order = market.create_limit_order(Side::Buy, dec!(100), dec!(1)).await;
        assert_eq!(market.trade_listener_count(), 1);
        drop(order);
        assert_eq!(market.trade_listener_count(), 0);
    }
}
