//! Binance spot binding of [`ExchangeClient`]
//!
//! REST calls go through [`BinanceClient::request`], which turns every
//! failure into an [`ExchangeError`]; the trait methods log those and degrade
//! to `None`/`false`. Exchange rejections are followed by a short fixed pause
//! so a caller retrying in a loop cannot hammer the API.

pub mod auth;
pub mod rest;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use self::auth::{Credentials, Signer};
use self::rest::{AccountInfo, ExchangeInfo, OrderResponse, ServerTime};
use super::ExchangeClient;
use crate::config::Config;
use crate::error::{ExchangeError, Result};
use crate::parser::{subscribe_frame, ParsedMessage};
use crate::types::{
    Balance, CancelOutcome, MarketDescriptor, MarketKey, OrderDto, OrderId, Side, TradeUpdate,
};
use crate::websocket::{Connector, Decoder, StreamSocket, Subscription, WebSocketConnector};

/// Exchange symbol string -> (asset, quote), rebuilt by every market fetch
type SymbolTable = Arc<RwLock<HashMap<String, MarketKey>>>;

pub struct BinanceClient {
    http: reqwest::Client,
    rest_endpoint: String,
    connector: Arc<dyn Connector>,
    signer: Signer,
    symbols: SymbolTable,
    max_markets_per_stream: usize,
    rejection_backoff: Duration,
    socket_close_timeout: Duration,
    clock_sync_interval: Duration,
}

impl BinanceClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            http,
            rest_endpoint: config.rest_endpoint.trim_end_matches('/').to_string(),
            connector: Arc::new(WebSocketConnector::new(&config.ws_endpoint)),
            signer: Signer::new(
                Credentials::new(config.api_key.clone(), config.api_secret.clone()),
                config.recv_window(),
            ),
            symbols: Arc::new(RwLock::new(HashMap::new())),
            max_markets_per_stream: config.max_markets_per_stream,
            rejection_backoff: config.rejection_backoff(),
            socket_close_timeout: config.socket_close_timeout(),
            clock_sync_interval: config.clock_sync_interval(),
        })
    }

    /// Replace the stream transport
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Current offset of the exchange clock against ours, in milliseconds
    pub fn clock_skew(&self) -> i64 {
        self.signer.clock_skew()
    }

    /// Refresh the clock skew on a fixed interval until `cancel` fires
    pub fn spawn_clock_sync(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let client = Arc::clone(self);
        let period = self.clock_sync_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        client.sync_clock().await;
                    }
                }
            }
            debug!("Clock sync stopped");
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let query = self.signer.query(params, signed)?;
        let url = if query.is_empty() {
            format!("{}{}", self.rest_endpoint, endpoint)
        } else {
            format!("{}{}?{}", self.rest_endpoint, endpoint, query)
        };

        let mut request = self.http.request(method, &url);
        if signed {
            request = request.header("X-MBX-APIKEY", self.signer.api_key());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// `request` with failures logged. A rejection is followed by the fixed
    /// throttle pause before it is returned.
    async fn attempt<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let result = self.request(method.clone(), endpoint, params, signed).await;
        if let Err(e) = &result {
            warn!(method = %method, endpoint = %endpoint, error = %e, "REST call failed");
            if e.is_rejection() {
                sleep(self.rejection_backoff).await;
            }
        }
        result
    }

    /// `attempt`, with the failure folded into `None`
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Option<T> {
        self.attempt(method, endpoint, params, signed).await.ok()
    }

    fn remember_markets(&self, markets: &[MarketDescriptor]) {
        let table = markets
            .iter()
            .map(|m| (m.symbol.to_uppercase(), m.key()))
            .collect();
        *self.symbols.write() = table;
    }

    fn decoder(&self) -> Decoder {
        let symbols = self.symbols.clone();
        Arc::new(move |raw: &str| decode_trade(&symbols, raw))
    }

    async fn place_order(
        &self,
        market: &MarketDescriptor,
        side: Side,
        mut params: Vec<(&str, String)>,
    ) -> Option<OrderDto> {
        let mut all = vec![
            ("symbol", market.symbol.clone()),
            ("side", side.as_str().to_string()),
        ];
        all.append(&mut params);
        all.push(("newOrderRespType", "RESULT".to_string()));

        let response: OrderResponse = self.call(Method::POST, "/order", &all, true).await?;
        info!(
            market = %market,
            side = %side,
            order_id = response.order_id,
            status = ?response.status,
            "Order placed"
        );
        Some(response.into())
    }
}

fn decode_trade(symbols: &RwLock<HashMap<String, MarketKey>>, raw: &str) -> Option<TradeUpdate> {
    match ParsedMessage::parse(raw) {
        Ok(ParsedMessage::Trade(trade)) => {
            let Some((asset, quote)) = symbols.read().get(&trade.symbol.to_uppercase()).cloned()
            else {
                debug!(symbol = %trade.symbol, "Trade for unknown symbol");
                return None;
            };
            Some(TradeUpdate {
                asset,
                quote,
                price: trade.price,
                quantity: trade.quantity,
                buy_order_id: trade.buyer_order_id,
                sell_order_id: trade.seller_order_id,
            })
        }
        Ok(ParsedMessage::Reply(reply)) => {
            debug!(id = reply.id, "Subscription acknowledged");
            None
        }
        Ok(ParsedMessage::Error(error)) => {
            warn!(code = error.error.code, msg = %error.error.msg, "Stream control request failed");
            None
        }
        Ok(ParsedMessage::Unknown(msg)) => {
            trace!(msg = %msg, "Unknown message type");
            None
        }
        Err(e) => {
            warn!(error = %e, "Dropping undecodable stream frame");
            None
        }
    }
}

fn decimal_param(value: Decimal) -> String {
    value.normalize().to_string()
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn fetch_markets(&self) -> Vec<MarketDescriptor> {
        let Some(info) = self
            .call::<ExchangeInfo>(Method::GET, "/exchangeInfo", &[], false)
            .await
        else {
            return Vec::new();
        };

        let skew = self.signer.record_server_time(info.server_time);
        let markets = info.descriptors();
        self.remember_markets(&markets);

        info!(
            markets = markets.len(),
            listed = info.symbols.len(),
            clock_skew_ms = skew,
            "Markets discovered"
        );
        markets
    }

    async fn create_limit_order(
        &self,
        market: &MarketDescriptor,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Option<OrderDto> {
        let params = vec![
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", decimal_param(quantity)),
            ("price", decimal_param(price)),
        ];
        self.place_order(market, side, params).await
    }

    async fn create_market_order(
        &self,
        market: &MarketDescriptor,
        side: Side,
        quantity: Decimal,
    ) -> Option<OrderDto> {
        let params = vec![
            ("type", "MARKET".to_string()),
            ("quantity", decimal_param(quantity)),
        ];
        self.place_order(market, side, params).await
    }

    async fn cancel_order(&self, market: &MarketDescriptor, id: OrderId) -> CancelOutcome {
        let params = [
            ("symbol", market.symbol.clone()),
            ("orderId", id.to_string()),
        ];
        match self
            .attempt::<OrderResponse>(Method::DELETE, "/order", &params, true)
            .await
        {
            Ok(_) => CancelOutcome::Canceled,
            Err(e) if e.is_rejection() => CancelOutcome::Rejected,
            Err(_) => CancelOutcome::Unreachable,
        }
    }

    async fn cancel_all_orders(&self, market: &MarketDescriptor) -> bool {
        let params = [("symbol", market.symbol.clone())];
        self.call::<serde_json::Value>(Method::DELETE, "/openOrders", &params, true)
            .await
            .is_some()
    }

    async fn get_order(&self, market: &MarketDescriptor, id: OrderId) -> Option<OrderDto> {
        let params = [
            ("symbol", market.symbol.clone()),
            ("orderId", id.to_string()),
        ];
        self.call::<OrderResponse>(Method::GET, "/order", &params, true)
            .await
            .map(OrderDto::from)
    }

    async fn balances(&self) -> Option<Vec<Balance>> {
        let account: AccountInfo = self.call(Method::GET, "/account", &[], true).await?;
        Some(account.balances.into_iter().map(Balance::from).collect())
    }

    async fn sync_clock(&self) -> bool {
        match self.call::<ServerTime>(Method::GET, "/time", &[], false).await {
            Some(time) => {
                let skew = self.signer.record_server_time(time.server_time);
                debug!(clock_skew_ms = skew, "Clock synchronized");
                true
            }
            None => false,
        }
    }

    async fn get_stream(&self, markets: &[MarketDescriptor]) -> Result<Subscription> {
        if markets.is_empty() || markets.len() > self.max_markets_per_stream {
            return Err(ExchangeError::InvalidSubscription {
                requested: markets.len(),
                max: self.max_markets_per_stream,
            });
        }

        let frame = subscribe_frame(markets.iter().map(|m| m.symbol.as_str()), 1);
        let mut socket = StreamSocket::new(self.connector.clone())
            .with_greeting(frame)
            .with_close_timeout(self.socket_close_timeout);

        if !socket.connect().await {
            warn!(markets = markets.len(), "Initial stream connection failed, will retry on read");
        }

        Ok(Subscription::new(socket, markets.to_vec(), self.decoder()))
    }

    fn max_markets_per_stream(&self) -> usize {
        self.max_markets_per_stream
    }
}
