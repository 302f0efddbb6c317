//! Configuration module for the exchange client and engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::market::OrderSettings;
use crate::retry::RetryPolicy;
use crate::types::Symbol;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// REST API root (e.g. "https://api.binance.com/api/v3")
    pub rest_endpoint: String,

    /// WebSocket endpoint for raw stream subscriptions
    pub ws_endpoint: String,

    /// API credentials, opaque to this crate
    pub api_key: String,
    pub api_secret: String,

    /// Markets to subscribe to, as "ASSET/QUOTE" pairs separated by commas
    pub markets: String,

    /// Tolerance the exchange allows between request timestamp and server time.
    /// Must stay larger than the drift expected over one clock sync interval.
    pub recv_window_ms: u64,
    pub clock_sync_interval_secs: u64,

    /// Order tracking
    pub order_poll_interval_secs: u64,
    pub cancel_retry_delay_ms: u64,
    pub cancel_max_attempts: u32,
    pub order_close_timeout_ms: u64,

    /// Stream batching and reconnection
    pub max_markets_per_stream: usize,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub socket_close_timeout_ms: u64,

    /// REST behaviour
    pub rejection_backoff_ms: u64,
    pub http_timeout_ms: u64,

    /// Bind address for the health/metrics server
    pub metrics_addr: String,
}

impl Config {
    /// Load configuration from `.env` and environment variables on top of defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::Environment::default())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse `markets` into (asset, quote) pairs, skipping malformed entries
    pub fn market_pairs(&self) -> Vec<(Symbol, Symbol)> {
        self.markets
            .split(',')
            .filter_map(|pair| {
                let (asset, quote) = pair.trim().split_once('/')?;
                if asset.trim().is_empty() || quote.trim().is_empty() {
                    return None;
                }
                Some((Symbol::new(asset.trim()), Symbol::new(quote.trim())))
            })
            .collect()
    }

    pub fn recv_window(&self) -> Duration {
        Duration::from_millis(self.recv_window_ms)
    }

    pub fn clock_sync_interval(&self) -> Duration {
        Duration::from_secs(self.clock_sync_interval_secs)
    }

    pub fn rejection_backoff(&self) -> Duration {
        Duration::from_millis(self.rejection_backoff_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn socket_close_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_close_timeout_ms)
    }

    /// Settings handed to every market for the orders it creates
    pub fn order_settings(&self) -> OrderSettings {
        OrderSettings {
            poll_interval: Duration::from_secs(self.order_poll_interval_secs),
            cancel_retry: RetryPolicy::new(
                Duration::from_millis(self.cancel_retry_delay_ms),
                self.cancel_max_attempts,
            ),
            close_timeout: Duration::from_millis(self.order_close_timeout_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            order: self.order_settings(),
            reconnect_delay: self.reconnect_delay(),
            max_reconnect_delay: self.max_reconnect_delay(),
            shutdown_timeout: self.socket_close_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rest_endpoint: "https://api.binance.com/api/v3".to_string(),
            ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            markets: "BTC/USDT".to_string(),
            recv_window_ms: 20_000,
            clock_sync_interval_secs: 60,
            order_poll_interval_secs: 120,
            cancel_retry_delay_ms: 500,
            cancel_max_attempts: 5,
            order_close_timeout_ms: 5_000,
            max_markets_per_stream: 200,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
            socket_close_timeout_ms: 5_000,
            rejection_backoff_ms: 1_000,
            http_timeout_ms: 10_000,
            metrics_addr: "0.0.0.0:9090".to_string(),
        }
    }
}
