//! ORPflow Trader - exchange client and dispatch engine
//!
//! This crate connects to Binance, keeps live per-market price state from the
//! trade stream, and tracks orders placed through the signed REST API until
//! they are filled or canceled.

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod market;
pub mod metrics;
pub mod parser;
pub mod retry;
pub mod types;
pub mod websocket;

pub use config::Config;
pub use engine::{Engine, EngineSettings};
pub use error::{ExchangeError, Result};
pub use exchange::{BinanceClient, ExchangeClient};
pub use market::{Market, Order, OrderSettings, OrderState};
pub use metrics::EngineMetrics;
pub use parser::ParsedMessage;
pub use retry::RetryPolicy;
pub use types::{
    Balance, CancelOutcome, MarketDescriptor, OrderDto, OrderId, OrderStatus, Side, Symbol,
    TradeUpdate,
};
