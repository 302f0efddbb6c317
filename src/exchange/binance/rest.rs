//! Binance REST payloads and their conversion to transfer records

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::types::{precision_of, Balance, MarketDescriptor, OrderDto, OrderStatus, Symbol};

const TRADING: &str = "TRADING";

/// `GET /time`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// `GET /exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub server_time: i64,
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Quantization filters; everything else the exchange lists is ignored
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: String },
    #[serde(other)]
    Other,
}

impl SymbolInfo {
    fn tick_size(&self) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::Price { tick_size } => Some(tick_size.as_str()),
            _ => None,
        })
    }

    fn step_size(&self) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::LotSize { step_size } => Some(step_size.as_str()),
            _ => None,
        })
    }

    /// Descriptor for this symbol, or `None` when it is not trading or a
    /// quantization filter is missing
    pub fn descriptor(&self) -> Option<MarketDescriptor> {
        if self.status != TRADING {
            debug!(symbol = %self.symbol, status = %self.status, "Skipping symbol not open for trading");
            return None;
        }

        let quote_precision = self.tick_size().and_then(precision_of);
        let asset_precision = self.step_size().and_then(precision_of);

        match (asset_precision, quote_precision) {
            (Some(asset_precision), Some(quote_precision)) => Some(MarketDescriptor {
                asset: Symbol::new(&self.base_asset),
                quote: Symbol::new(&self.quote_asset),
                symbol: self.symbol.to_uppercase(),
                asset_precision,
                quote_precision,
            }),
            _ => {
                debug!(symbol = %self.symbol, "Skipping symbol without quantization filters");
                None
            }
        }
    }
}

impl ExchangeInfo {
    pub fn descriptors(&self) -> Vec<MarketDescriptor> {
        self.symbols.iter().filter_map(SymbolInfo::descriptor).collect()
    }
}

/// `POST|GET|DELETE /order`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty", with = "rust_decimal::serde::str")]
    pub cumulative_quote_qty: Decimal,
}

impl From<OrderResponse> for OrderDto {
    fn from(response: OrderResponse) -> Self {
        OrderDto {
            id: response.order_id,
            status: response.status,
            executed_quantity: response.executed_qty,
            cumulative_quote_quantity: response.cumulative_quote_qty,
        }
    }
}

/// `GET /account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

impl From<AssetBalance> for Balance {
    fn from(balance: AssetBalance) -> Self {
        Balance {
            asset: Symbol::new(&balance.asset),
            free: balance.free,
            locked: balance.locked,
        }
    }
}
