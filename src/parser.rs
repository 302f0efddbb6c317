//! Parser module for Binance stream frames
//!
//! Handles deserialization of trade events and subscription control replies.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Binance trade event
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Exchange symbol, e.g. "BTCUSDT"
    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "t")]
    pub trade_id: u64,

    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,

    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,

    /// Buyer order ID; no longer sent by every deployment of the feed
    #[serde(rename = "b", default)]
    pub buyer_order_id: Option<u64>,

    /// Seller order ID
    #[serde(rename = "a", default)]
    pub seller_order_id: Option<u64>,

    #[serde(rename = "T")]
    pub trade_time: u64,

    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Reply to a SUBSCRIBE/UNSUBSCRIBE request
#[derive(Debug, Clone, Deserialize)]
pub struct ControlReply {
    pub result: Option<serde_json::Value>,
    pub id: u64,
}

/// Error reply to a control request
#[derive(Debug, Clone, Deserialize)]
pub struct ControlError {
    pub error: ErrorBody,
    pub id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// Parsed stream frame
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Trade(TradeEvent),
    Reply(ControlReply),
    Error(ControlError),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw stream frame
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        // Combined streams wrap the payload
        if value.get("stream").is_some() && value.get("data").is_some() {
            let wrapped: StreamMessage = serde_json::from_value(value)?;
            return Self::from_value(wrapped.data);
        }

        Self::from_value(value)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.get("e").and_then(|e| e.as_str()) == Some("trade") {
            return Ok(ParsedMessage::Trade(serde_json::from_value(value)?));
        }
        if value.get("error").is_some() {
            return Ok(ParsedMessage::Error(serde_json::from_value(value)?));
        }
        if value.get("result").is_some() && value.get("id").is_some() {
            return Ok(ParsedMessage::Reply(serde_json::from_value(value)?));
        }

        Ok(ParsedMessage::Unknown(value.to_string()))
    }
}

/// Build the control frame subscribing to the trade channel of each symbol
pub fn subscribe_frame<'a>(symbols: impl IntoIterator<Item = &'a str>, id: u64) -> String {
    let params: Vec<String> = symbols
        .into_iter()
        .map(|s| format!("{}@trade", s.to_lowercase()))
        .collect();

    serde_json::json!({
        "method": "SUBSCRIBE",
        "params": params,
        "id": id,
    })
    .to_string()
}
