//! Error types for the exchange client and dispatch engine

use thiserror::Error;

/// Exchange and engine errors
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API rejected {endpoint} with status {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request signing error: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stream subscription needs between 1 and {max} markets, got {requested}")]
    InvalidSubscription { requested: usize, max: usize },

    #[error("Engine has shut down")]
    EngineStopped,
}

impl ExchangeError {
    /// Whether the failure came from the exchange answering with an error
    /// status, as opposed to the request never completing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ExchangeError::Rejected { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

impl From<config::ConfigError> for ExchangeError {
    fn from(err: config::ConfigError) -> Self {
        ExchangeError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(err: std::io::Error) -> Self {
        ExchangeError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
