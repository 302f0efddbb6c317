//! WebSocket client for Binance streams
//!
//! Handles connection and message reception over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::{Connection, Connector};
use crate::error::{ExchangeError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens tungstenite connections to a fixed endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        info!(url = %self.endpoint, "Connecting to Binance WebSocket");

        let (stream, response) = connect_async(&self.endpoint).await.map_err(|e| {
            ExchangeError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketClient { stream }))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// One open WebSocket connection
pub struct WebSocketClient {
    stream: WsStream,
}

#[async_trait]
impl Connection for WebSocketClient {
    async fn recv(&mut self) -> Result<Option<String>> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                Ok(Some(String::from_utf8_lossy(&data).to_string()))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                self.stream
                    .send(Message::Pong(data))
                    .await
                    .map_err(|e| ExchangeError::WebSocketMessage(e.to_string()))?;
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                Err(ExchangeError::WebSocketConnection(
                    "Connection closed".to_string(),
                ))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                Err(ExchangeError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                Err(ExchangeError::WebSocketConnection(
                    "Stream ended".to_string(),
                ))
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ExchangeError::WebSocketMessage(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}
