//! Reconnecting message socket
//!
//! Every transport failure is reported through the return value and the
//! connection is dropped; the next read reconnects and replays the greeting
//! frames, so subscriptions survive reconnects.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Connection, Connector};

/// Default bound on a graceful close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct StreamSocket {
    connector: Arc<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
    greetings: Vec<String>,
    close_timeout: Duration,
}

impl StreamSocket {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connection: None,
            greetings: Vec::new(),
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    /// Frame sent on every fresh connection, e.g. a subscribe request
    pub fn with_greeting(mut self, frame: String) -> Self {
        self.greetings.push(frame);
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect if not already connected. Returns whether a connection is open.
    pub async fn connect(&mut self) -> bool {
        if self.connection.is_some() {
            return true;
        }

        let mut connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(endpoint = %self.connector.endpoint(), error = %e, "Stream connection failed");
                return false;
            }
        };

        for frame in &self.greetings {
            if let Err(e) = connection.send(frame.clone()).await {
                warn!(endpoint = %self.connector.endpoint(), error = %e, "Failed to send greeting frame");
                let _ = connection.close().await;
                return false;
            }
        }

        info!(endpoint = %self.connector.endpoint(), greetings = self.greetings.len(), "Stream connected");
        self.connection = Some(connection);
        true
    }

    /// Read the next text message, connecting first if needed.
    ///
    /// Returns `None` on any transport failure; the connection is dropped and
    /// the next call reconnects.
    pub async fn next_message(&mut self) -> Option<String> {
        if !self.connect().await {
            return None;
        }

        loop {
            let connection = self.connection.as_mut()?;
            match connection.recv().await {
                Ok(Some(text)) => return Some(text),
                Ok(None) => continue,
                Err(e) => {
                    warn!(endpoint = %self.connector.endpoint(), error = %e, "Stream read failed, dropping connection");
                    self.connection = None;
                    return None;
                }
            }
        }
    }

    /// Send a text frame on the current connection
    pub async fn send_message(&mut self, text: &str) -> bool {
        if !self.connect().await {
            return false;
        }
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };

        match connection.send(text.to_string()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(endpoint = %self.connector.endpoint(), error = %e, "Stream send failed, dropping connection");
                self.connection = None;
                false
            }
        }
    }

    /// Close the connection gracefully within the close timeout. Safe to
    /// call when already disconnected.
    pub async fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        match timeout(self.close_timeout, connection.close()).await {
            Ok(Ok(())) => debug!(endpoint = %self.connector.endpoint(), "Stream closed"),
            Ok(Err(e)) => debug!(endpoint = %self.connector.endpoint(), error = %e, "Stream close failed"),
            Err(_) => warn!(endpoint = %self.connector.endpoint(), "Stream close timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::testing::{ScriptedConnector, Step};

    #[tokio::test]
    async fn test_read_failure_reconnects_on_next_call() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![Step::Fail],
            vec![Step::Text("hello".to_string())],
        ]));
        let mut socket = StreamSocket::new(connector.clone());

        assert_eq!(socket.next_message().await, None);
        assert!(!socket.is_connected());

        assert_eq!(socket.next_message().await, Some("hello".to_string()));
        assert_eq!(*connector.connects.lock(), 2);
    }

    #[tokio::test]
    async fn test_greeting_is_replayed_on_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![Step::Fail],
            vec![Step::Text("a".to_string())],
        ]));
        let mut socket =
            StreamSocket::new(connector.clone()).with_greeting("subscribe".to_string());

        assert!(socket.connect().await);
        assert_eq!(socket.next_message().await, None);
        assert_eq!(socket.next_message().await, Some("a".to_string()));

        assert_eq!(*connector.sent.lock(), vec!["subscribe", "subscribe"]);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![]]));
        let mut socket = StreamSocket::new(connector.clone());

        assert!(socket.connect().await);
        assert!(socket.connect().await);
        assert_eq!(*connector.connects.lock(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_none() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let mut socket = StreamSocket::new(connector);

        assert_eq!(socket.next_message().await, None);
        assert!(!socket.send_message("ping").await);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_safe() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![]]));
        let mut socket = StreamSocket::new(connector);

        assert!(socket.connect().await);
        socket.disconnect().await;
        socket.disconnect().await;
        assert!(!socket.is_connected());
    }
}
