//! WebSocket module for stream subscriptions
//!
//! `Connector`/`Connection` is the transport seam: the tungstenite client
//! implements it for real sockets, tests implement it with scripted frames.

mod client;
mod socket;
mod subscription;

pub use client::{WebSocketClient, WebSocketConnector};
pub use socket::StreamSocket;
pub use subscription::{Decoder, Delivery, Subscription};

use async_trait::async_trait;

use crate::error::Result;

/// Opens fresh connections to one endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Endpoint description for logs
    fn endpoint(&self) -> &str;
}

/// One live duplex connection
#[async_trait]
pub trait Connection: Send {
    /// Next text message. `Ok(None)` for control traffic (ping/pong) that
    /// carries no payload; `Err` once the connection is unusable.
    async fn recv(&mut self) -> Result<Option<String>>;

    async fn send(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
