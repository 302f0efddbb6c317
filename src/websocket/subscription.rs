//! A stream subscription: socket plus frame decoder

use std::sync::Arc;

use super::StreamSocket;
use crate::types::{MarketDescriptor, TradeUpdate};

/// Maps one raw frame to a trade update; `None` for frames that carry none
pub type Decoder = Arc<dyn Fn(&str) -> Option<TradeUpdate> + Send + Sync>;

/// Outcome of waiting on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Update(TradeUpdate),
    /// A frame arrived but decoded to nothing (control reply, other event)
    Skipped,
    /// The transport failed; the next call reconnects
    Disconnected,
}

pub struct Subscription {
    socket: StreamSocket,
    markets: Vec<MarketDescriptor>,
    decoder: Decoder,
}

impl Subscription {
    pub fn new(socket: StreamSocket, markets: Vec<MarketDescriptor>, decoder: Decoder) -> Self {
        Self {
            socket,
            markets,
            decoder,
        }
    }

    /// Markets covered by this subscription
    pub fn markets(&self) -> &[MarketDescriptor] {
        &self.markets
    }

    pub async fn next(&mut self) -> Delivery {
        match self.socket.next_message().await {
            Some(raw) => match (self.decoder)(&raw) {
                Some(update) => Delivery::Update(update),
                None => Delivery::Skipped,
            },
            None => Delivery::Disconnected,
        }
    }

    pub async fn close(&mut self) {
        self.socket.disconnect().await;
    }
}
