//! Engine: market registry, batched stream subscriptions and the dispatch loop
//!
//! Every subscription batch gets its own receive task that decodes frames and
//! pushes updates onto one shared [`UpdateQueue`]. A single dispatch loop
//! drains that queue in arrival order and hands each update to its market, so
//! listeners never run concurrently with each other.

mod queue;

pub use queue::UpdateQueue;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExchangeError, Result};
use crate::exchange::ExchangeClient;
use crate::market::{Market, OrderSettings};
use crate::metrics::EngineMetrics;
use crate::types::{MarketKey, Symbol, TradeUpdate};
use crate::websocket::{Delivery, Subscription};

/// Cap on the exponent used for reconnect backoff
const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Handed to every market the engine creates
    pub order: OrderSettings,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// How long shutdown waits for each receive task
    pub shutdown_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            order: OrderSettings::default(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Engine {
    client: Arc<dyn ExchangeClient>,
    settings: EngineSettings,
    markets: RwLock<HashMap<MarketKey, Arc<Market>>>,
    queue: Arc<UpdateQueue>,
    receivers: Mutex<Vec<JoinHandle<()>>>,
    /// Watched by every receive task; cancelled when the dispatch loop exits
    shutdown: CancellationToken,
    metrics: EngineMetrics,
}

impl Engine {
    pub fn new(client: Arc<dyn ExchangeClient>, settings: EngineSettings, metrics: EngineMetrics) -> Self {
        Self {
            client,
            settings,
            markets: RwLock::new(HashMap::new()),
            queue: Arc::new(UpdateQueue::new(metrics.queue_depth.clone())),
            receivers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            metrics,
        }
    }

    pub fn client(&self) -> &Arc<dyn ExchangeClient> {
        &self.client
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Fetch the exchange's markets and register any not yet known.
    ///
    /// Existing markets keep their identity (and listeners). A failed fetch
    /// leaves the registry untouched. Returns every registered market.
    pub async fn discover_markets(&self) -> Vec<Arc<Market>> {
        let descriptors = self.client.fetch_markets().await;
        let fetched = descriptors.len();

        let mut markets = self.markets.write();
        for descriptor in descriptors {
            markets.entry(descriptor.key()).or_insert_with(|| {
                Arc::new(Market::new(descriptor, self.client.clone(), self.settings.order))
            });
        }

        info!(fetched, registered = markets.len(), "Markets discovered");
        markets.values().cloned().collect()
    }

    pub fn market(&self, asset: &Symbol, quote: &Symbol) -> Option<Arc<Market>> {
        self.markets.read().get(&(asset.clone(), quote.clone())).cloned()
    }

    pub fn markets(&self) -> Vec<Arc<Market>> {
        self.markets.read().values().cloned().collect()
    }

    /// Updates waiting for the dispatch loop
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Open trade streams for `markets`, split into batches of at most
    /// `max_markets_per_stream`, each served by its own receive task.
    ///
    /// Markets not yet in the registry are added so their updates dispatch.
    /// Returns the number of streams opened. An engine runs once: after
    /// [`Engine::run`] or [`Engine::shutdown`] this fails with
    /// [`ExchangeError::EngineStopped`].
    pub async fn subscribe(&self, markets: &[Arc<Market>]) -> Result<usize> {
        if self.shutdown.is_cancelled() {
            return Err(ExchangeError::EngineStopped);
        }
        if markets.is_empty() {
            return Ok(0);
        }

        {
            let mut registry = self.markets.write();
            for market in markets {
                registry
                    .entry(market.descriptor().key())
                    .or_insert_with(|| market.clone());
            }
        }

        let batch_size = self.client.max_markets_per_stream().max(1);
        let mut opened = 0;

        for batch in markets.chunks(batch_size) {
            let descriptors: Vec<_> = batch.iter().map(|m| m.descriptor().clone()).collect();
            let subscription = self.client.get_stream(&descriptors).await?;

            info!(markets = descriptors.len(), "Stream subscribed");
            let handle = tokio::spawn(receive_loop(
                subscription,
                self.queue.clone(),
                self.shutdown.child_token(),
                self.metrics.clone(),
                self.settings,
            ));
            self.receivers.lock().push(handle);
            opened += 1;
        }

        Ok(opened)
    }

    /// Drain the update queue until `cancel` fires, then stop every receive
    /// task.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(markets = self.markets.read().len(), "Dispatch loop started");

        loop {
            let update = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = self.queue.pop() => update,
            };

            match update {
                Some(update) => self.dispatch(&update),
                None => break,
            }
        }

        info!(pending = self.queue.len(), "Dispatch loop stopping");
        self.shutdown().await;
    }

    /// Cancel every receive task and wait, bounded, for each to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let receivers = std::mem::take(&mut *self.receivers.lock());
        for handle in receivers {
            let abort = handle.abort_handle();
            if timeout(self.settings.shutdown_timeout, handle).await.is_err() {
                warn!("Receive task did not stop in time, aborting");
                abort.abort();
            }
        }
    }

    fn dispatch(&self, update: &TradeUpdate) {
        let market = self.markets.read().get(&update.key()).cloned();

        let Some(market) = market else {
            self.metrics.dropped.inc();
            debug!(asset = %update.asset, quote = %update.quote, "Update for unknown market dropped");
            return;
        };

        let failures = market.update(update);
        self.metrics.dispatched.inc();
        if failures > 0 {
            self.metrics.listener_failures.inc_by(failures as u64);
        }
    }
}

async fn receive_loop(
    mut subscription: Subscription,
    queue: Arc<UpdateQueue>,
    shutdown: CancellationToken,
    metrics: EngineMetrics,
    settings: EngineSettings,
) {
    let mut failures: u32 = 0;

    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = subscription.next() => delivery,
        };

        match delivery {
            Delivery::Update(update) => {
                failures = 0;
                queue.push(update);
            }
            Delivery::Skipped => failures = 0,
            Delivery::Disconnected => {
                failures += 1;
                metrics.stream_disconnects.inc();

                let delay = reconnect_backoff(settings.reconnect_delay, settings.max_reconnect_delay, failures);
                warn!(
                    markets = subscription.markets().len(),
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Stream disconnected, reconnecting"
                );

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
        }
    }

    subscription.close().await;
    debug!(markets = subscription.markets().len(), "Receive task stopped");
}

/// Delay before reconnect attempt `attempt` (1-based): doubles per attempt,
/// capped at `max`.
fn reconnect_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(2u32.pow(exponent)).min(max)
}
