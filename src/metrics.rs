//! Engine metrics

use prometheus::{IntCounter, IntGauge, Registry};

/// Counters and gauges for one engine. Created unregistered; call
/// [`EngineMetrics::register`] to expose them.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    /// Updates waiting for the dispatch loop
    pub queue_depth: IntGauge,
    pub dispatched: IntCounter,
    /// Updates for markets the engine does not know
    pub dropped: IntCounter,
    pub listener_failures: IntCounter,
    pub stream_disconnects: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            queue_depth: IntGauge::new("engine_queue_depth", "Trade updates waiting for dispatch")?,
            dispatched: IntCounter::new(
                "engine_updates_dispatched_total",
                "Trade updates dispatched to markets",
            )?,
            dropped: IntCounter::new("engine_updates_dropped_total", "Trade updates for unknown markets")?,
            listener_failures: IntCounter::new(
                "engine_listener_failures_total",
                "Market listeners that panicked",
            )?,
            stream_disconnects: IntCounter::new(
                "engine_stream_disconnects_total",
                "Stream subscription transport failures",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.queue_depth.clone()))?;
        registry.register(Box::new(self.dispatched.clone()))?;
        registry.register(Box::new(self.dropped.clone()))?;
        registry.register(Box::new(self.listener_failures.clone()))?;
        registry.register(Box::new(self.stream_disconnects.clone()))?;
        Ok(())
    }
}
