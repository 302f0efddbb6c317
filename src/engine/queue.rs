//! Shared update queue: unbounded FIFO plus a counting semaphore
//!
//! Producers push and then release exactly one permit; the single consumer
//! takes one permit per update. Arrival order in the deque is the dispatch
//! order across every market.

use parking_lot::Mutex;
use prometheus::IntGauge;
use std::collections::VecDeque;
use tokio::sync::Semaphore;

use crate::types::TradeUpdate;

pub struct UpdateQueue {
    updates: Mutex<VecDeque<TradeUpdate>>,
    ready: Semaphore,
    depth: IntGauge,
}

impl UpdateQueue {
    pub fn new(depth: IntGauge) -> Self {
        Self {
            updates: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0),
            depth,
        }
    }

    pub fn push(&self, update: TradeUpdate) {
        {
            let mut updates = self.updates.lock();
            updates.push_back(update);
            self.depth.set(updates.len() as i64);
        }
        self.ready.add_permits(1);
    }

    /// Wait for and remove the oldest update
    pub async fn pop(&self) -> Option<TradeUpdate> {
        let permit = self.ready.acquire().await.ok()?;
        permit.forget();

        let mut updates = self.updates.lock();
        let update = updates.pop_front();
        self.depth.set(updates.len() as i64);
        update
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
