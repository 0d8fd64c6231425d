//! Run event bus.
//!
//! A thin fan-out over `tokio::sync::broadcast`: publishers never block and
//! never learn who is listening; events are value-copied so subscribers hold
//! no references into runner state. Per-run emission order is preserved by
//! the underlying channel.

use tokio::sync::broadcast;

use pk_domain::events::ArenaEvent;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ArenaEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A bus with no subscribers silently drops it.
    pub fn emit(&self, event: ArenaEvent) {
        let _ = self.tx.send(event);
    }
}
