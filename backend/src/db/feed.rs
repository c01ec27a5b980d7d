use tokio::sync::broadcast;

use crate::models::ChangeEvent;

/// Fan-out of committed writes to every live subscription.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is the normal idle state, not an error.
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!("No subscribers for {:?} change", event.collection());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
