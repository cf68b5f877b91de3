use super::types::DiagnosisEvent;
use tokio::sync::broadcast;

/// Broadcast-based event bus for diagnosis events.
///
/// Slow subscribers miss events (lagged) rather than blocking the executor.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DiagnosisEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosisEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: DiagnosisEvent) -> usize {
        // no receivers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
