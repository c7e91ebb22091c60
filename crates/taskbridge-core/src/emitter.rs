//! Instance-scoped event fan-out.

use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast emitter owned by one runtime, adapter or bridge.
///
/// Clones share the same channel. Emitting with no subscribers is not an
/// error; slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventEmitter<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventEmitter<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Send `event` to current subscribers and return how many received it.
    pub fn emit(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let emitter: EventEmitter<u32> = EventEmitter::default();
        assert_eq!(emitter.emit(1), 0);
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let emitter: EventEmitter<&'static str> = EventEmitter::new(8);
        let mut rx = emitter.subscribe();
        let clone = emitter.clone();

        assert_eq!(clone.emit("hello"), 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert_eq!(emitter.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a: EventEmitter<u8> = EventEmitter::new(4);
        let b: EventEmitter<u8> = EventEmitter::new(4);
        let mut rx_b = b.subscribe();

        a.emit(1);
        assert!(rx_b.try_recv().is_err());
    }
}
