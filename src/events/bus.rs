//! EventBus - fan-out of run events to observers
//!
//! Runners emit through a plain callback; the bus turns that callback into a
//! `tokio::sync::broadcast` channel so any number of observers can follow a
//! run without slowing it down. Emitting never blocks. Receivers that fall
//! behind lose the oldest events.

use super::AmplifyEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity for the event bus channel
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast channel for [`AmplifyEvent`]s
///
/// ```rust,ignore
/// use amplify::events::EventBus;
/// use amplify::core::RecursiveRunner;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
/// let runner = RecursiveRunner::new(&task).with_event_emitter(bus.emitter());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AmplifyEvent>>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create an EventBus with default capacity (1024)
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Emit an event to all subscribers; dropped if nobody listens
    pub fn emit(&self, event: AmplifyEvent) {
        let _ = self.sender.send(event);
    }

    /// Callback that emits onto this bus, for `RecursiveRunner::with_event_emitter`
    pub fn emitter(&self) -> Arc<dyn Fn(AmplifyEvent) + Send + Sync> {
        let bus = self.clone();
        Arc::new(move |event: AmplifyEvent| bus.emit(event))
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AmplifyEvent> {
        self.sender.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================
    // Construction Tests
    // ==========================================

    #[test]
    fn test_clone_shares_channel() {
        let bus1 = EventBus::new(100);
        let _rx1 = bus1.subscribe();

        let bus2 = bus1.clone();
        let _rx2 = bus2.subscribe();

        assert_eq!(bus1.subscriber_count(), 2);
        assert_eq!(bus2.subscriber_count(), 2);
    }

    #[test]
    fn test_subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        drop(rx2);
        assert_eq!(bus.subscriber_count(), 0);
    }

    // ==========================================
    // Emit Tests
    // ==========================================

    #[test]
    fn test_emit_without_subscribers_doesnt_panic() {
        let bus = EventBus::new(100);
        bus.emit(AmplifyEvent::run_started("iterate", 4));
    }

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(AmplifyEvent::round_dispatched("sat", 1, 8));
        bus.emit(AmplifyEvent::round_dispatched("sat", 2, 5));

        for rx in [&mut rx1, &mut rx2] {
            for expected in [8, 5] {
                match rx.recv().await.unwrap() {
                    AmplifyEvent::RoundDispatched { rows, .. } => assert_eq!(rows, expected),
                    _ => panic!("Wrong event type"),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_emitter_callback_feeds_bus() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let emit = bus.emitter();
        emit(AmplifyEvent::oracle_failed("iterate", 2, "timeout"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "OracleFailed");
    }

    #[tokio::test]
    async fn test_lagging_receiver_drops_oldest() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for round in 0..10 {
            bus.emit(AmplifyEvent::round_dispatched("iterate", round, 1));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
