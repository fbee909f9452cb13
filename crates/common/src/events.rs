//! Credential change notifications
//!
//! The auth session emits these whenever its token or endpoint changes so that
//! a persistence collaborator can write them to storage. Subscribers receive
//! events over flume channels; dropped receivers are pruned on the next emit.

use parking_lot::Mutex;

use crate::auth::{EndpointSet, Token};

/// Events emitted by the auth session
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// A new token was installed
    TokenChanged(Token),
    /// The token was invalidated
    TokenCleared,
    /// A new endpoint set was fetched
    EndpointChanged(EndpointSet),
    /// The endpoint set was invalidated
    EndpointCleared,
}

/// Fan-out of auth events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<flume::Sender<AuthEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> flume::Receiver<AuthEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn emit(&self, event: AuthEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.emit(AuthEvent::TokenCleared);

        assert_eq!(a.try_recv().unwrap(), AuthEvent::TokenCleared);
        assert_eq!(b.try_recv().unwrap(), AuthEvent::TokenCleared);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(AuthEvent::EndpointCleared);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), AuthEvent::EndpointCleared);
    }
}
