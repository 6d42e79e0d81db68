//! Publish/subscribe fan-out for patrol lifecycle [`Event`]s.
//!
//! Backed by one [`tokio::sync::broadcast`] channel: each subscriber gets its
//! own copy of every event, and a subscriber that falls behind loses the
//! oldest events rather than stalling the publisher.

use patrol_types::{Event, EventPayload, PatrolError};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Per-subscriber backlog before the oldest events are dropped.
const BACKLOG: usize = 256;

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(backlog: usize) -> Self {
        Self {
            tx: broadcast::channel(backlog).0,
        }
    }

    /// Hand `event` to every subscriber.
    ///
    /// # Errors
    ///
    /// [`PatrolError::Channel`] when there is no subscriber at all.
    pub fn publish(&self, event: Event) -> Result<usize, PatrolError> {
        self.tx
            .send(event)
            .map_err(|_| PatrolError::Channel("no event bus subscribers".to_string()))
    }

    /// Best-effort [`publish`][Self::publish].
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Raw receiver; the caller deals with lag.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Receiver that only yields events whose payload satisfies `accept`,
    /// and skips over lag.
    pub fn subscribe_where(&self, accept: fn(&EventPayload) -> bool) -> FilteredSubscriber {
        FilteredSubscriber {
            accept,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BACKLOG)
    }
}

pub struct FilteredSubscriber {
    accept: fn(&EventPayload) -> bool,
    rx: broadcast::Receiver<Event>,
}

impl FilteredSubscriber {
    /// Next accepted event, or `None` once every [`EventBus`] clone is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.accept)(&event.payload) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "event subscriber fell behind"),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patrol_types::Waypoint;
    use std::time::Duration;

    const SOURCE: &str = "patrol-runtime::patrol_loop";

    fn rejected(waypoint_index: usize) -> Event {
        Event::new(SOURCE, EventPayload::GoalRejected { waypoint_index })
    }

    fn sent(waypoint_index: usize) -> Event {
        Event::new(
            SOURCE,
            EventPayload::GoalSent {
                waypoint_index,
                waypoint: Waypoint::new(0.0, 0.0, 0.0),
                deadline: Duration::from_secs(12),
            },
        )
    }

    fn is_rejection(payload: &EventPayload) -> bool {
        matches!(payload, EventPayload::GoalRejected { .. })
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = rejected(3);
        assert_eq!(bus.publish(event.clone())?, 2);

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn filtered_subscriber_skips_other_payloads() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rejections = bus.subscribe_where(is_rejection);

        bus.publish(sent(0))?;
        bus.publish(rejected(1))?;

        let event = rejections.recv().await.ok_or("bus closed")?;
        assert!(matches!(
            event.payload,
            EventPayload::GoalRejected { waypoint_index: 1 }
        ));
        Ok(())
    }

    #[test]
    fn publish_needs_a_listener_but_emit_does_not() {
        let bus = EventBus::default();
        assert!(matches!(bus.publish(rejected(0)), Err(PatrolError::Channel(_))));
        bus.emit(rejected(0));
    }

    #[tokio::test]
    async fn lagging_raw_receiver_sees_lagged() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        (0..50).for_each(|i| bus.emit(sent(i)));
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn filtered_subscriber_recovers_from_lag() {
        let bus = EventBus::new(4);
        let mut rejections = bus.subscribe_where(is_rejection);
        (0..20).for_each(|i| bus.emit(rejected(i)));
        let event = rejections.recv().await;
        assert!(matches!(
            event.map(|e| e.payload),
            Some(EventPayload::GoalRejected { waypoint_index: 16 })
        ));
    }

    #[tokio::test]
    async fn filtered_subscriber_ends_when_bus_is_dropped() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_where(is_rejection);
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
