//! Fan-out of public server events.
//!
//! Besides the live broadcast, the hub keeps the latest copy of selected events so a client
//! joining mid-encounter sees the boss state without waiting for the next tick.

use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Fan-out of server events plus the latest event of each retained kind.
pub struct EventHub {
    sender: broadcast::Sender<ServerEvent>,
    retained: RwLock<IndexMap<String, ServerEvent>>,
}

impl EventHub {
    /// Hub whose live channel buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            sender,
            retained: RwLock::new(IndexMap::new()),
        }
    }

    /// Live events from now on; retained ones come from `retained`.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send to every live subscriber and return how many there were.
    ///
    /// With `retain`, a named event also replaces the copy replayed to late subscribers.
    pub fn publish(&self, event: ServerEvent, retain: bool) -> usize {
        if retain {
            if let Some(name) = event.event.clone() {
                self.retained
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name, event.clone());
            }
        }
        self.sender.send(event).unwrap_or(0)
    }

    /// Stop replaying `name` to late subscribers.
    pub fn forget(&self, name: &str) {
        self.retained
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name);
    }

    /// Latest retained events, in first-publication order.
    pub fn retained(&self) -> Vec<ServerEvent> {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Open live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, data: &str) -> ServerEvent {
        ServerEvent {
            event: Some(name.into()),
            data: data.into(),
        }
    }

    #[test]
    fn retained_events_keep_only_the_latest_copy() {
        let hub = EventHub::new(4);
        hub.publish(named("boss.health", "1"), true);
        hub.publish(named("boss.damage_feed", "x"), false);
        hub.publish(named("system.status", "s"), true);
        hub.publish(named("boss.health", "2"), true);

        let replay: Vec<_> = hub.retained().into_iter().map(|event| event.data).collect();
        assert_eq!(replay, vec!["2", "s"]);

        hub.forget("boss.health");
        assert_eq!(hub.retained().len(), 1);
    }

    #[tokio::test]
    async fn publish_reports_live_subscribers() {
        let hub = EventHub::new(4);
        assert_eq!(hub.publish(named("boss.health", "1"), false), 0);

        let mut receiver = hub.subscribe();
        assert_eq!(hub.publish(named("boss.health", "2"), false), 1);
        assert_eq!(receiver.recv().await.unwrap().data, "2");
    }
}
