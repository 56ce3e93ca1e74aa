// src/events.rs

//! Notification fan-out
//!
//! Fire-and-forget publish/subscribe over a broadcast channel. Observers
//! hold an explicit [`Subscription`] handle; delivery order to a given
//! subscriber matches the order mutations were committed in the status
//! tracker. The bus never blocks the publisher: a slow subscriber lags
//! and is told so, it cannot stall the owner task.

use crate::backend::RepoAction;
use crate::error::Error;
use crate::ops::ActiveOperation;
use crate::status::{PackageId, PackageStatus, RepoAlias};
use tokio::sync::broadcast;
use tracing::warn;

/// Default capacity of the broadcast channel behind the bus
const DEFAULT_CAPACITY: usize = 256;

/// Events published by the orchestrator
#[derive(Debug, Clone)]
pub enum Event {
    /// A package moved to a new status
    PackageStatusChanged { id: PackageId, status: PackageStatus },
    /// A repository was added, removed, enabled or disabled
    RepoModified { alias: RepoAlias, action: RepoAction },
    /// The aggregate "any updates available" flag flipped
    UpdatesAvailableChanged { available: bool },
    /// An execution-time failure; code and details come from the adapter
    Error { error: Error },
    /// Initial status population finished (possibly degraded)
    Initialised,
    /// A bulk enable/disable of all repositories completed
    EnableReposFinished,
    /// Removal of all repositories completed
    RemoveAllReposFinished,
    /// The set of pending/active operations changed
    OperationsChanged { operations: Vec<ActiveOperation> },
}

/// Publishing side of the notification fabric
///
/// Cheap to clone; all clones feed the same subscribers.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Event>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish an event to all current subscribers
    ///
    /// Having no subscribers is not an error; the event is dropped.
    pub(crate) fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving handle for one observer
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event, or `None` once the orchestrator is gone
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("subscriber lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no event is ready
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("subscriber lagged, {} events dropped", missed);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_delivered_in_publish_order() {
        let bus = NotificationBus::new();
        let mut sub = bus.subscribe();

        bus.publish(Event::Initialised);
        bus.publish(Event::UpdatesAvailableChanged { available: true });

        assert!(matches!(sub.recv().await, Some(Event::Initialised)));
        assert!(matches!(
            sub.recv().await,
            Some(Event::UpdatesAvailableChanged { available: true })
        ));
    }

    #[tokio::test]
    async fn test_subscribers_are_independent() {
        let bus = NotificationBus::new();
        let mut first = bus.subscribe();

        bus.publish(Event::Initialised);
        assert!(matches!(first.recv().await, Some(Event::Initialised)));

        // A subscription opened later does not see earlier events
        let mut second = bus.subscribe();
        bus.publish(Event::EnableReposFinished);
        assert!(matches!(second.recv().await, Some(Event::EnableReposFinished)));
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_bus_dropped() {
        let bus = NotificationBus::new();
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = NotificationBus::new();
        bus.publish(Event::Initialised);
    }
}
