//! Change notifications
//!
//! Services publish a [`StorageEvent`] once a mutation has committed. Nothing
//! is published for rolled-back work.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::db::NodeId;

/// A committed change to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    ComponentCreated {
        id: i64,
        name: String,
    },
    ComponentDeleted {
        id: i64,
    },
    EnvironmentCreated {
        id: i64,
        hierarchy_levels: Vec<String>,
    },
    EnvironmentDeleted {
        id: i64,
    },
    HierarchyCreated {
        environment_id: i64,
        hierarchy_levels: Vec<String>,
    },
    ValuesUpdated {
        environment_id: i64,
        resource_definition_id: i64,
        level_value_id: NodeId,
    },
}

impl StorageEvent {
    /// Environment the change belongs to; `None` for component changes
    pub fn environment_id(&self) -> Option<i64> {
        match self {
            StorageEvent::ComponentCreated { .. } | StorageEvent::ComponentDeleted { .. } => None,
            StorageEvent::EnvironmentCreated { id, .. } | StorageEvent::EnvironmentDeleted { id } => {
                Some(*id)
            }
            StorageEvent::HierarchyCreated { environment_id, .. }
            | StorageEvent::ValuesUpdated { environment_id, .. } => Some(*environment_id),
        }
    }

    fn log(&self) {
        match self {
            StorageEvent::ComponentCreated { id, name } => info!(id, name = %name, "Component created"),
            StorageEvent::ComponentDeleted { id } => info!(id, "Component deleted"),
            StorageEvent::EnvironmentCreated { id, hierarchy_levels } => {
                info!(id, levels = ?hierarchy_levels, "Environment created")
            }
            StorageEvent::EnvironmentDeleted { id } => info!(id, "Environment deleted"),
            StorageEvent::HierarchyCreated { environment_id, hierarchy_levels } => {
                info!(environment_id, levels = ?hierarchy_levels, "Hierarchy created")
            }
            StorageEvent::ValuesUpdated { environment_id, resource_definition_id, level_value_id } => {
                debug!(
                    environment_id,
                    resource_definition_id,
                    level_value_id = %level_value_id,
                    "Resource values updated"
                )
            }
        }
    }
}

/// Fan-out of [`StorageEvent`]s to any number of subscribers
pub struct EventBus {
    sender: broadcast::Sender<StorageEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Subscribers that fall more than `capacity` events behind skip ahead
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: StorageEvent) {
        trace!(event = ?event, "Publishing storage event");
        // Publishing with no subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Log every event published on `bus` until the bus is dropped
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => event.log(),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(StorageEvent::EnvironmentCreated {
            id: 9,
            hierarchy_levels: vec!["lvl1".into()],
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");
        assert_eq!(event.environment_id(), Some(9));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(StorageEvent::EnvironmentDeleted { id: 1 });
    }

    #[test]
    fn test_environment_id() {
        assert_eq!(StorageEvent::ComponentDeleted { id: 7 }.environment_id(), None);
        assert_eq!(
            StorageEvent::ValuesUpdated {
                environment_id: 9,
                resource_definition_id: 5,
                level_value_id: NodeId::from_raw(1),
            }
            .environment_id(),
            Some(9)
        );
    }

    #[test]
    fn test_lagging_subscriber_skips_ahead() {
        let bus = EventBus::with_capacity(2);
        let mut receiver = bus.subscribe();
        for id in 0..4 {
            bus.emit(StorageEvent::ComponentDeleted { id });
        }

        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(2))
        ));
        assert_eq!(receiver.try_recv().unwrap(), StorageEvent::ComponentDeleted { id: 2 });
    }

    #[tokio::test]
    async fn test_logger_stops_when_bus_dropped() {
        let bus = EventBus::new();
        let handle = spawn_event_logger(&bus);
        bus.emit(StorageEvent::ComponentDeleted { id: 7 });
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("logger did not stop")
            .unwrap();
    }
}
