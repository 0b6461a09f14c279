//! Service layer
//!
//! Services own the transaction boundaries and emit events after each
//! committed mutation. The CLI and any other front end talk to these rather
//! than to the repository functions in [`crate::db`].

pub mod events;
pub mod hierarchy_service;
pub mod registry_service;

pub use events::{spawn_event_logger, EventBus, StorageEvent};
pub use hierarchy_service::HierarchyService;
pub use registry_service::RegistryService;

use std::sync::Arc;

use crate::config::Config;
use crate::db::ConfigDb;

/// Container for all services, sharing one database handle and event bus
pub struct Services {
    pub registry: RegistryService,
    pub hierarchy: HierarchyService,
    pub events: Arc<EventBus>,
}

impl Services {
    pub fn new(db: Arc<ConfigDb>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());
        Self {
            registry: RegistryService::new(Arc::clone(&db), Arc::clone(&events)),
            hierarchy: HierarchyService::from_config(db, Arc::clone(&events), config),
            events,
        }
    }
}
