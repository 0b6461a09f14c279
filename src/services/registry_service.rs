//! Registry service - components, resource definitions and environments
//!
//! Wraps the entity repository with transaction boundaries and event
//! emission. Environments are created together with their level chain in a
//! single transaction.

use std::sync::Arc;

use crate::db::{entities, ConfigDb, DbStats};
use crate::db::{ComponentRow, CreateComponentInput, CreateEnvironmentInput, EnvironmentRow};
use crate::error::StorageError;

use super::events::{EventBus, StorageEvent};

/// Registry service for entity CRUD
pub struct RegistryService {
    db: Arc<ConfigDb>,
    events: Arc<EventBus>,
}

impl RegistryService {
    pub fn new(db: Arc<ConfigDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Create a component with its resource definitions
    pub fn create_component(&self, input: CreateComponentInput) -> Result<ComponentRow, StorageError> {
        let component = self.db.with_tx(|tx| entities::create_component(tx, &input))?;

        self.events.emit(StorageEvent::ComponentCreated {
            id: component.id,
            name: component.name.clone(),
        });

        Ok(component)
    }

    /// Get component by ID
    pub fn get_component(&self, id: i64) -> Result<ComponentRow, StorageError> {
        self.db
            .with_conn(|conn| entities::get_component(conn, id))?
            .ok_or_else(|| StorageError::NotFound(format!("component {}", id)))
    }

    pub fn list_components(&self) -> Result<Vec<ComponentRow>, StorageError> {
        self.db.with_conn(entities::list_components)
    }

    /// Delete component by ID; false if it did not exist
    pub fn delete_component(&self, id: i64) -> Result<bool, StorageError> {
        let deleted = self.db.with_tx(|tx| entities::delete_component(tx, id))?;
        if deleted {
            self.events.emit(StorageEvent::ComponentDeleted { id });
        }
        Ok(deleted)
    }

    // =========================================================================
    // Environments
    // =========================================================================

    /// Create an environment with its components and level chain
    pub fn create_environment(
        &self,
        input: CreateEnvironmentInput,
    ) -> Result<EnvironmentRow, StorageError> {
        let environment = self.db.with_tx(|tx| entities::create_environment(tx, &input))?;

        self.events.emit(StorageEvent::EnvironmentCreated {
            id: environment.id,
            hierarchy_levels: environment.hierarchy_levels.clone(),
        });

        Ok(environment)
    }

    /// Get environment by ID
    pub fn get_environment(&self, id: i64) -> Result<EnvironmentRow, StorageError> {
        self.db
            .with_conn(|conn| entities::get_environment(conn, id))?
            .ok_or_else(|| StorageError::NotFound(format!("environment {}", id)))
    }

    pub fn list_environments(&self) -> Result<Vec<EnvironmentRow>, StorageError> {
        self.db.with_conn(entities::list_environments)
    }

    /// Delete environment by ID, cascading to its hierarchy and values
    pub fn delete_environment(&self, id: i64) -> Result<bool, StorageError> {
        let deleted = self.db.with_tx(|tx| entities::delete_environment(tx, id))?;
        if deleted {
            self.events.emit(StorageEvent::EnvironmentDeleted { id });
        }
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.db.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateResourceDefinitionInput;

    fn service() -> (RegistryService, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let db = Arc::new(ConfigDb::open_in_memory().unwrap());
        (RegistryService::new(db, Arc::clone(&events)), events)
    }

    #[test]
    fn test_component_lifecycle_emits_events() {
        let (registry, events) = service();
        let mut receiver = events.subscribe();

        let component = registry
            .create_component(CreateComponentInput {
                id: None,
                name: "component1".into(),
                resource_definitions: vec![CreateResourceDefinitionInput {
                    id: None,
                    name: "resdef1".into(),
                    content: None,
                }],
            })
            .unwrap();
        assert_eq!(registry.list_components().unwrap(), vec![component.clone()]);
        assert!(registry.delete_component(component.id).unwrap());
        assert!(!registry.delete_component(component.id).unwrap());

        assert_eq!(
            receiver.try_recv().unwrap(),
            StorageEvent::ComponentCreated { id: component.id, name: "component1".into() }
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            StorageEvent::ComponentDeleted { id: component.id }
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_get_missing_environment() {
        let (registry, _) = service();
        assert!(matches!(registry.get_environment(9), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_failed_environment_leaves_nothing_behind() {
        let (registry, _) = service();
        let result = registry.create_environment(CreateEnvironmentInput {
            id: Some(1),
            components: vec![],
            hierarchy_levels: vec!["rack".into(), "rack".into()],
        });
        assert!(matches!(result, Err(StorageError::Validation(_))));
        assert!(registry.list_environments().unwrap().is_empty());
    }
}
