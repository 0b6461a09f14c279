//! Hierarchy service - level chains, path resolution and layered values
//!
//! Writes attach a JSON object to exactly one trie node. Reads walk the
//! resolved path from the root sentinel down and let deeper nodes override
//! shallower ones key by key.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::codec::{PathEncoding, ResourceRef};
use crate::config::Config;
use crate::db::level_values::LevelValue;
use crate::db::resource_values::{self, ResourceValueKey, ResourceValueRow};
use crate::db::{entities, levels, ConfigDb, NodeId};
use crate::error::StorageError;
use crate::merge::merge_values;
use crate::resolver::{LevelPath, PathResolver, ReadMode};

use super::events::{EventBus, StorageEvent};

/// Hierarchy service for the resolution and override engine
pub struct HierarchyService {
    db: Arc<ConfigDb>,
    events: Arc<EventBus>,
    resolver: PathResolver,
    read_mode: ReadMode,
}

impl HierarchyService {
    /// Create a hierarchy service with default settings
    pub fn new(db: Arc<ConfigDb>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            events,
            resolver: PathResolver::default(),
            read_mode: ReadMode::default(),
        }
    }

    /// Create a hierarchy service using the read and path settings from `config`
    pub fn from_config(db: Arc<ConfigDb>, events: Arc<EventBus>, config: &Config) -> Self {
        Self::new(db, events)
            .with_read_mode(config.read_mode)
            .with_strict_path_length(config.strict_path_length)
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn with_strict_path_length(mut self, strict: bool) -> Self {
        self.resolver = PathResolver::new(strict);
        self
    }

    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    // =========================================================================
    // Level chain
    // =========================================================================

    /// Create the level chain of an environment that has none yet
    pub fn create_chain(&self, environment_id: i64, names: &[String]) -> Result<(), StorageError> {
        self.db.with_tx(|tx| {
            entities::require_environment(tx, environment_id)?;
            levels::create_chain(tx, environment_id, names)
        })?;

        self.events.emit(StorageEvent::HierarchyCreated {
            environment_id,
            hierarchy_levels: names.to_vec(),
        });
        Ok(())
    }

    /// Level names of an environment, least specific first
    pub fn get_chain(&self, environment_id: i64) -> Result<Vec<String>, StorageError> {
        self.db.with_conn(|conn| {
            entities::require_environment(conn, environment_id)?;
            Ok(levels::get_chain(conn, environment_id)?.names())
        })
    }

    // =========================================================================
    // Path resolution
    // =========================================================================

    /// Decode a textual path against the environment's chain
    pub fn parse_path(
        &self,
        environment_id: i64,
        raw: &str,
        encoding: PathEncoding,
    ) -> Result<LevelPath, StorageError> {
        self.db.with_conn(|conn| {
            entities::require_environment(conn, environment_id)?;
            let chain = levels::get_chain(conn, environment_id)?;
            encoding.decode(raw, &chain)
        })
    }

    /// Resolve a path to its trie node, creating missing nodes
    pub fn resolve_path(&self, environment_id: i64, path: &LevelPath) -> Result<NodeId, StorageError> {
        let nodes = self.resolve_nodes(environment_id, path)?;
        nodes
            .last()
            .map(|node| node.id)
            .ok_or_else(|| StorageError::Internal("resolved path has no root".into()))
    }

    /// Resolve a path to the full node chain, root sentinel first
    pub fn resolve_nodes(
        &self,
        environment_id: i64,
        path: &LevelPath,
    ) -> Result<Vec<LevelValue>, StorageError> {
        self.db.with_tx(|tx| {
            entities::require_environment(tx, environment_id)?;
            let chain = levels::get_chain(tx, environment_id)?;
            Ok(self.resolver.materialize(tx, &chain, path)?.into_nodes())
        })
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Replace the values of a resource at exactly the node `path` names
    /// and return the stored row
    pub fn put_value(
        &self,
        environment_id: i64,
        resource: &ResourceRef,
        path: &LevelPath,
        payload: Map<String, Value>,
    ) -> Result<ResourceValueRow, StorageError> {
        let row = self.db.with_tx(|tx| {
            entities::require_environment(tx, environment_id)?;
            let definition = entities::find_resource_definition(tx, environment_id, resource)?;
            let chain = levels::get_chain(tx, environment_id)?;
            let resolved = self.resolver.materialize(tx, &chain, path)?;
            let leaf = resolved
                .leaf()
                .ok_or_else(|| StorageError::Internal("resolved path has no root".into()))?;

            let key = ResourceValueKey {
                environment_id,
                resource_definition_id: definition.id,
                level_value_id: leaf.id,
            };
            resource_values::upsert_values(tx, &key, &payload)
        })?;

        self.events.emit(StorageEvent::ValuesUpdated {
            environment_id,
            resource_definition_id: row.resource_definition_id,
            level_value_id: row.level_value_id,
        });
        Ok(row)
    }

    /// Values of a resource as seen from `path`, with deeper scopes
    /// overriding shallower ones. Empty when nothing is stored on the path.
    pub fn get_value(
        &self,
        environment_id: i64,
        resource: &ResourceRef,
        path: &LevelPath,
    ) -> Result<Map<String, Value>, StorageError> {
        let merged = match self.read_mode {
            ReadMode::Materialize => self.db.with_tx(|tx| {
                entities::require_environment(tx, environment_id)?;
                let definition = entities::find_resource_definition(tx, environment_id, resource)?;
                let chain = levels::get_chain(tx, environment_id)?;
                let resolved = self.resolver.materialize(tx, &chain, path)?;
                let rows = resource_values::values_for(tx, environment_id, definition.id)?;
                Ok(merge_values(resolved.nodes(), &rows))
            })?,
            ReadMode::Lookup => self.db.with_read_tx(|conn| {
                entities::require_environment(conn, environment_id)?;
                let definition = entities::find_resource_definition(conn, environment_id, resource)?;
                let chain = levels::get_chain(conn, environment_id)?;
                let resolved = self.resolver.lookup(conn, &chain, path)?;
                let rows = resource_values::values_for(conn, environment_id, definition.id)?;
                Ok(merge_values(resolved.nodes(), &rows))
            })?,
        };

        debug!(
            environment_id,
            resource = %resource,
            depth = path.len(),
            keys = merged.len(),
            "Resolved resource values"
        );
        Ok(merged)
    }
}
