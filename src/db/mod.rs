//! SQLite database module for hierarchical configuration storage
//!
//! ## Tables
//!
//! - `components` / `resource_definitions` - registered resource blobs
//! - `environments` / `environment_components` - deployment environments
//! - `hierarchy_levels` - per-environment scope chain (parent/child links)
//! - `level_values` - trie of concrete level values, root sentinel included
//! - `resource_values` - JSON values attached at a trie node
//!
//! Mutations go through [`ConfigDb::with_tx`], which opens an IMMEDIATE
//! transaction so concurrent writers on the same file are serialized by
//! SQLite's busy handler instead of failing mid-way.

pub mod schema;
pub mod dedup;
pub mod entities;
pub mod levels;
pub mod level_values;
pub mod resource_values;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StorageError;

/// SQLite database for environments, hierarchies and values
pub struct ConfigDb {
    conn: Mutex<Connection>,
}

impl ConfigDb {
    /// Open or create the database file at `db_path`
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.busy_timeout(busy_timeout)?;

        // WAL keeps readers off the writer's lock
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| StorageError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| StorageError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        schema::init_schema(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Run a read-only operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on success.
    ///
    /// Returning `Err` from `f` rolls the whole transaction back, so a
    /// half-built chain or half-materialized path is never visible.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, StorageError>,
    {
        let mut conn = self.lock()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&mut tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a multi-statement read inside one DEFERRED transaction.
    ///
    /// Every query in `f` sees the same snapshot, even while writers on
    /// other connections commit in between.
    pub fn with_read_tx<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                component_count: count("components")?,
                resource_definition_count: count("resource_definitions")?,
                environment_count: count("environments")?,
                hierarchy_level_count: count("hierarchy_levels")?,
                level_value_count: count("level_values")?,
                resource_value_count: count("resource_values")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub component_count: u64,
    pub resource_definition_count: u64,
    pub environment_count: u64,
    pub hierarchy_level_count: u64,
    pub level_value_count: u64,
    pub resource_value_count: u64,
}

// Re-exports
pub use dedup::{get_or_create, Materialize};
pub use entities::{
    ComponentRow, CreateComponentInput, CreateEnvironmentInput, CreateResourceDefinitionInput,
    EnvironmentRow, ResourceDefinitionRow,
};
pub use level_values::{LevelValue, NodeId, NodeKey};
pub use levels::{HierarchyLevel, LevelChain};
pub use resource_values::ResourceValueRow;
