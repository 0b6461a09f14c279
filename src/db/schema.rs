//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| StorageError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StorageError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| StorageError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(REGISTRY_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create registry tables: {}", e)))?;

    conn.execute_batch(HIERARCHY_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create hierarchy tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), StorageError> {
    // Only v1 exists so far; later versions add their steps here
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Component registry
const REGISTRY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS components (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

-- Resource definitions: named JSON blobs owned by a component
CREATE TABLE IF NOT EXISTS resource_definitions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    component_id INTEGER NOT NULL,
    content_json TEXT,
    FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
);
"#;

/// Environments, their scope chain, the level-value trie and attached values
const HIERARCHY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS environments (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS environment_components (
    environment_id INTEGER NOT NULL,
    component_id INTEGER NOT NULL,
    PRIMARY KEY (environment_id, component_id),
    FOREIGN KEY (environment_id) REFERENCES environments(id) ON DELETE CASCADE,
    FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
);

-- Linear chain: one root per environment (parent_id NULL), at most one child
-- per level (UNIQUE parent_id)
CREATE TABLE IF NOT EXISTS hierarchy_levels (
    id INTEGER PRIMARY KEY,
    environment_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    parent_id INTEGER,
    UNIQUE (environment_id, name),
    UNIQUE (parent_id),
    FOREIGN KEY (environment_id) REFERENCES environments(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES hierarchy_levels(id) ON DELETE CASCADE
);

-- Trie nodes. The root sentinel has level_id, parent_id and value all NULL.
CREATE TABLE IF NOT EXISTS level_values (
    id INTEGER PRIMARY KEY,
    level_id INTEGER,
    parent_id INTEGER,
    value TEXT,
    FOREIGN KEY (level_id) REFERENCES hierarchy_levels(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES level_values(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS resource_values (
    id INTEGER PRIMARY KEY,
    environment_id INTEGER NOT NULL,
    resource_definition_id INTEGER NOT NULL,
    level_value_id INTEGER NOT NULL,
    values_json TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (environment_id, resource_definition_id, level_value_id),
    FOREIGN KEY (environment_id) REFERENCES environments(id) ON DELETE CASCADE,
    FOREIGN KEY (resource_definition_id) REFERENCES resource_definitions(id) ON DELETE CASCADE,
    FOREIGN KEY (level_value_id) REFERENCES level_values(id) ON DELETE CASCADE
);
"#;

/// Index definitions
const INDEXES_SCHEMA: &str = r#"
-- NULLs are distinct in plain UNIQUE constraints, so the node identity is
-- enforced on an expression index. Row ids start at 1, making 0 a safe stand-in.
CREATE UNIQUE INDEX IF NOT EXISTS idx_level_values_identity
    ON level_values(IFNULL(level_id, 0), IFNULL(parent_id, 0), IFNULL(value, ''));

CREATE INDEX IF NOT EXISTS idx_resource_definitions_component ON resource_definitions(component_id);
CREATE INDEX IF NOT EXISTS idx_hierarchy_levels_env ON hierarchy_levels(environment_id);
CREATE INDEX IF NOT EXISTS idx_level_values_parent ON level_values(parent_id);
CREATE INDEX IF NOT EXISTS idx_resource_values_env_res
    ON resource_values(environment_id, resource_definition_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_root_sentinel_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute("INSERT INTO level_values (level_id, parent_id, value) VALUES (NULL, NULL, NULL)", [])
            .unwrap();
        let second = conn.execute(
            "INSERT INTO level_values (level_id, parent_id, value) VALUES (NULL, NULL, NULL)",
            [],
        );
        assert!(second.is_err());
    }
}
