//! Component, resource definition and environment CRUD
//!
//! Thin repository layer the hierarchy engine leans on for existence checks.
//! Creation functions expect to be called inside a transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::codec::ResourceRef;
use crate::db::levels;
use crate::error::StorageError;

/// Resource definition row from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinitionRow {
    pub id: i64,
    pub name: String,
    pub component_id: i64,
    pub content: Option<Value>,
}

impl ResourceDefinitionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let content: Option<String> = row.get("content_json")?;
        let content = content
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            component_id: row.get("component_id")?,
            content,
        })
    }
}

/// Component with its resource definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRow {
    pub id: i64,
    pub name: String,
    pub resource_definitions: Vec<ResourceDefinitionRow>,
}

/// Environment with attached component ids and level names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRow {
    pub id: i64,
    pub components: Vec<i64>,
    pub hierarchy_levels: Vec<String>,
}

/// Input for creating a resource definition
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResourceDefinitionInput {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub content: Option<Value>,
}

/// Input for creating a component
#[derive(Debug, Clone, Deserialize)]
pub struct CreateComponentInput {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub resource_definitions: Vec<CreateResourceDefinitionInput>,
}

/// Input for creating an environment together with its level chain
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEnvironmentInput {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub components: Vec<i64>,
    #[serde(default)]
    pub hierarchy_levels: Vec<String>,
}

// =========================================================================
// Components
// =========================================================================

/// Create a component and its resource definitions
pub fn create_component(
    conn: &Connection,
    input: &CreateComponentInput,
) -> Result<ComponentRow, StorageError> {
    if input.name.is_empty() {
        return Err(StorageError::Validation("component name is required".into()));
    }

    conn.execute(
        "INSERT INTO components (id, name) VALUES (?1, ?2)",
        params![input.id, input.name],
    )?;
    let component_id = conn.last_insert_rowid();

    let mut resource_definitions = Vec::with_capacity(input.resource_definitions.len());
    for def in &input.resource_definitions {
        if def.name.is_empty() {
            return Err(StorageError::Validation("resource definition name is required".into()));
        }
        let content_json = def.content.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO resource_definitions (id, name, component_id, content_json) VALUES (?1, ?2, ?3, ?4)",
            params![def.id, def.name, component_id, content_json],
        )?;
        resource_definitions.push(ResourceDefinitionRow {
            id: conn.last_insert_rowid(),
            name: def.name.clone(),
            component_id,
            content: def.content.clone(),
        });
    }

    debug!(id = component_id, name = %input.name, "Component created");
    Ok(ComponentRow {
        id: component_id,
        name: input.name.clone(),
        resource_definitions,
    })
}

/// Get component by ID
pub fn get_component(conn: &Connection, id: i64) -> Result<Option<ComponentRow>, StorageError> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM components WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;

    match name {
        Some(name) => Ok(Some(ComponentRow {
            id,
            name,
            resource_definitions: resource_definitions_of(conn, id)?,
        })),
        None => Ok(None),
    }
}

/// List all components
pub fn list_components(conn: &Connection) -> Result<Vec<ComponentRow>, StorageError> {
    let mut stmt = conn.prepare("SELECT id, name FROM components ORDER BY id")?;
    let heads: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    heads
        .into_iter()
        .map(|(id, name)| {
            Ok(ComponentRow {
                id,
                name,
                resource_definitions: resource_definitions_of(conn, id)?,
            })
        })
        .collect()
}

/// Delete component by ID (cascades to its resource definitions and values)
pub fn delete_component(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    let deleted = conn.execute("DELETE FROM components WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

fn resource_definitions_of(
    conn: &Connection,
    component_id: i64,
) -> Result<Vec<ResourceDefinitionRow>, StorageError> {
    let mut stmt =
        conn.prepare("SELECT * FROM resource_definitions WHERE component_id = ?1 ORDER BY id")?;
    let defs = stmt
        .query_map(params![component_id], |row| ResourceDefinitionRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(defs)
}

// =========================================================================
// Resource definitions
// =========================================================================

/// Get resource definition by ID
pub fn get_resource_definition(
    conn: &Connection,
    id: i64,
) -> Result<Option<ResourceDefinitionRow>, StorageError> {
    let def = conn
        .query_row(
            "SELECT * FROM resource_definitions WHERE id = ?1",
            params![id],
            |row| ResourceDefinitionRow::from_row(row),
        )
        .optional()?;
    Ok(def)
}

/// Resolve a resource reference for an environment.
///
/// Ids are looked up directly; names are searched among the resource
/// definitions of the components attached to the environment.
pub fn find_resource_definition(
    conn: &Connection,
    environment_id: i64,
    resource: &ResourceRef,
) -> Result<ResourceDefinitionRow, StorageError> {
    match resource {
        ResourceRef::Id(id) => get_resource_definition(conn, *id)?
            .ok_or_else(|| StorageError::NotFound(format!("resource definition {}", id))),
        ResourceRef::Name(name) => {
            let mut stmt = conn.prepare(
                r#"
                SELECT rd.* FROM resource_definitions rd
                JOIN environment_components ec ON ec.component_id = rd.component_id
                WHERE ec.environment_id = ?1 AND rd.name = ?2
                "#,
            )?;
            let mut defs = stmt
                .query_map(params![environment_id, name], |row| ResourceDefinitionRow::from_row(row))?
                .collect::<Result<Vec<_>, _>>()?;

            match defs.len() {
                0 => Err(StorageError::NotFound(format!(
                    "resource definition '{}' in environment {}",
                    name, environment_id
                ))),
                1 => Ok(defs.remove(0)),
                n => Err(StorageError::Validation(format!(
                    "resource name '{}' is ambiguous in environment {} ({} matches), use its id",
                    name, environment_id, n
                ))),
            }
        }
    }
}

// =========================================================================
// Environments
// =========================================================================

/// Create an environment, attach components and build its level chain
pub fn create_environment(
    conn: &Connection,
    input: &CreateEnvironmentInput,
) -> Result<EnvironmentRow, StorageError> {
    for component_id in &input.components {
        if get_component(conn, *component_id)?.is_none() {
            return Err(StorageError::NotFound(format!("component {}", component_id)));
        }
    }

    conn.execute("INSERT INTO environments (id) VALUES (?1)", params![input.id])?;
    let environment_id = conn.last_insert_rowid();

    for component_id in &input.components {
        conn.execute(
            "INSERT OR IGNORE INTO environment_components (environment_id, component_id) VALUES (?1, ?2)",
            params![environment_id, component_id],
        )?;
    }

    let chain = levels::create_chain(conn, environment_id, &input.hierarchy_levels)?;

    debug!(id = environment_id, levels = ?chain.names(), "Environment created");
    Ok(EnvironmentRow {
        id: environment_id,
        components: environment_components(conn, environment_id)?,
        hierarchy_levels: chain.names(),
    })
}

/// Get environment by ID
pub fn get_environment(conn: &Connection, id: i64) -> Result<Option<EnvironmentRow>, StorageError> {
    if !environment_exists(conn, id)? {
        return Ok(None);
    }

    Ok(Some(EnvironmentRow {
        id,
        components: environment_components(conn, id)?,
        hierarchy_levels: levels::get_chain(conn, id)?.names(),
    }))
}

/// Fail with `NotFound` unless the environment exists
pub fn require_environment(conn: &Connection, id: i64) -> Result<(), StorageError> {
    if environment_exists(conn, id)? {
        Ok(())
    } else {
        Err(StorageError::NotFound(format!("environment {}", id)))
    }
}

fn environment_exists(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM environments WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// List all environments
pub fn list_environments(conn: &Connection) -> Result<Vec<EnvironmentRow>, StorageError> {
    let mut stmt = conn.prepare("SELECT id FROM environments ORDER BY id")?;
    let ids: Vec<i64> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    ids.into_iter()
        .map(|id| {
            Ok(EnvironmentRow {
                id,
                components: environment_components(conn, id)?,
                hierarchy_levels: levels::get_chain(conn, id)?.names(),
            })
        })
        .collect()
}

/// Delete environment by ID (cascades to levels, their trie nodes and values)
pub fn delete_environment(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    let deleted = conn.execute("DELETE FROM environments WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

fn environment_components(conn: &Connection, environment_id: i64) -> Result<Vec<i64>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT component_id FROM environment_components WHERE environment_id = ?1 ORDER BY component_id",
    )?;
    let ids = stmt
        .query_map(params![environment_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
