//! Resource values attached to level-value nodes

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::db::dedup::{get_or_create, Materialize};
use crate::db::level_values::NodeId;
use crate::error::StorageError;

const COLUMNS: &str =
    "id, environment_id, resource_definition_id, level_value_id, values_json, updated_at";

/// Resource value row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceValueRow {
    pub id: i64,
    pub environment_id: i64,
    pub resource_definition_id: i64,
    pub level_value_id: NodeId,
    pub values: Map<String, Value>,
    pub updated_at: String,
}

impl ResourceValueRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw: String = row.get(4)?;
        let values = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    4,
                    Type::Text,
                    format!("values_json is not an object: {}", other).into(),
                ))
            }
            Err(e) => return Err(rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))),
        };

        Ok(Self {
            id: row.get(0)?,
            environment_id: row.get(1)?,
            resource_definition_id: row.get(2)?,
            level_value_id: NodeId::from_raw(row.get(3)?),
            values,
            updated_at: row.get(5)?,
        })
    }
}

/// Identity of a resource value row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceValueKey {
    pub environment_id: i64,
    pub resource_definition_id: i64,
    pub level_value_id: NodeId,
}

impl Materialize for ResourceValueRow {
    type Key = ResourceValueKey;
    const KIND: &'static str = "resource_value";

    fn find(conn: &Connection, key: &ResourceValueKey) -> Result<Option<Self>, StorageError> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM resource_values \
                     WHERE environment_id = ?1 AND resource_definition_id = ?2 AND level_value_id = ?3",
                    COLUMNS
                ),
                params![key.environment_id, key.resource_definition_id, key.level_value_id.as_i64()],
                |row| ResourceValueRow::from_row(row),
            )
            .optional()?;
        Ok(row)
    }

    fn insert(conn: &Connection, key: &ResourceValueKey) -> rusqlite::Result<Self> {
        conn.execute(
            "INSERT INTO resource_values (environment_id, resource_definition_id, level_value_id) \
             VALUES (?1, ?2, ?3)",
            params![key.environment_id, key.resource_definition_id, key.level_value_id.as_i64()],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM resource_values WHERE id = ?1", COLUMNS),
            params![id],
            |row| ResourceValueRow::from_row(row),
        )
    }
}

/// Replace the values stored at one node wholesale, creating the row on
/// first write
pub fn upsert_values(
    tx: &mut Transaction<'_>,
    key: &ResourceValueKey,
    values: &Map<String, Value>,
) -> Result<ResourceValueRow, StorageError> {
    let mut row: ResourceValueRow = get_or_create(tx, key)?;

    let json = serde_json::to_string(values)?;
    tx.execute(
        "UPDATE resource_values SET values_json = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![json, row.id],
    )?;

    debug!(
        environment_id = key.environment_id,
        resource_definition_id = key.resource_definition_id,
        level_value_id = %key.level_value_id,
        keys = values.len(),
        "Stored resource values"
    );

    row.updated_at = tx.query_row(
        "SELECT updated_at FROM resource_values WHERE id = ?1",
        params![row.id],
        |r| r.get(0),
    )?;
    row.values = values.clone();
    Ok(row)
}

/// All value rows of one resource in one environment, at any node
pub fn values_for(
    conn: &Connection,
    environment_id: i64,
    resource_definition_id: i64,
) -> Result<Vec<ResourceValueRow>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM resource_values WHERE environment_id = ?1 AND resource_definition_id = ?2",
        COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![environment_id, resource_definition_id], |row| {
            ResourceValueRow::from_row(row)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LevelValue, NodeKey};
    use crate::db::ConfigDb;
    use serde_json::json;

    fn setup() -> (ConfigDb, NodeId) {
        let db = ConfigDb::open_in_memory().unwrap();
        let root = db
            .with_tx(|tx| {
                tx.execute_batch(
                    "INSERT INTO environments (id) VALUES (9);
                     INSERT INTO components (id, name) VALUES (7, 'component1');
                     INSERT INTO resource_definitions (id, name, component_id) VALUES (5, 'resdef1', 7);",
                )?;
                get_or_create::<LevelValue>(tx, &NodeKey::root())
            })
            .unwrap();
        (db, root.id)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_write_replaces_wholesale() {
        let (db, root) = setup();
        let key = ResourceValueKey {
            environment_id: 9,
            resource_definition_id: 5,
            level_value_id: root,
        };

        db.with_tx(|tx| upsert_values(tx, &key, &object(json!({"a": 1, "b": 2})))).unwrap();
        db.with_tx(|tx| upsert_values(tx, &key, &object(json!({"c": 3})))).unwrap();

        let rows = db.with_conn(|conn| values_for(conn, 9, 5)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(Value::Object(rows[0].values.clone()), json!({"c": 3}));
    }

    #[test]
    fn test_repeated_write_is_idempotent() {
        let (db, root) = setup();
        let key = ResourceValueKey {
            environment_id: 9,
            resource_definition_id: 5,
            level_value_id: root,
        };
        let payload = object(json!({"k": "v"}));

        let first = db.with_tx(|tx| upsert_values(tx, &key, &payload)).unwrap();
        let second = db.with_tx(|tx| upsert_values(tx, &key, &payload)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.stats().unwrap().resource_value_count, 1);
    }

    #[test]
    fn test_values_for_other_resource_is_empty() {
        let (db, _) = setup();
        let rows = db.with_conn(|conn| values_for(conn, 9, 6)).unwrap();
        assert!(rows.is_empty());
    }
}
