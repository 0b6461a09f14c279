//! Level-value trie nodes
//!
//! A node is one `(level, parent, value)` segment of a scope path. The
//! root sentinel (all three NULL) stands for "no scope", the
//! environment-wide default. Nodes are immutable and never deleted
//! individually; parents are referenced by id only.

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::dedup::Materialize;
use crate::error::StorageError;

/// Opaque handle to a level-value node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    pub(crate) fn from_raw(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Level-value row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelValue {
    pub id: NodeId,
    pub level_id: Option<i64>,
    pub parent_id: Option<NodeId>,
    pub value: Option<String>,
}

impl LevelValue {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: NodeId(row.get("id")?),
            level_id: row.get("level_id")?,
            parent_id: row.get::<_, Option<i64>>("parent_id")?.map(NodeId),
            value: row.get("value")?,
        })
    }

    pub fn is_root(&self) -> bool {
        self.level_id.is_none() && self.parent_id.is_none() && self.value.is_none()
    }
}

/// Identity of a node: unique across the whole trie
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub level_id: Option<i64>,
    pub parent_id: Option<NodeId>,
    pub value: Option<String>,
}

impl NodeKey {
    /// Key of the root sentinel
    pub fn root() -> Self {
        Self {
            level_id: None,
            parent_id: None,
            value: None,
        }
    }

    pub fn child(level_id: i64, parent: NodeId, value: impl Into<String>) -> Self {
        Self {
            level_id: Some(level_id),
            parent_id: Some(parent),
            value: Some(value.into()),
        }
    }
}

impl Materialize for LevelValue {
    type Key = NodeKey;
    const KIND: &'static str = "level_value";

    fn find(conn: &Connection, key: &NodeKey) -> Result<Option<Self>, StorageError> {
        find_node(conn, key)
    }

    fn insert(conn: &Connection, key: &NodeKey) -> rusqlite::Result<Self> {
        conn.execute(
            "INSERT INTO level_values (level_id, parent_id, value) VALUES (?1, ?2, ?3)",
            params![key.level_id, key.parent_id.map(|p| p.0), key.value],
        )?;
        Ok(LevelValue {
            id: NodeId(conn.last_insert_rowid()),
            level_id: key.level_id,
            parent_id: key.parent_id,
            value: key.value.clone(),
        })
    }
}

/// Exact-match lookup of a node without creating it
pub fn find_node(conn: &Connection, key: &NodeKey) -> Result<Option<LevelValue>, StorageError> {
    // Same expressions as idx_level_values_identity, so NULLs compare equal
    // and the lookup is served by that index
    let node = conn
        .query_row(
            r#"
            SELECT * FROM level_values
            WHERE IFNULL(level_id, 0) = IFNULL(?1, 0)
              AND IFNULL(parent_id, 0) = IFNULL(?2, 0)
              AND IFNULL(value, '') = IFNULL(?3, '')
            "#,
            params![key.level_id, key.parent_id.map(|p| p.0), key.value],
            |row| LevelValue::from_row(row),
        )
        .optional()?;
    Ok(node)
}

/// Get node by ID
pub fn get_node(conn: &Connection, id: NodeId) -> Result<LevelValue, StorageError> {
    conn.query_row(
        "SELECT * FROM level_values WHERE id = ?1",
        params![id.0],
        |row| LevelValue::from_row(row),
    )
    .optional()?
    .ok_or_else(|| StorageError::NotFound(format!("level value {}", id)))
}

/// All nodes from the root sentinel down to `id`, root first
pub fn ancestry(conn: &Connection, id: NodeId) -> Result<Vec<LevelValue>, StorageError> {
    let mut nodes = Vec::new();
    let mut next = Some(id);
    while let Some(current) = next {
        let node = get_node(conn, current)?;
        next = node.parent_id;
        nodes.push(node);
        if nodes.len() > 10_000 {
            return Err(StorageError::Consistency(format!(
                "level value {} has a cyclic parent chain",
                id
            )));
        }
    }
    nodes.reverse();
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_or_create, levels, ConfigDb};

    fn setup() -> (ConfigDb, Vec<i64>) {
        let db = ConfigDb::open_in_memory().unwrap();
        let chain = db
            .with_tx(|tx| {
                tx.execute("INSERT INTO environments (id) VALUES (1)", [])?;
                levels::create_chain(tx, 1, &["lvl1".to_string(), "lvl2".to_string()])
            })
            .unwrap();
        let level_ids = chain.levels().iter().map(|l| l.id).collect();
        (db, level_ids)
    }

    #[test]
    fn test_root_is_shared() {
        let (db, _) = setup();
        let a: LevelValue = db.with_tx(|tx| get_or_create(tx, &NodeKey::root())).unwrap();
        let b: LevelValue = db.with_tx(|tx| get_or_create(tx, &NodeKey::root())).unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.is_root());
        assert_eq!(db.stats().unwrap().level_value_count, 1);
    }

    #[test]
    fn test_same_value_under_different_parents() {
        let (db, level_ids) = setup();
        db.with_tx(|tx| {
            let root: LevelValue = get_or_create(tx, &NodeKey::root())?;
            let v1: LevelValue = get_or_create(tx, &NodeKey::child(level_ids[0], root.id, "v1"))?;
            let v2: LevelValue = get_or_create(tx, &NodeKey::child(level_ids[0], root.id, "v2"))?;
            let under_v1: LevelValue = get_or_create(tx, &NodeKey::child(level_ids[1], v1.id, "x"))?;
            let under_v2: LevelValue = get_or_create(tx, &NodeKey::child(level_ids[1], v2.id, "x"))?;
            assert_ne!(under_v1.id, under_v2.id);
            Ok(())
        })
        .unwrap();
        assert_eq!(db.stats().unwrap().level_value_count, 5);
    }

    #[test]
    fn test_find_does_not_create() {
        let (db, level_ids) = setup();
        let missing = db
            .with_conn(|conn| find_node(conn, &NodeKey::child(level_ids[0], NodeId(1), "v1")))
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(db.stats().unwrap().level_value_count, 0);
    }

    #[test]
    fn test_ancestry_is_root_first() {
        let (db, level_ids) = setup();
        let leaf = db
            .with_tx(|tx| {
                let root: LevelValue = get_or_create(tx, &NodeKey::root())?;
                let mid: LevelValue = get_or_create(tx, &NodeKey::child(level_ids[0], root.id, "a"))?;
                get_or_create::<LevelValue>(tx, &NodeKey::child(level_ids[1], mid.id, "b"))
            })
            .unwrap();

        let chain = db.with_conn(|conn| ancestry(conn, leaf.id)).unwrap();
        let values: Vec<Option<&str>> = chain.iter().map(|n| n.value.as_deref()).collect();
        assert_eq!(values, vec![None, Some("a"), Some("b")]);
        assert!(chain[0].is_root());
    }

    #[test]
    fn test_get_missing_node() {
        let (db, _) = setup();
        let result = db.with_conn(|conn| get_node(conn, NodeId(42)));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
