//! Hierarchy level chain operations
//!
//! Levels are persisted as parent/child links (`hierarchy_levels.parent_id`)
//! and loaded into an ordered [`LevelChain`], root first.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::error::StorageError;

/// Hierarchy level row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyLevel {
    pub id: i64,
    pub environment_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

impl HierarchyLevel {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            environment_id: row.get("environment_id")?,
            name: row.get("name")?,
            parent_id: row.get("parent_id")?,
        })
    }
}

/// An environment's scope levels in order, least specific first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelChain {
    pub environment_id: i64,
    levels: Vec<HierarchyLevel>,
}

impl LevelChain {
    pub fn levels(&self) -> &[HierarchyLevel] {
        &self.levels
    }

    pub fn names(&self) -> Vec<String> {
        self.levels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HierarchyLevel> {
        self.levels.get(index)
    }
}

/// Create the level chain for an environment.
///
/// Call inside a transaction: the chain must appear all at once.
pub fn create_chain(
    conn: &Connection,
    environment_id: i64,
    names: &[String],
) -> Result<LevelChain, StorageError> {
    validate_names(names)?;

    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM hierarchy_levels WHERE environment_id = ?1",
        params![environment_id],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Err(StorageError::Validation(format!(
            "environment {} already has a hierarchy",
            environment_id
        )));
    }

    let mut levels = Vec::with_capacity(names.len());
    let mut parent_id: Option<i64> = None;
    for name in names {
        conn.execute(
            "INSERT INTO hierarchy_levels (environment_id, name, parent_id) VALUES (?1, ?2, ?3)",
            params![environment_id, name, parent_id],
        )?;
        let id = conn.last_insert_rowid();
        levels.push(HierarchyLevel {
            id,
            environment_id,
            name: name.clone(),
            parent_id,
        });
        parent_id = Some(id);
    }

    debug!(environment_id, levels = ?names, "Created hierarchy chain");
    Ok(LevelChain { environment_id, levels })
}

fn validate_names(names: &[String]) -> Result<(), StorageError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(StorageError::Validation("level name must not be empty".into()));
        }
        if !seen.insert(name.as_str()) {
            return Err(StorageError::Validation(format!(
                "duplicate level name '{}'",
                name
            )));
        }
    }
    Ok(())
}

/// Load the level chain for an environment by walking from the root.
///
/// An environment without levels yields an empty chain.
pub fn get_chain(conn: &Connection, environment_id: i64) -> Result<LevelChain, StorageError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM hierarchy_levels WHERE environment_id = ?1",
        params![environment_id],
        |row| row.get(0),
    )?;
    if total == 0 {
        return Ok(LevelChain { environment_id, levels: vec![] });
    }

    let mut stmt = conn.prepare(
        "SELECT * FROM hierarchy_levels WHERE environment_id = ?1 AND parent_id IS NULL",
    )?;
    let roots: Vec<HierarchyLevel> = stmt
        .query_map(params![environment_id], |row| HierarchyLevel::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut current = match roots.len() {
        0 => {
            return Err(StorageError::Consistency(format!(
                "environment {} has {} hierarchy levels but no root",
                environment_id, total
            )));
        }
        1 => roots.into_iter().next(),
        n => {
            return Err(StorageError::Consistency(format!(
                "environment {} has {} root hierarchy levels",
                environment_id, n
            )));
        }
    };

    let mut child_stmt = conn.prepare(
        "SELECT * FROM hierarchy_levels WHERE parent_id = ?1 AND environment_id = ?2",
    )?;
    let mut levels = Vec::new();
    // Each level has one parent, so the walk from the root cannot cycle.
    // Loops and orphans show up as levels the walk never reaches.
    while let Some(level) = current {
        current = child_stmt
            .query_row(params![level.id, environment_id], |row| HierarchyLevel::from_row(row))
            .optional()?;
        levels.push(level);
    }

    if levels.len() as i64 != total {
        return Err(StorageError::Consistency(format!(
            "hierarchy of environment {} has {} levels but only {} are reachable from the root",
            environment_id,
            total,
            levels.len()
        )));
    }

    Ok(LevelChain { environment_id, levels })
}
