//! Path resolution against an environment's level chain
//!
//! A request path is an ordered list of `(level name, level value)` pairs.
//! Resolution zips it with the environment's [`LevelChain`], checks that the
//! names line up, then walks the level-value trie from the root sentinel,
//! one node per pair.
//!
//! - A path shorter than the chain is fine and lands on an ancestor node
//!   (intermediate-scope defaults).
//! - A path longer than the chain has its tail ignored, unless the resolver
//!   is strict.
//! - Names are checked before any node is touched, so a mismatch never
//!   leaves partial nodes behind.

use std::str::FromStr;

use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::dedup::get_or_create;
use crate::db::level_values::{find_node, LevelValue, NodeKey};
use crate::db::levels::LevelChain;
use crate::error::StorageError;

/// Ordered `(level name, level value)` pairs, least specific first
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelPath(Vec<(String, String)>);

impl LevelPath {
    /// The empty path: environment-wide scope
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for LevelPath {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// How value reads treat trie nodes that do not exist yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Create missing nodes on read, the same as writes do
    #[default]
    Materialize,
    /// Read-only: a missing node means "nothing stored at or below here"
    Lookup,
}

impl FromStr for ReadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "materialize" => Ok(ReadMode::Materialize),
            "lookup" => Ok(ReadMode::Lookup),
            other => Err(format!(
                "unknown read mode '{}', expected 'materialize' or 'lookup'",
                other
            )),
        }
    }
}

/// Trie nodes visited for one path, root sentinel first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    nodes: Vec<LevelValue>,
    complete: bool,
}

impl ResolvedPath {
    pub fn nodes(&self) -> &[LevelValue] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<LevelValue> {
        self.nodes
    }

    /// Most specific node reached
    pub fn leaf(&self) -> Option<&LevelValue> {
        self.nodes.last()
    }

    /// False when a lookup stopped at a node that does not exist
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// One validated path segment
#[derive(Debug)]
struct Step<'p> {
    level_id: i64,
    value: &'p str,
}

/// Resolves request paths to level-value nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver {
    strict_path_length: bool,
}

impl PathResolver {
    pub fn new(strict_path_length: bool) -> Self {
        Self { strict_path_length }
    }

    /// Resolve `path`, creating every missing node along the way.
    ///
    /// Always succeeds in reaching the leaf; the returned chain starts at the
    /// root sentinel.
    pub fn materialize(
        &self,
        tx: &mut Transaction<'_>,
        chain: &LevelChain,
        path: &LevelPath,
    ) -> Result<ResolvedPath, StorageError> {
        let steps = self.plan(chain, path)?;

        let mut node: LevelValue = get_or_create(tx, &NodeKey::root())?;
        let mut nodes = Vec::with_capacity(steps.len() + 1);
        for step in &steps {
            let key = NodeKey::child(step.level_id, node.id, step.value);
            let child: LevelValue = get_or_create(tx, &key)?;
            nodes.push(std::mem::replace(&mut node, child));
        }
        nodes.push(node);

        debug!(
            environment_id = chain.environment_id,
            depth = steps.len(),
            "Materialized level path"
        );
        Ok(ResolvedPath { nodes, complete: true })
    }

    /// Resolve `path` without writing, stopping at the first missing node
    pub fn lookup(
        &self,
        conn: &Connection,
        chain: &LevelChain,
        path: &LevelPath,
    ) -> Result<ResolvedPath, StorageError> {
        let steps = self.plan(chain, path)?;

        let mut node = match find_node(conn, &NodeKey::root())? {
            Some(root) => root,
            None => return Ok(ResolvedPath { nodes: vec![], complete: false }),
        };
        let mut nodes = Vec::with_capacity(steps.len() + 1);
        for step in &steps {
            let key = NodeKey::child(step.level_id, node.id, step.value);
            match find_node(conn, &key)? {
                Some(child) => nodes.push(std::mem::replace(&mut node, child)),
                None => {
                    nodes.push(node);
                    return Ok(ResolvedPath { nodes, complete: false });
                }
            }
        }
        nodes.push(node);

        Ok(ResolvedPath { nodes, complete: true })
    }

    /// Zip the path with the chain and check level names in order
    fn plan<'p>(&self, chain: &LevelChain, path: &'p LevelPath) -> Result<Vec<Step<'p>>, StorageError> {
        let mut steps = Vec::with_capacity(path.len());
        for (index, (name, value)) in path.iter().enumerate() {
            let level = match chain.get(index) {
                Some(level) => level,
                None if self.strict_path_length => {
                    return Err(StorageError::PathTooLong {
                        max_depth: chain.len(),
                        got: path.len(),
                    });
                }
                None => {
                    warn!(
                        environment_id = chain.environment_id,
                        ignored = path.len() - index,
                        "Path is deeper than the environment hierarchy, ignoring the tail"
                    );
                    break;
                }
            };

            if level.name != name {
                return Err(StorageError::PathMismatch {
                    expected: level.name.clone(),
                    actual: name.to_string(),
                });
            }
            steps.push(Step { level_id: level.id, value });
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{levels, ConfigDb};

    fn setup() -> (ConfigDb, LevelChain) {
        let db = ConfigDb::open_in_memory().unwrap();
        let chain = db
            .with_tx(|tx| {
                tx.execute("INSERT INTO environments (id) VALUES (9)", [])?;
                levels::create_chain(tx, 9, &["lvl1".to_string(), "lvl2".to_string()])
            })
            .unwrap();
        (db, chain)
    }

    fn path(pairs: &[(&str, &str)]) -> LevelPath {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_empty_path_is_root() {
        let (db, chain) = setup();
        let resolved = db
            .with_tx(|tx| PathResolver::default().materialize(tx, &chain, &LevelPath::root()))
            .unwrap();
        assert_eq!(resolved.nodes().len(), 1);
        assert!(resolved.leaf().unwrap().is_root());
    }

    #[test]
    fn test_deep_path() {
        let (db, chain) = setup();
        let resolved = db
            .with_tx(|tx| {
                PathResolver::default().materialize(tx, &chain, &path(&[("lvl1", "val1"), ("lvl2", "val2")]))
            })
            .unwrap();

        let nodes = resolved.nodes();
        assert_eq!(nodes.len(), 3);
        assert!(nodes[0].is_root());
        assert_eq!(nodes[1].level_id, Some(chain.levels()[0].id));
        assert_eq!(nodes[1].value.as_deref(), Some("val1"));
        assert_eq!(nodes[1].parent_id, Some(nodes[0].id));
        assert_eq!(nodes[2].level_id, Some(chain.levels()[1].id));
        assert_eq!(nodes[2].value.as_deref(), Some("val2"));
        assert_eq!(nodes[2].parent_id, Some(nodes[1].id));
    }

    #[test]
    fn test_bad_level_name() {
        let (db, chain) = setup();
        let result = db.with_tx(|tx| {
            PathResolver::default().materialize(tx, &chain, &path(&[("lvlx", "val1")]))
        });
        match result {
            Err(StorageError::PathMismatch { expected, actual }) => {
                assert_eq!(expected, "lvl1");
                assert_eq!(actual, "lvlx");
            }
            other => panic!("expected PathMismatch, got {:?}", other),
        }
        assert_eq!(db.stats().unwrap().level_value_count, 0);
    }

    #[test]
    fn test_mismatch_at_second_level() {
        let (db, chain) = setup();
        let result = db.with_tx(|tx| {
            PathResolver::default().materialize(tx, &chain, &path(&[("lvl1", "a"), ("lvl1", "b")]))
        });
        assert!(matches!(
            result,
            Err(StorageError::PathMismatch { ref expected, .. }) if expected == "lvl2"
        ));
    }

    #[test]
    fn test_long_path_tail_is_ignored() {
        let (db, chain) = setup();
        let resolved = db
            .with_tx(|tx| {
                PathResolver::default().materialize(
                    tx,
                    &chain,
                    &path(&[("lvl1", "a"), ("lvl2", "b"), ("lvl3", "c")]),
                )
            })
            .unwrap();
        assert_eq!(resolved.nodes().len(), 3);
        assert_eq!(resolved.leaf().unwrap().value.as_deref(), Some("b"));
    }

    #[test]
    fn test_long_path_rejected_when_strict() {
        let (db, chain) = setup();
        let result = db.with_tx(|tx| {
            PathResolver::new(true).materialize(
                tx,
                &chain,
                &path(&[("lvl1", "a"), ("lvl2", "b"), ("lvl3", "c")]),
            )
        });
        assert!(matches!(result, Err(StorageError::PathTooLong { max_depth: 2, got: 3 })));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let (db, chain) = setup();
        let p = path(&[("lvl1", "a"), ("lvl2", "b")]);
        let first = db.with_tx(|tx| PathResolver::default().materialize(tx, &chain, &p)).unwrap();
        let second = db.with_tx(|tx| PathResolver::default().materialize(tx, &chain, &p)).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.stats().unwrap().level_value_count, 3);
    }

    #[test]
    fn test_lookup_does_not_write() {
        let (db, chain) = setup();
        let p = path(&[("lvl1", "a"), ("lvl2", "b")]);

        let resolved = db.with_conn(|conn| PathResolver::default().lookup(conn, &chain, &p)).unwrap();
        assert!(resolved.nodes().is_empty());
        assert!(!resolved.is_complete());
        assert_eq!(db.stats().unwrap().level_value_count, 0);
    }

    #[test]
    fn test_lookup_returns_existing_prefix() {
        let (db, chain) = setup();
        db.with_tx(|tx| PathResolver::default().materialize(tx, &chain, &path(&[("lvl1", "a")])))
            .unwrap();

        let resolved = db
            .with_conn(|conn| {
                PathResolver::default().lookup(conn, &chain, &path(&[("lvl1", "a"), ("lvl2", "b")]))
            })
            .unwrap();
        assert!(!resolved.is_complete());
        assert_eq!(resolved.nodes().len(), 2);
        assert_eq!(resolved.leaf().unwrap().value.as_deref(), Some("a"));
    }

    #[test]
    fn test_lookup_still_validates_names() {
        let (db, chain) = setup();
        let result = db.with_conn(|conn| {
            PathResolver::default().lookup(conn, &chain, &path(&[("lvlx", "a")]))
        });
        assert!(matches!(result, Err(StorageError::PathMismatch { .. })));
    }

    #[test]
    fn test_read_mode_parse() {
        assert_eq!("lookup".parse::<ReadMode>().unwrap(), ReadMode::Lookup);
        assert_eq!("materialize".parse::<ReadMode>().unwrap(), ReadMode::Materialize);
        assert!("pure".parse::<ReadMode>().is_err());
    }
}
