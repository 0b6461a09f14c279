//! Tuning Box - hierarchical configuration store
//!
//! Components declare resource definitions. Environments bind components to
//! an ordered chain of hierarchy levels (say `cluster` then `node`). Values
//! for a resource are attached to nodes of a per-environment level-value
//! trie and read back with deeper scopes overriding shallower ones.
//!
//! ```text
//! root            {"debug": false, "workers": 4}
//!  └ cluster=eu   {"workers": 8}
//!     └ node=n1   {"debug": true}
//!
//! get(cluster=eu, node=n1) => {"debug": true, "workers": 8}
//! ```
//!
//! Everything lives in one SQLite database. Trie nodes and value rows are
//! created through a dedup primitive so concurrent writers converge on a
//! single node per `(level, parent, value)`.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod resolver;
pub mod services;

pub use codec::{PathEncoding, ResourceRef};
pub use config::Config;
pub use db::ConfigDb;
pub use error::StorageError;
pub use merge::merge_values;
pub use resolver::{LevelPath, PathResolver, ReadMode};
pub use services::{HierarchyService, RegistryService, Services};
