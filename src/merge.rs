//! Override merge of values found along a resolved path

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::db::level_values::{LevelValue, NodeId};
use crate::db::resource_values::ResourceValueRow;

/// Merge the values attached to `chain` (root first) into one object.
///
/// Deeper nodes win per top-level key. Nested objects are replaced, never
/// merged recursively. Rows at nodes outside `chain` are ignored.
pub fn merge_values(chain: &[LevelValue], rows: &[ResourceValueRow]) -> Map<String, Value> {
    let by_node: HashMap<NodeId, &Map<String, Value>> = rows
        .iter()
        .map(|row| (row.level_value_id, &row.values))
        .collect();

    let mut merged = Map::new();
    for node in chain {
        if let Some(values) = by_node.get(&node.id) {
            for (key, value) in values.iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}
