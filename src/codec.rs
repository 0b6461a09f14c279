//! Boundary encodings for level paths and resource references
//!
//! The resolver only ever sees a canonical [`LevelPath`]. Callers address
//! scopes in text form using one of two encodings:
//!
//! - `named`: `lvl1/val1/lvl2/val2/`. Every level is spelled out, so the
//!   resolver can report which name was wrong.
//! - `positional`: `val1/val2`. Names come from the environment's chain in
//!   order.
//!
//! Segments are percent-encoded, so values may contain `/`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::levels::LevelChain;
use crate::error::StorageError;
use crate::resolver::LevelPath;

/// Text encoding of a level path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathEncoding {
    #[default]
    Named,
    Positional,
}

impl PathEncoding {
    /// Parse `raw` into a canonical path.
    ///
    /// `chain` is only consulted by the positional encoding.
    pub fn decode(&self, raw: &str, chain: &LevelChain) -> Result<LevelPath, StorageError> {
        let segments = split_segments(raw)?;
        match self {
            PathEncoding::Named => {
                if segments.len() % 2 != 0 {
                    return Err(StorageError::Validation(format!(
                        "level path '{}' must alternate level names and values",
                        raw
                    )));
                }
                Ok(segments
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect())
            }
            PathEncoding::Positional => {
                if segments.len() > chain.len() {
                    return Err(StorageError::Validation(format!(
                        "level path '{}' has {} values but the environment has {} levels",
                        raw,
                        segments.len(),
                        chain.len()
                    )));
                }
                Ok(chain
                    .levels()
                    .iter()
                    .zip(segments)
                    .map(|(level, value)| (level.name.clone(), value))
                    .collect())
            }
        }
    }

    /// Render a canonical path in this encoding
    pub fn encode(&self, path: &LevelPath) -> String {
        match self {
            PathEncoding::Named => path
                .iter()
                .flat_map(|(name, value)| [name, value])
                .map(|part| format!("{}/", urlencoding::encode(part)))
                .collect(),
            PathEncoding::Positional => path
                .iter()
                .map(|(_, value)| urlencoding::encode(value).into_owned())
                .collect::<Vec<_>>()
                .join("/"),
        }
    }
}

impl FromStr for PathEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "named" => Ok(PathEncoding::Named),
            "positional" => Ok(PathEncoding::Positional),
            other => Err(format!(
                "unknown path encoding '{}', expected 'named' or 'positional'",
                other
            )),
        }
    }
}

fn split_segments(raw: &str) -> Result<Vec<String>, StorageError> {
    let trimmed = raw.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                return Err(StorageError::Validation(format!(
                    "level path '{}' contains an empty segment",
                    raw
                )));
            }
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .map_err(|e| StorageError::Validation(format!("bad segment '{}': {}", segment, e)))
        })
        .collect()
}

/// A resource definition addressed by id or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceRef {
    Id(i64),
    Name(String),
}

impl FromStr for ResourceRef {
    type Err = String;

    /// Integers are ids; anything else, `/` included, is a name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("resource reference must not be empty".to_string());
        }
        Ok(s.parse::<i64>()
            .map(ResourceRef::Id)
            .unwrap_or_else(|_| ResourceRef::Name(s.to_string())))
    }
}

impl From<i64> for ResourceRef {
    fn from(id: i64) -> Self {
        ResourceRef::Id(id)
    }
}

impl From<&str> for ResourceRef {
    fn from(name: &str) -> Self {
        ResourceRef::Name(name.to_string())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Id(id) => write!(f, "{}", id),
            ResourceRef::Name(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{levels, ConfigDb};

    fn chain() -> LevelChain {
        let db = ConfigDb::open_in_memory().unwrap();
        db.with_tx(|tx| {
            tx.execute("INSERT INTO environments (id) VALUES (1)", [])?;
            levels::create_chain(tx, 1, &["level1".to_string(), "level2".to_string()])
        })
        .unwrap()
    }

    fn pairs(path: &LevelPath) -> Vec<(&str, &str)> {
        path.iter().collect()
    }

    #[test]
    fn test_named_empty() {
        let path = PathEncoding::Named.decode("", &chain()).unwrap();
        assert!(path.is_empty());
        assert_eq!(PathEncoding::Named.encode(&path), "");
    }

    #[test]
    fn test_named_one() {
        let path = PathEncoding::Named.decode("level1/value1/", &chain()).unwrap();
        assert_eq!(pairs(&path), vec![("level1", "value1")]);
    }

    #[test]
    fn test_named_multi() {
        let path = PathEncoding::Named
            .decode("level1/value1/level2/value2/", &chain())
            .unwrap();
        assert_eq!(pairs(&path), vec![("level1", "value1"), ("level2", "value2")]);
        assert_eq!(PathEncoding::Named.encode(&path), "level1/value1/level2/value2/");
    }

    #[test]
    fn test_named_trailing_slash_optional() {
        let path = PathEncoding::Named.decode("/level1/value1", &chain()).unwrap();
        assert_eq!(pairs(&path), vec![("level1", "value1")]);
    }

    #[test]
    fn test_named_odd_segments() {
        let result = PathEncoding::Named.decode("level1/value1/level2/", &chain());
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_named_quotes_slashes() {
        let path: LevelPath = [("level1", "a/b")].into_iter().collect();
        let encoded = PathEncoding::Named.encode(&path);
        assert_eq!(encoded, "level1/a%2Fb/");
        assert_eq!(PathEncoding::Named.decode(&encoded, &chain()).unwrap(), path);
    }

    #[test]
    fn test_positional_takes_names_from_chain() {
        let path = PathEncoding::Positional.decode("value1/value2", &chain()).unwrap();
        assert_eq!(pairs(&path), vec![("level1", "value1"), ("level2", "value2")]);
        assert_eq!(PathEncoding::Positional.encode(&path), "value1/value2");
    }

    #[test]
    fn test_positional_partial() {
        let path = PathEncoding::Positional.decode("value1", &chain()).unwrap();
        assert_eq!(pairs(&path), vec![("level1", "value1")]);
    }

    #[test]
    fn test_positional_too_many_values() {
        let result = PathEncoding::Positional.decode("a/b/c", &chain());
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_empty_segment_rejected() {
        let result = PathEncoding::Positional.decode("a//b", &chain());
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_resource_ref_parse() {
        assert_eq!("1".parse::<ResourceRef>().unwrap(), ResourceRef::Id(1));
        assert_eq!("name".parse::<ResourceRef>().unwrap(), ResourceRef::Name("name".into()));
        assert_eq!(
            "name/with/slashes".parse::<ResourceRef>().unwrap(),
            ResourceRef::Name("name/with/slashes".into())
        );
        assert!("".parse::<ResourceRef>().is_err());
        assert_eq!(ResourceRef::Id(1).to_string(), "1");
    }
}
