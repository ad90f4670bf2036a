/*!
Defining the [Namespace] struct for handling namespaces in the catalog.
*/

use core::fmt::{self, Display};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator used when a namespace is flattened into a single path segment.
pub const FLATTENED_SEPARATOR: char = '\u{1f}';

/// Namespace struct for iceberg catalogs
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace {
    levels: Vec<String>,
}

impl Namespace {
    /// Try to create new namespace with sequence of strings.
    pub fn try_new(levels: &[String]) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::InvalidFormat("empty namespace".to_string()));
        }
        if levels.iter().any(|level| level.is_empty()) {
            return Err(Error::InvalidFormat(
                "namespace with an empty level".to_string(),
            ));
        }
        Ok(Namespace {
            levels: levels.to_vec(),
        })
    }

    /// Parse a dotted namespace string.
    pub fn parse(namespace: &str) -> Result<Self> {
        let levels = namespace
            .split('.')
            .map(|level| level.to_string())
            .collect::<Vec<String>>();
        Namespace::try_new(&levels)
    }

    /// Rebuild a namespace from its flattened single-segment encoding.
    pub fn from_flattened(flattened: &str) -> Result<Self> {
        let levels = flattened
            .split(FLATTENED_SEPARATOR)
            .map(|level| level.to_string())
            .collect::<Vec<String>>();
        Namespace::try_new(&levels)
    }

    /// Encode the namespace into a single path segment using the `\x1f`
    /// unit separator.
    pub fn flatten(&self) -> String {
        self.levels.join(&FLATTENED_SEPARATOR.to_string())
    }

    /// Get the namespace levels
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Get the number of levels
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the namespace has no levels.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Whether `self` is a direct child of `parent`.
    pub fn is_child_of(&self, parent: &Namespace) -> bool {
        self.levels.len() == parent.levels.len() + 1 && self.levels.starts_with(&parent.levels)
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            Itertools::intersperse(self.levels.iter().map(|x| x as &str), ".").collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let namespace = Namespace::try_new(&["db".to_string(), "schema".to_string()]).unwrap();
        assert_eq!(&format!("{}", namespace), "db.schema");
        assert_eq!(namespace.len(), 2);
    }

    #[test]
    fn test_empty_level_rejected() {
        assert!(Namespace::try_new(&["db".to_string(), "".to_string()]).is_err());
        assert!(Namespace::try_new(&[]).is_err());
    }

    #[test]
    fn test_flatten_roundtrip() {
        let namespace = Namespace::parse("db.schema").unwrap();
        let flattened = namespace.flatten();
        assert!(flattened.contains(FLATTENED_SEPARATOR));
        assert_eq!(Namespace::from_flattened(&flattened).unwrap(), namespace);
    }

    #[test]
    fn test_is_child_of() {
        let parent = Namespace::parse("db").unwrap();
        let child = Namespace::parse("db.schema").unwrap();
        let grandchild = Namespace::parse("db.schema.deep").unwrap();
        assert!(child.is_child_of(&parent));
        assert!(!grandchild.is_child_of(&parent));
        assert!(!parent.is_child_of(&child));
    }
}
