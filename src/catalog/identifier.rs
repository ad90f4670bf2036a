/*!
Defining the [Identifier] struct that names tables and views in a catalog.
*/

use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use super::namespace::Namespace;
use crate::error::{Error, Result};

/// Separator of different namespace levels.
pub static SEPARATOR: &str = ".";

/// Identifies a table or view in an iceberg catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    namespace: Namespace,
    name: String,
}

impl Identifier {
    /// Create an identifier from namespace levels followed by the name.
    pub fn try_new(names: &[String]) -> Result<Self> {
        let length = names.len();
        if names.is_empty() {
            return Err(Error::InvalidFormat(
                "identifier from an empty sequence".to_string(),
            ));
        }
        if names[length - 1].is_empty() {
            return Err(Error::InvalidFormat("identifier with an empty name".to_string()));
        }
        Ok(Identifier {
            namespace: Namespace::try_new(&names[0..length - 1])?,
            name: names[length - 1].clone(),
        })
    }

    /// Build an identifier from its parts.
    pub fn new(namespace: Namespace, name: impl Into<String>) -> Self {
        Identifier {
            namespace,
            name: name.into(),
        }
    }

    /// Parse a dotted identifier string.
    pub fn parse(identifier: &str) -> Result<Self> {
        let names = identifier
            .split(SEPARATOR)
            .map(|x| x.to_string())
            .collect::<Vec<String>>();
        Identifier::try_new(&names)
    }

    /// Return the namespace of the table or view.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Return the name of the table or view.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, SEPARATOR, self.name)
    }
}
