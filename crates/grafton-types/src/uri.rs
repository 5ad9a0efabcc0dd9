use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Address of a record or a pattern of records: `collection/id`.
///
/// `id` may be `*` to address every record in the collection, and the bare
/// `*` addresses everything.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataUri {
    pub collection: String,
    pub id: String,
}

impl DataUri {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Every pattern that covers this address, most specific first.
    pub fn patterns(&self) -> [String; 3] {
        [
            self.to_string(),
            format!("{}/*", self.collection),
            "*".to_string(),
        ]
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection == "*" {
            return f.write_str("*");
        }
        write!(f, "{}/{}", self.collection, self.id)
    }
}

impl FromStr for DataUri {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::new("*", "*"));
        }
        // Ids never contain '/', collection names may.
        match s.rsplit_once('/') {
            Some((collection, id)) if !collection.is_empty() && !id.is_empty() => {
                Ok(Self::new(collection, id))
            }
            _ => Err(TypeError::InvalidUri(s.to_string())),
        }
    }
}
