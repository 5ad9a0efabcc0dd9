use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size in bytes of a JSON document, measured on its compact serialization.
pub fn content_size(content: &Value) -> u64 {
    // Serializing a `Value` cannot fail: all map keys are strings.
    serde_json::to_vec(content).map(|v| v.len() as u64).unwrap_or(0)
}

/// A record stored in a collection, uniquely identified by `(collection, id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub id: String,
    pub collection: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub content: Value,
}

impl Data {
    /// Metadata view of this record.
    pub fn info(&self) -> DataInfo {
        DataInfo {
            id: self.id.clone(),
            collection: self.collection.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            size: self.size,
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Self {
            id: String::new(),
            collection: String::new(),
            created_by: String::new(),
            created_at: DateTime::<Utc>::default(),
            size: 0,
            content: Value::Null,
        }
    }
}

/// Record metadata without content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInfo {
    pub id: String,
    pub collection: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

impl Default for DataInfo {
    fn default() -> Self {
        Data::default().info()
    }
}

/// An append-only annotation attached to one [`Data`] record.
///
/// A graft never outlives its parent: deleting the record removes every
/// graft that references it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graft {
    pub id: String,
    pub data_id: String,
    pub collection: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub content: Value,
}

impl Graft {
    pub fn info(&self) -> GraftInfo {
        GraftInfo {
            id: self.id.clone(),
            data_id: self.data_id.clone(),
            collection: self.collection.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            size: self.size,
        }
    }
}

impl Default for Graft {
    fn default() -> Self {
        Self {
            id: String::new(),
            data_id: String::new(),
            collection: String::new(),
            created_by: String::new(),
            created_at: DateTime::<Utc>::default(),
            size: 0,
            content: Value::Null,
        }
    }
}

/// Graft metadata without content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraftInfo {
    pub id: String,
    pub data_id: String,
    pub collection: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

impl Default for GraftInfo {
    fn default() -> Self {
        Graft::default().info()
    }
}
