use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default busy timeout (ms) while waiting on another connection's write lock.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of rows a cursor fetches per round-trip.
const DEFAULT_PAGE_SIZE: usize = 64;

/// Configuration for the SQL storage engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Rows fetched per cursor page.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// In-memory database, suitable for tests and embedding.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed database at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert!(c.path.is_none());
        assert_eq!(c.busy_timeout_ms, 5_000);
        assert_eq!(c.page_size, 64);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let c: StoreConfig = serde_json::from_str(r#"{"path": "/tmp/g.db"}"#).unwrap();
        assert_eq!(c.path, Some(PathBuf::from("/tmp/g.db")));
        assert_eq!(c.page_size, 64);
    }
}
