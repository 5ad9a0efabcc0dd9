use serde::{Deserialize, Serialize};

use grafton_store::StoreConfig;
use grafton_types::ADMIN_IDENTITY;

use crate::error::ConfigError;

/// Static configuration of the handler chain.
///
/// Limits that operators change at runtime (payload size, rules) live in the
/// settings document instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Username that bypasses rules and may administer settings and users.
    pub admin_identity: String,
    /// Longest accepted collection name, in bytes.
    pub max_collection_name: usize,
    /// Longest accepted record, graft or user id, in bytes.
    pub max_id_len: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            admin_identity: ADMIN_IDENTITY.to_string(),
            max_collection_name: 128,
            max_id_len: 256,
        }
    }
}

/// Everything needed to open a store and build the standard chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraftonConfig {
    pub store: StoreConfig,
    pub chain: ChainConfig,
}

impl GraftonConfig {
    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_document_is_default() {
        let config = GraftonConfig::from_toml_str("").unwrap();
        assert_eq!(config.chain, ChainConfig::default());
        assert!(config.store.path.is_none());
        assert_eq!(config.chain.admin_identity, "admin");
    }

    #[test]
    fn partial_sections() {
        let config = GraftonConfig::from_toml_str(
            r#"
            [store]
            path = "/var/lib/grafton/grafton.db"
            page_size = 16

            [chain]
            max_id_len = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("/var/lib/grafton/grafton.db")));
        assert_eq!(config.store.page_size, 16);
        assert_eq!(config.store.busy_timeout_ms, 5_000);
        assert_eq!(config.chain.max_id_len, 64);
        assert_eq!(config.chain.max_collection_name, 128);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(GraftonConfig::from_toml_str("[chain]\nmax_id_len = \"long\"").is_err());
    }
}
