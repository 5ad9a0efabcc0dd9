//! The settings document: defaults and persistence.

use rusqlite::{params, TransactionBehavior};
use serde_json::{json, Value};

use grafton_types::{normalize_path, SettingsPath};

use crate::error::{StoreError, StoreResult};
use crate::json::{lookup, set_at};
use crate::sqlite::SqlStore;
use crate::traits::SettingsStore;

/// Default maximum payload size, in bytes.
pub const DEFAULT_MAX_SIZE: u64 = 1_048_576;

pub const DEFAULT_DATA_CREATE: &str = r#"auth.uid != "" && auth.validated"#;
pub const DEFAULT_DATA_READ: &str =
    r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).read"#;
pub const DEFAULT_DATA_WRITE: &str =
    r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).write"#;
pub const DEFAULT_DATA_DELETE: &str =
    r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).delete"#;
pub const DEFAULT_DATA_GRAFT: &str =
    r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).graft"#;
pub const DEFAULT_GRAFT_READ: &str = r#"auth.uid == data.creator || auth.uid == graft.creator || acl(auth.uid, data.collection + "/" + data.id).read"#;
pub const DEFAULT_GRAFT_WRITE: &str = "auth.uid == graft.creator";
pub const DEFAULT_GRAFT_DELETE: &str = "auth.uid == graft.creator || auth.uid == data.creator";

/// The document a fresh store starts with.
pub fn default_settings() -> Value {
    json!({
        "data": { "maxsize": DEFAULT_MAX_SIZE },
        "rules": {
            "data": {
                "create": DEFAULT_DATA_CREATE,
                "read": DEFAULT_DATA_READ,
                "write": DEFAULT_DATA_WRITE,
                "delete": DEFAULT_DATA_DELETE,
                "graft": DEFAULT_DATA_GRAFT,
            },
            "graft": {
                "read": DEFAULT_GRAFT_READ,
                "write": DEFAULT_GRAFT_WRITE,
                "delete": DEFAULT_GRAFT_DELETE,
            }
        }
    })
}

/// Check that `value` has the type `path` stores.
pub fn check_setting(path: SettingsPath, value: &Value) -> StoreResult<()> {
    let ok = match path {
        SettingsPath::MaxSize => value.as_u64().is_some(),
        SettingsPath::Rule(..) => value.is_string(),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidInput(format!("unexpected value for {path}: {value}")))
    }
}

impl SqlStore {
    fn settings_document(&self) -> StoreResult<Value> {
        let text: String = self
            .lock()
            .query_row("SELECT document FROM settings WHERE id = 1", [], |row| row.get(0))?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl SettingsStore for SqlStore {
    fn get_setting(&self, path: &str) -> StoreResult<Value> {
        let normalized = normalize_path(path);
        let document = self.settings_document()?;
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        lookup(&document, &segments)
            .cloned()
            .ok_or(StoreError::SettingNotFound(normalized))
    }

    fn set_setting(&self, path: SettingsPath, value: Value) -> StoreResult<()> {
        check_setting(path, &value)?;
        let key = path.to_string();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let text: String = tx.query_row("SELECT document FROM settings WHERE id = 1", [], |row| row.get(0))?;
        let mut document: Value = serde_json::from_str(&text)?;
        let segments: Vec<&str> = key.split('/').collect();
        set_at(&mut document, &segments, value);
        tx.execute(
            "UPDATE settings SET document = ?1 WHERE id = 1",
            params![serde_json::to_string(&document)?],
        )?;
        tx.commit()?;
        tracing::info!(path = %key, "setting updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafton_types::{RuleAction, RuleTarget};

    #[test]
    fn defaults_cover_every_writable_path() {
        let doc = default_settings();
        for path in SettingsPath::all() {
            let key = path.to_string();
            let segments: Vec<&str> = key.split('/').collect();
            let value = lookup(&doc, &segments).unwrap_or_else(|| panic!("missing {key}"));
            check_setting(path, value).unwrap();
        }
    }

    #[test]
    fn get_accepts_either_separator() {
        let s = SqlStore::in_memory().unwrap();
        assert_eq!(s.get_setting("data/maxsize").unwrap(), json!(DEFAULT_MAX_SIZE));
        assert_eq!(s.get_setting("data.maxsize").unwrap(), json!(DEFAULT_MAX_SIZE));
        assert_eq!(s.get_setting("rules.graft.write").unwrap(), json!(DEFAULT_GRAFT_WRITE));
        assert_eq!(s.get_setting("").unwrap(), default_settings());
        assert!(matches!(s.get_setting("rules/nope"), Err(StoreError::SettingNotFound(p)) if p == "rules/nope"));
    }

    #[test]
    fn set_persists_and_type_checks() {
        let s = SqlStore::in_memory().unwrap();
        s.set_setting(SettingsPath::MaxSize, json!(10)).unwrap();
        assert_eq!(s.get_setting("data/maxsize").unwrap(), json!(10));

        let read = SettingsPath::rule(RuleTarget::Data, RuleAction::Read);
        s.set_setting(read, json!("true")).unwrap();
        assert_eq!(s.get_setting("rules/data/read").unwrap(), json!("true"));
        // Siblings untouched.
        assert_eq!(s.get_setting("rules/data/write").unwrap(), json!(DEFAULT_DATA_WRITE));

        assert!(matches!(s.set_setting(SettingsPath::MaxSize, json!("big")), Err(StoreError::InvalidInput(_))));
        assert!(matches!(s.set_setting(SettingsPath::MaxSize, json!(-1)), Err(StoreError::InvalidInput(_))));
        assert!(matches!(s.set_setting(read, json!(true)), Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn reopen_keeps_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");
        {
            let s = SqlStore::open(crate::StoreConfig::file(&path)).unwrap();
            s.set_setting(SettingsPath::MaxSize, json!(99)).unwrap();
        }
        let s = SqlStore::open(crate::StoreConfig::file(&path)).unwrap();
        assert_eq!(s.get_setting("data/maxsize").unwrap(), json!(99));
    }
}
