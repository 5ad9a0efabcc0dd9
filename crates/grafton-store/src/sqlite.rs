use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use grafton_types::{content_size, Data, DataInfo, Graft, GraftInfo};

use crate::config::StoreConfig;
use crate::cursor::{Cursor, ListOptions, PageSource};
use crate::error::{is_foreign_key_violation, is_unique_violation, translate, StoreError, StoreResult};
use crate::json::{lookup, merge_patch};
use crate::naming::{path_segments, CollectionTables};
use crate::query::CompiledCondition;
use crate::settings::default_settings;
use crate::traits::RecordStore;

/// Tables shared by every tenant, created when the store is opened.
const BASE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    name        TEXT PRIMARY KEY,
    data_table  TEXT NOT NULL UNIQUE,
    graft_table TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS settings (
    id       INTEGER PRIMARY KEY CHECK (id = 1),
    document TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    password   TEXT NOT NULL,
    email      TEXT NOT NULL,
    validated  INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    group_id   TEXT REFERENCES groups(id) ON DELETE SET NULL
);
CREATE TABLE IF NOT EXISTS permissions (
    user         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    data_uri     TEXT NOT NULL,
    action_read  INTEGER NOT NULL DEFAULT 0,
    action_write INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user, data_uri)
);
CREATE TABLE IF NOT EXISTS accesses (
    id         TEXT PRIMARY KEY,
    user       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    label      TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

const DATA_COLUMNS: &str = "id, created_by, created_at, size";
const GRAFT_COLUMNS: &str = "id, data_id, created_by, created_at, size";

/// SQL storage engine backed by SQLite.
///
/// One connection is shared behind a mutex; it is held only for the duration
/// of a statement or transaction, never across cursor steps.
#[derive(Clone)]
pub struct SqlStore {
    pub(crate) connection: Arc<Mutex<Connection>>,
    config: StoreConfig,
}

impl SqlStore {
    /// Open (or create) the database described by `config` and make sure the
    /// shared tables and the default settings document exist.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let connection = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        connection.pragma_update(None, "foreign_keys", true)?;
        connection.execute_batch(BASE_SCHEMA)?;
        connection.execute(
            "INSERT OR IGNORE INTO settings (id, document) VALUES (1, ?1)",
            params![serde_json::to_string(&default_settings())?],
        )?;
        tracing::debug!(path = ?config.path, "store opened");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            config,
        })
    }

    /// A fresh private in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().expect("lock poisoned")
    }

    /// First write to a collection: register it, create both tables and
    /// insert the initial record as one transaction.
    ///
    /// Losing a creation race to another connection surfaces as `Conflict`.
    fn create_collection(
        &self,
        collection: &str,
        id: &str,
        created_by: &str,
        content: &Value,
    ) -> StoreResult<()> {
        let tables = CollectionTables::for_collection(collection);
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO collections (name, data_table, graft_table, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, tables.data, tables.graft, Utc::now()],
        )
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::Conflict(format!("collection {collection} already exists"))
            } else {
                translate(err)
            }
        })?;
        tx.execute_batch(&format!(
            "CREATE TABLE \"{data}\" (
                id         TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                size       INTEGER NOT NULL,
                content    TEXT NOT NULL
            );
            CREATE TABLE \"{graft}\" (
                id         TEXT NOT NULL,
                data_id    TEXT NOT NULL REFERENCES \"{data}\"(id) ON DELETE CASCADE,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                size       INTEGER NOT NULL,
                content    TEXT NOT NULL,
                PRIMARY KEY (data_id, id)
            );",
            data = tables.data,
            graft = tables.graft,
        ))?;
        insert_data(&tx, &tables, id, created_by, content)?;
        tx.commit()?;
        tracing::info!(collection = %collection, table = %tables.data, "collection created");
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.config.page_size
    }
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore").field("config", &self.config).finish()
    }
}

fn lookup_tables(conn: &Connection, collection: &str) -> StoreResult<Option<CollectionTables>> {
    let tables = conn
        .query_row(
            "SELECT data_table, graft_table FROM collections WHERE name = ?1",
            params![collection],
            |row| {
                Ok(CollectionTables {
                    data: row.get(0)?,
                    graft: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(tables)
}

fn require_tables(conn: &Connection, collection: &str) -> StoreResult<CollectionTables> {
    lookup_tables(conn, collection)?.ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn from_sql_size(size: i64) -> u64 {
    u64::try_from(size).unwrap_or(0)
}

fn insert_data(
    conn: &Connection,
    tables: &CollectionTables,
    id: &str,
    created_by: &str,
    content: &Value,
) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO \"{}\" (id, created_by, created_at, size, content) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET size = excluded.size, content = excluded.content",
            tables.data
        ),
        params![
            id,
            created_by,
            Utc::now(),
            to_sql_size(content_size(content)),
            serde_json::to_string(content)?
        ],
    )?;
    Ok(())
}

fn data_info_row(collection: &str, row: &rusqlite::Row<'_>) -> rusqlite::Result<DataInfo> {
    Ok(DataInfo {
        id: row.get(0)?,
        collection: collection.to_string(),
        created_by: row.get(1)?,
        created_at: row.get::<_, DateTime<Utc>>(2)?,
        size: from_sql_size(row.get(3)?),
    })
}

fn graft_info_row(collection: &str, row: &rusqlite::Row<'_>) -> rusqlite::Result<GraftInfo> {
    Ok(GraftInfo {
        id: row.get(0)?,
        data_id: row.get(1)?,
        collection: collection.to_string(),
        created_by: row.get(2)?,
        created_at: row.get::<_, DateTime<Utc>>(3)?,
        size: from_sql_size(row.get(4)?),
    })
}

fn with_content(info: DataInfo, content: &str) -> StoreResult<Data> {
    Ok(Data {
        id: info.id,
        collection: info.collection,
        created_by: info.created_by,
        created_at: info.created_at,
        size: info.size,
        content: serde_json::from_str(content)?,
    })
}

fn graft_with_content(info: GraftInfo, content: &str) -> StoreResult<Graft> {
    Ok(Graft {
        id: info.id,
        data_id: info.data_id,
        collection: info.collection,
        created_by: info.created_by,
        created_at: info.created_at,
        size: info.size,
        content: serde_json::from_str(content)?,
    })
}

fn query_data_info(conn: &Connection, tables: &CollectionTables, collection: &str, id: &str) -> StoreResult<DataInfo> {
    conn.query_row(
        &format!("SELECT {DATA_COLUMNS} FROM \"{}\" WHERE id = ?1", tables.data),
        params![id],
        |row| data_info_row(collection, row),
    )
    .optional()?
    .ok_or_else(|| StoreError::RecordNotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    })
}

/// The sub-document of `doc` at `path`, resolved against the decoded value so
/// object keys and array indices are told apart by the node they apply to.
fn project(doc: &Value, path: &str) -> StoreResult<Option<Value>> {
    let segments = path_segments(path)?;
    Ok(lookup(doc, &segments).cloned())
}

impl RecordStore for SqlStore {
    fn collections(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn save(&self, collection: &str, id: &str, created_by: &str, content: &Value) -> StoreResult<DataInfo> {
        let existing = lookup_tables(&self.lock(), collection)?;
        let tables = match existing {
            Some(tables) => {
                // Known collection: single upsert, no surrounding transaction.
                insert_data(&self.lock(), &tables, id, created_by, content)?;
                tables
            }
            None => {
                self.create_collection(collection, id, created_by, content)?;
                CollectionTables::for_collection(collection)
            }
        };
        tracing::debug!(collection = %collection, id = %id, "record saved");
        query_data_info(&self.lock(), &tables, collection, id)
    }

    fn update(&self, collection: &str, id: &str, patch: &Value, max_size: Option<u64>) -> StoreResult<DataInfo> {
        let mut conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(
                &format!("SELECT content FROM \"{}\" WHERE id = ?1", tables.data),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(StoreError::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        let mut document: Value = serde_json::from_str(&current)?;
        merge_patch(&mut document, patch);
        let size = content_size(&document);
        if let Some(max) = max_size {
            if size > max {
                return Err(StoreError::TooLarge { size, max });
            }
        }
        tx.execute(
            &format!("UPDATE \"{}\" SET content = ?1, size = ?2 WHERE id = ?3", tables.data),
            params![serde_json::to_string(&document)?, to_sql_size(size), id],
        )?;
        let info = query_data_info(&tx, &tables, collection, id)?;
        tx.commit()?;
        Ok(info)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        let removed = conn.execute(&format!("DELETE FROM \"{}\" WHERE id = ?1", tables.data), params![id])?;
        if removed == 0 {
            return Err(StoreError::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        tracing::debug!(collection = %collection, id = %id, "record deleted");
        Ok(())
    }

    fn get(&self, collection: &str, id: &str, path: Option<&str>) -> StoreResult<Data> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        let not_found = || StoreError::RecordNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let row = conn
            .query_row(
                &format!("SELECT {DATA_COLUMNS}, content FROM \"{}\" WHERE id = ?1", tables.data),
                params![id],
                |row| Ok((data_info_row(collection, row)?, row.get::<_, String>(4)?)),
            )
            .optional()?;
        let (info, content) = row.ok_or_else(not_found)?;
        let data = with_content(info, &content)?;
        let Some(path) = path else {
            return Ok(data);
        };
        let content = project(&data.content, path)?.ok_or_else(|| StoreError::RecordNotFound {
            collection: collection.to_string(),
            id: format!("{id}/{path}"),
        })?;
        Ok(Data { content, ..data })
    }

    fn info(&self, collection: &str, id: &str) -> StoreResult<DataInfo> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        query_data_info(&conn, &tables, collection, id)
    }

    fn list<'a>(&self, collection: &str, options: ListOptions<'a, Data>) -> StoreResult<Cursor<'a, Data>> {
        let tables = require_tables(&self.lock(), collection)?;
        let condition = options.condition.as_ref().map(|c| c.compile()).transpose()?;
        let source = DataPages {
            connection: self.connection.clone(),
            collection: collection.to_string(),
            table: tables.data,
            condition,
        };
        Ok(Cursor::new(source, self.page_size(), options))
    }

    fn save_graft(
        &self,
        collection: &str,
        data_id: &str,
        id: &str,
        created_by: &str,
        content: &Value,
    ) -> StoreResult<GraftInfo> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (id, data_id, created_by, created_at, size, content) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(data_id, id) DO UPDATE SET size = excluded.size, content = excluded.content",
                tables.graft
            ),
            params![
                id,
                data_id,
                created_by,
                Utc::now(),
                to_sql_size(content_size(content)),
                serde_json::to_string(content)?
            ],
        )
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                StoreError::RecordNotFound {
                    collection: collection.to_string(),
                    id: data_id.to_string(),
                }
            } else {
                translate(err)
            }
        })?;
        tracing::debug!(collection = %collection, data_id = %data_id, id = %id, "graft saved");
        query_graft_info(&conn, &tables, collection, data_id, id)
    }

    fn get_graft(&self, collection: &str, data_id: &str, id: &str, path: Option<&str>) -> StoreResult<Graft> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        let not_found = || StoreError::GraftNotFound {
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            id: id.to_string(),
        };
        let row = conn
            .query_row(
                &format!(
                    "SELECT {GRAFT_COLUMNS}, content FROM \"{}\" WHERE data_id = ?1 AND id = ?2",
                    tables.graft
                ),
                params![data_id, id],
                |row| Ok((graft_info_row(collection, row)?, row.get::<_, String>(5)?)),
            )
            .optional()?;
        let (info, content) = row.ok_or_else(not_found)?;
        let graft = graft_with_content(info, &content)?;
        let Some(path) = path else {
            return Ok(graft);
        };
        let content = project(&graft.content, path)?.ok_or_else(not_found)?;
        Ok(Graft { content, ..graft })
    }

    fn graft_info(&self, collection: &str, data_id: &str, id: &str) -> StoreResult<GraftInfo> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        query_graft_info(&conn, &tables, collection, data_id, id)
    }

    fn delete_graft(&self, collection: &str, data_id: &str, id: &str) -> StoreResult<()> {
        let conn = self.lock();
        let tables = require_tables(&conn, collection)?;
        let removed = conn.execute(
            &format!("DELETE FROM \"{}\" WHERE data_id = ?1 AND id = ?2", tables.graft),
            params![data_id, id],
        )?;
        if removed == 0 {
            return Err(StoreError::GraftNotFound {
                collection: collection.to_string(),
                data_id: data_id.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn list_grafts<'a>(
        &self,
        collection: &str,
        data_id: &str,
        options: ListOptions<'a, Graft>,
    ) -> StoreResult<Cursor<'a, Graft>> {
        let tables = {
            let conn = self.lock();
            let tables = require_tables(&conn, collection)?;
            query_data_info(&conn, &tables, collection, data_id)?;
            tables
        };
        let condition = options.condition.as_ref().map(|c| c.compile()).transpose()?;
        let source = GraftPages {
            connection: self.connection.clone(),
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            table: tables.graft,
            condition,
        };
        Ok(Cursor::new(source, self.page_size(), options))
    }
}

fn query_graft_info(
    conn: &Connection,
    tables: &CollectionTables,
    collection: &str,
    data_id: &str,
    id: &str,
) -> StoreResult<GraftInfo> {
    conn.query_row(
        &format!("SELECT {GRAFT_COLUMNS} FROM \"{}\" WHERE data_id = ?1 AND id = ?2", tables.graft),
        params![data_id, id],
        |row| graft_info_row(collection, row),
    )
    .optional()?
    .ok_or_else(|| StoreError::GraftNotFound {
        collection: collection.to_string(),
        data_id: data_id.to_string(),
        id: id.to_string(),
    })
}

fn after_param(after: Option<&str>) -> SqlValue {
    after.map_or(SqlValue::Null, |key| SqlValue::Text(key.to_string()))
}

fn append_condition(sql: &mut String, params: &mut Vec<SqlValue>, condition: &Option<CompiledCondition>) {
    if let Some(condition) = condition {
        sql.push_str(" AND (");
        sql.push_str(&condition.sql);
        sql.push(')');
        params.extend(condition.params.iter().cloned());
    }
}

/// Keyset-paginated reader over one data table.
struct DataPages {
    connection: Arc<Mutex<Connection>>,
    collection: String,
    table: String,
    condition: Option<CompiledCondition>,
}

impl PageSource<Data> for DataPages {
    fn fetch(&mut self, after: Option<&str>, limit: usize) -> StoreResult<Vec<Data>> {
        let mut sql = format!(
            "SELECT {DATA_COLUMNS}, content FROM \"{}\" WHERE (? IS NULL OR id > ?)",
            self.table
        );
        let mut params = vec![after_param(after), after_param(after)];
        append_condition(&mut sql, &mut params, &self.condition);
        sql.push_str(" ORDER BY id LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let conn = self.connection.lock().expect("lock poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((data_info_row(&self.collection, row)?, row.get::<_, String>(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(info, content)| with_content(info, &content))
            .collect()
    }
}

/// Keyset-paginated reader over the grafts of one record.
struct GraftPages {
    connection: Arc<Mutex<Connection>>,
    collection: String,
    data_id: String,
    table: String,
    condition: Option<CompiledCondition>,
}

impl PageSource<Graft> for GraftPages {
    fn fetch(&mut self, after: Option<&str>, limit: usize) -> StoreResult<Vec<Graft>> {
        let mut sql = format!(
            "SELECT {GRAFT_COLUMNS}, content FROM \"{}\" WHERE data_id = ? AND (? IS NULL OR id > ?)",
            self.table
        );
        let mut params = vec![
            SqlValue::Text(self.data_id.clone()),
            after_param(after),
            after_param(after),
        ];
        append_condition(&mut sql, &mut params, &self.condition);
        sql.push_str(" ORDER BY id LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let conn = self.connection.lock().expect("lock poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((graft_info_row(&self.collection, row)?, row.get::<_, String>(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(info, content)| graft_with_content(info, &content))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Condition;
    use serde_json::json;

    fn store() -> SqlStore {
        SqlStore::in_memory().unwrap()
    }

    fn directory_entries(store: &SqlStore, collection: &str) -> i64 {
        store
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn table_exists(store: &SqlStore, name: &str) -> bool {
        store
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            == 1
    }

    // -----------------------------------------------------------------------
    // Schema lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn first_write_creates_directory_entry_and_tables() {
        let s = store();
        s.save("notes", "a", "alice", &json!({"t": 1})).unwrap();
        s.save("notes", "b", "alice", &json!({"t": 2})).unwrap();

        assert_eq!(directory_entries(&s, "notes"), 1);
        let tables = CollectionTables::for_collection("notes");
        assert!(table_exists(&s, &tables.data));
        assert!(table_exists(&s, &tables.graft));
        assert_eq!(s.collections().unwrap(), vec!["notes".to_string()]);
    }

    #[test]
    fn losing_creation_race_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grafton.db");
        let a = SqlStore::open(StoreConfig::file(&path)).unwrap();
        let b = SqlStore::open(StoreConfig::file(&path)).unwrap();

        a.save("notes", "a", "alice", &json!({})).unwrap();
        // `b` saw no directory entry before `a` committed.
        let err = b.create_collection("notes", "b", "bob", &json!({})).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(directory_entries(&a, "notes"), 1);
        // The loser's row was rolled back with the rest of the unit.
        assert!(matches!(a.info("notes", "b"), Err(StoreError::RecordNotFound { .. })));
        // Once it exists, writing again simply upserts.
        b.save("notes", "b", "bob", &json!({})).unwrap();
    }

    #[test]
    fn concurrent_first_writers_register_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grafton.db");
        let a = SqlStore::open(StoreConfig::file(&path)).unwrap();
        let b = SqlStore::open(StoreConfig::file(&path)).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let handles: Vec<_> = [(a.clone(), "x"), (b, "y")]
            .into_iter()
            .map(|(store, id)| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.save("race", id, "alice", &json!({}))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for result in &results {
            assert!(matches!(result, Ok(_) | Err(StoreError::Conflict(_))), "{result:?}");
        }
        assert!(results.iter().any(|r| r.is_ok()));
        assert_eq!(directory_entries(&a, "race"), 1);
    }

    #[test]
    fn missing_collection_is_not_found() {
        let s = store();
        assert!(matches!(s.get("nope", "a", None), Err(StoreError::CollectionNotFound(_))));
        assert!(matches!(s.delete("nope", "a"), Err(StoreError::CollectionNotFound(_))));
        assert!(matches!(
            s.list("nope", ListOptions::default()),
            Err(StoreError::CollectionNotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get_round_trips_content() {
        let s = store();
        let content = json!({"title": "hello", "tags": ["a", "b"], "n": 3, "ok": true});
        let info = s.save("notes", "a", "alice", &content).unwrap();
        assert_eq!(info.created_by, "alice");
        assert_eq!(info.size, content_size(&content));

        let data = s.get("notes", "a", None).unwrap();
        assert_eq!(data.content, content);
        assert_eq!(data.info(), info);
    }

    #[test]
    fn upsert_keeps_creator() {
        let s = store();
        s.save("notes", "a", "alice", &json!({"v": 1})).unwrap();
        let info = s.save("notes", "a", "bob", &json!({"v": 2})).unwrap();
        assert_eq!(info.created_by, "alice");
        assert_eq!(s.get("notes", "a", None).unwrap().content, json!({"v": 2}));
    }

    #[test]
    fn sub_document_access() {
        let s = store();
        s.save("notes", "a", "alice", &json!({"meta": {"title": "t", "done": false}, "tags": ["x", "y"]}))
            .unwrap();
        assert_eq!(s.get("notes", "a", Some("meta/title")).unwrap().content, json!("t"));
        assert_eq!(s.get("notes", "a", Some("meta.done")).unwrap().content, json!(false));
        assert_eq!(s.get("notes", "a", Some("tags/1")).unwrap().content, json!("y"));
        assert_eq!(s.get("notes", "a", Some("meta")).unwrap().content, json!({"title": "t", "done": false}));
        assert!(matches!(
            s.get("notes", "a", Some("meta/missing")),
            Err(StoreError::RecordNotFound { .. })
        ));
        assert!(matches!(
            s.get("notes", "a", Some("x\"); DROP TABLE users; --")),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn numeric_object_keys_are_reachable() {
        let s = store();
        s.save("notes", "a", "alice", &json!({"2024": {"q": [10, 20]}})).unwrap();
        assert_eq!(s.get("notes", "a", Some("2024")).unwrap().content, json!({"q": [10, 20]}));
        assert_eq!(s.get("notes", "a", Some("2024/q/1")).unwrap().content, json!(20));
        assert!(matches!(
            s.get("notes", "a", Some("2024/q/5")),
            Err(StoreError::RecordNotFound { .. })
        ));
        s.save_graft("notes", "a", "g", "bob", &json!({"7": "seven"})).unwrap();
        assert_eq!(s.get_graft("notes", "a", "g", Some("7")).unwrap().content, json!("seven"));
    }

    #[test]
    fn patch_merges_and_checks_size() {
        let s = store();
        s.save("notes", "a", "alice", &json!({"a": 1, "b": {"c": 2}})).unwrap();
        let info = s.update("notes", "a", &json!({"b": {"c": null, "d": 3}}), None).unwrap();
        let data = s.get("notes", "a", None).unwrap();
        assert_eq!(data.content, json!({"a": 1, "b": {"d": 3}}));
        assert_eq!(info.size, content_size(&data.content));

        let err = s.update("notes", "a", &json!({"big": "x".repeat(100)}), Some(50)).unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { max: 50, .. }));
        assert_eq!(s.get("notes", "a", None).unwrap().content, json!({"a": 1, "b": {"d": 3}}));

        assert!(matches!(
            s.update("notes", "zz", &json!({}), None),
            Err(StoreError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn delete_missing_record() {
        let s = store();
        s.save("notes", "a", "alice", &json!({})).unwrap();
        s.delete("notes", "a").unwrap();
        assert!(matches!(s.delete("notes", "a"), Err(StoreError::RecordNotFound { .. })));
    }

    #[test]
    fn list_is_lazy_ordered_and_filterable() {
        let s = SqlStore::open(StoreConfig {
            page_size: 2,
            ..StoreConfig::default()
        })
        .unwrap();
        for (id, n) in [("c", 3), ("a", 1), ("e", 5), ("b", 2), ("d", 4)] {
            s.save("nums", id, "alice", &json!({"n": n})).unwrap();
        }
        let ids: Vec<_> = s
            .list("nums", ListOptions::default())
            .unwrap()
            .collect_rows()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c", "d", "e"]);

        let options = ListOptions::default().condition(Condition::Ge("n".into(), json!(2))).limit(2);
        let ids: Vec<_> = s
            .list("nums", options)
            .unwrap()
            .collect_rows()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, ["b", "c"]);

        let options = ListOptions::default().filter(|d: &Data| Ok(d.content["n"].as_i64() == Some(4)));
        let rows = s.list("nums", options).unwrap().collect_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "d");
    }

    // -----------------------------------------------------------------------
    // Grafts
    // -----------------------------------------------------------------------

    #[test]
    fn graft_requires_parent() {
        let s = store();
        s.save("notes", "a", "alice", &json!({})).unwrap();
        let err = s.save_graft("notes", "missing", "g1", "bob", &json!({})).unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound { ref id, .. } if id == "missing"));
    }

    #[test]
    fn deleting_record_cascades_to_grafts() {
        let s = store();
        s.save("notes", "a", "alice", &json!({})).unwrap();
        s.save("notes", "b", "alice", &json!({})).unwrap();
        s.save_graft("notes", "a", "g1", "bob", &json!({"rev": 1})).unwrap();
        s.save_graft("notes", "a", "g2", "bob", &json!({"rev": 2})).unwrap();
        s.save_graft("notes", "b", "g1", "bob", &json!({"rev": 1})).unwrap();

        s.delete("notes", "a").unwrap();
        assert!(matches!(s.graft_info("notes", "a", "g1"), Err(StoreError::GraftNotFound { .. })));
        assert!(matches!(s.graft_info("notes", "a", "g2"), Err(StoreError::GraftNotFound { .. })));
        assert!(s.graft_info("notes", "b", "g1").is_ok());
    }

    #[test]
    fn graft_get_list_delete() {
        let s = store();
        s.save("notes", "a", "alice", &json!({})).unwrap();
        for i in 0..3 {
            s.save_graft("notes", "a", &format!("g{i}"), "bob", &json!({"rev": i, "note": {"x": i}}))
                .unwrap();
        }
        let graft = s.get_graft("notes", "a", "g1", None).unwrap();
        assert_eq!(graft.content["rev"], json!(1));
        assert_eq!(graft.created_by, "bob");
        assert_eq!(s.get_graft("notes", "a", "g2", Some("note/x")).unwrap().content, json!(2));

        let grafts = s.list_grafts("notes", "a", ListOptions::default()).unwrap().collect_rows().unwrap();
        assert_eq!(grafts.len(), 3);

        s.delete_graft("notes", "a", "g0").unwrap();
        assert!(matches!(s.delete_graft("notes", "a", "g0"), Err(StoreError::GraftNotFound { .. })));
        assert!(matches!(
            s.list_grafts("notes", "nope", ListOptions::default()),
            Err(StoreError::RecordNotFound { .. })
        ));
    }
}
