use serde_json::Value;

use grafton_types::{
    Access, Data, DataInfo, DataUri, Graft, GraftInfo, Group, NewUser, Permission, SettingsPath,
    User,
};

use crate::cursor::{Cursor, ListOptions};
use crate::error::StoreResult;

/// Persistence for records and their grafts.
///
/// Implementations must satisfy these invariants:
/// - A collection's backing storage is created at most once, on its first write.
/// - A graft cannot be stored without its parent record, and deleting a
///   record deletes all of its grafts.
/// - Missing collections, records and grafts are reported as `*NotFound`,
///   never as backend errors.
pub trait RecordStore: Send + Sync {
    /// Names of every collection that has been written to.
    fn collections(&self) -> StoreResult<Vec<String>>;

    /// Insert a record, or replace the content of an existing one.
    ///
    /// Creates the collection on first use. `created_by` is only recorded on
    /// insert; updates keep the original creator and creation time.
    fn save(&self, collection: &str, id: &str, created_by: &str, content: &Value)
        -> StoreResult<DataInfo>;

    /// Apply a JSON merge patch to an existing record.
    ///
    /// Rejects the result with `TooLarge` when it exceeds `max_size`.
    fn update(&self, collection: &str, id: &str, patch: &Value, max_size: Option<u64>)
        -> StoreResult<DataInfo>;

    fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Fetch a record. With `path`, the returned content is the sub-document
    /// at that path.
    fn get(&self, collection: &str, id: &str, path: Option<&str>) -> StoreResult<Data>;

    fn info(&self, collection: &str, id: &str) -> StoreResult<DataInfo>;

    /// Lazily iterate a collection in id order.
    fn list<'a>(&self, collection: &str, options: ListOptions<'a, Data>)
        -> StoreResult<Cursor<'a, Data>>;

    /// Insert a graft, or replace the content of an existing one.
    fn save_graft(
        &self,
        collection: &str,
        data_id: &str,
        id: &str,
        created_by: &str,
        content: &Value,
    ) -> StoreResult<GraftInfo>;

    fn get_graft(&self, collection: &str, data_id: &str, id: &str, path: Option<&str>)
        -> StoreResult<Graft>;

    fn graft_info(&self, collection: &str, data_id: &str, id: &str) -> StoreResult<GraftInfo>;

    fn delete_graft(&self, collection: &str, data_id: &str, id: &str) -> StoreResult<()>;

    /// Lazily iterate the grafts of one record in id order.
    fn list_grafts<'a>(
        &self,
        collection: &str,
        data_id: &str,
        options: ListOptions<'a, Graft>,
    ) -> StoreResult<Cursor<'a, Graft>>;
}

/// The settings document.
pub trait SettingsStore: Send + Sync {
    /// Read the value at a slash- or dot-separated path. The empty path
    /// returns the whole document.
    fn get_setting(&self, path: &str) -> StoreResult<Value>;

    /// Write one allow-listed leaf. The value's type is checked against the
    /// leaf (`data/maxsize` takes an unsigned integer, rules take strings).
    fn set_setting(&self, path: SettingsPath, value: Value) -> StoreResult<()>;
}

/// Users, groups, permissions and access grants.
pub trait IdentityStore: Send + Sync {
    fn create_user(&self, user: &NewUser) -> StoreResult<User>;
    fn user(&self, id: &str) -> StoreResult<User>;
    fn users(&self) -> StoreResult<Vec<User>>;
    fn set_validated(&self, id: &str, validated: bool) -> StoreResult<()>;
    fn set_group(&self, id: &str, group: Option<&str>) -> StoreResult<()>;
    fn verify_password(&self, id: &str, password: &str) -> StoreResult<bool>;

    fn create_group(&self, group: &Group) -> StoreResult<()>;
    fn groups(&self) -> StoreResult<Vec<Group>>;

    /// Insert or replace a permission row.
    fn grant(&self, permission: &Permission) -> StoreResult<()>;
    fn revoke(&self, user: &str, data_uri: &str) -> StoreResult<()>;
    fn permissions(&self, user: &str) -> StoreResult<Vec<Permission>>;

    /// Effective `(read, write)` flags for `user` on `uri`, combining the
    /// exact, collection-wide and global permission rows.
    fn acl(&self, user: &str, uri: &DataUri) -> StoreResult<(bool, bool)>;

    fn create_access(&self, user: &str, label: &str) -> StoreResult<Access>;
    fn accesses(&self, user: &str) -> StoreResult<Vec<Access>>;
    fn revoke_access(&self, id: &str) -> StoreResult<()>;
}
