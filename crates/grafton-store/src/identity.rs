//! Users, groups, permissions and access grants.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use grafton_types::{Access, DataUri, Group, NewUser, Permission, User};

use crate::error::{is_foreign_key_violation, translate, StoreError, StoreResult};
use crate::sqlite::SqlStore;
use crate::traits::IdentityStore;

const USER_COLUMNS: &str = "id, email, validated, created_at, group_id";

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> StoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| StoreError::Password(err.to_string()))
}

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        validated: row.get(2)?,
        created_at: row.get::<_, DateTime<Utc>>(3)?,
        group: row.get(4)?,
    })
}

fn require_changed(changed: usize, id: &str) -> StoreResult<()> {
    if changed == 0 {
        Err(StoreError::UserNotFound(id.to_string()))
    } else {
        Ok(())
    }
}

impl IdentityStore for SqlStore {
    fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        if user.password.is_empty() {
            return Err(StoreError::InvalidInput("password must not be empty".into()));
        }
        let hash = hash_password(&user.password)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (id, password, email, validated, created_at, group_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user.id, hash, user.email, user.validated, Utc::now(), user.group],
        )
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                StoreError::InvalidInput(format!("unknown group: {}", user.group.as_deref().unwrap_or_default()))
            } else {
                match translate(err) {
                    StoreError::Conflict(_) => StoreError::Conflict(format!("user {} already exists", user.id)),
                    other => other,
                }
            }
        })?;
        tracing::info!(user = %user.id, "user created");
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user.id],
            user_row,
        )
        .map_err(StoreError::from)
    }

    fn user(&self, id: &str) -> StoreResult<User> {
        self.lock()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::UserNotFound(id.to_string()))
    }

    fn users(&self) -> StoreResult<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let users = stmt.query_map([], user_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn set_validated(&self, id: &str, validated: bool) -> StoreResult<()> {
        let changed = self
            .lock()
            .execute("UPDATE users SET validated = ?1 WHERE id = ?2", params![validated, id])?;
        require_changed(changed, id)
    }

    fn set_group(&self, id: &str, group: Option<&str>) -> StoreResult<()> {
        let changed = self
            .lock()
            .execute("UPDATE users SET group_id = ?1 WHERE id = ?2", params![group, id])
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::InvalidInput(format!("unknown group: {}", group.unwrap_or_default()))
                } else {
                    translate(err)
                }
            })?;
        require_changed(changed, id)
    }

    fn verify_password(&self, id: &str, password: &str) -> StoreResult<bool> {
        let stored: Option<String> = self
            .lock()
            .query_row("SELECT password FROM users WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        let stored = stored.ok_or_else(|| StoreError::UserNotFound(id.to_string()))?;
        let parsed = PasswordHash::new(&stored).map_err(|err| StoreError::Password(err.to_string()))?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    }

    fn create_group(&self, group: &Group) -> StoreResult<()> {
        self.lock()
            .execute(
                "INSERT INTO groups (id, description) VALUES (?1, ?2)",
                params![group.id, group.description],
            )
            .map_err(|err| match translate(err) {
                StoreError::Conflict(_) => StoreError::Conflict(format!("group {} already exists", group.id)),
                other => other,
            })?;
        Ok(())
    }

    fn groups(&self) -> StoreResult<Vec<Group>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, description FROM groups ORDER BY id")?;
        let groups = stmt
            .query_map([], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    description: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    fn grant(&self, permission: &Permission) -> StoreResult<()> {
        permission
            .data_uri
            .parse::<DataUri>()
            .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
        self.lock()
            .execute(
                "INSERT INTO permissions (user, data_uri, action_read, action_write) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user, data_uri) DO UPDATE SET action_read = excluded.action_read, action_write = excluded.action_write",
                params![permission.user, permission.data_uri, permission.read, permission.write],
            )
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::UserNotFound(permission.user.clone())
                } else {
                    translate(err)
                }
            })?;
        tracing::debug!(user = %permission.user, uri = %permission.data_uri, "permission granted");
        Ok(())
    }

    fn revoke(&self, user: &str, data_uri: &str) -> StoreResult<()> {
        self.lock().execute(
            "DELETE FROM permissions WHERE user = ?1 AND data_uri = ?2",
            params![user, data_uri],
        )?;
        Ok(())
    }

    fn permissions(&self, user: &str) -> StoreResult<Vec<Permission>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT user, data_uri, action_read, action_write FROM permissions WHERE user = ?1 ORDER BY data_uri",
        )?;
        let rows = stmt
            .query_map(params![user], |row| {
                Ok(Permission {
                    user: row.get(0)?,
                    data_uri: row.get(1)?,
                    read: row.get(2)?,
                    write: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn acl(&self, user: &str, uri: &DataUri) -> StoreResult<(bool, bool)> {
        let [exact, collection, global] = uri.patterns();
        let (read, write): (Option<i64>, Option<i64>) = self.lock().query_row(
            "SELECT MAX(action_read), MAX(action_write) FROM permissions
             WHERE user = ?1 AND data_uri IN (?2, ?3, ?4)",
            params![user, exact, collection, global],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((read.unwrap_or(0) != 0, write.unwrap_or(0) != 0))
    }

    fn create_access(&self, user: &str, label: &str) -> StoreResult<Access> {
        let access = Access {
            id: uuid::Uuid::now_v7().to_string(),
            user: user.to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
        };
        self.lock()
            .execute(
                "INSERT INTO accesses (id, user, label, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![access.id, access.user, access.label, access.created_at],
            )
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::UserNotFound(user.to_string())
                } else {
                    translate(err)
                }
            })?;
        Ok(access)
    }

    fn accesses(&self, user: &str) -> StoreResult<Vec<Access>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, user, label, created_at FROM accesses WHERE user = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![user], |row| {
                Ok(Access {
                    id: row.get(0)?,
                    user: row.get(1)?,
                    label: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn revoke_access(&self, id: &str) -> StoreResult<()> {
        self.lock().execute("DELETE FROM accesses WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NewUser {
        NewUser {
            id: "alice".into(),
            password: "hunter2".into(),
            email: "alice@example.com".into(),
            ..NewUser::default()
        }
    }

    #[test]
    fn create_and_fetch_user() {
        let s = SqlStore::in_memory().unwrap();
        let user = s.create_user(&alice()).unwrap();
        assert_eq!(user.id, "alice");
        assert!(!user.validated);
        assert_eq!(s.user("alice").unwrap(), user);
        assert!(matches!(s.create_user(&alice()), Err(StoreError::Conflict(_))));
        assert!(matches!(s.user("bob"), Err(StoreError::UserNotFound(_))));
    }

    #[test]
    fn password_is_hashed_and_verifiable() {
        let s = SqlStore::in_memory().unwrap();
        s.create_user(&alice()).unwrap();
        let stored: String = s
            .lock()
            .query_row("SELECT password FROM users WHERE id = 'alice'", [], |row| row.get(0))
            .unwrap();
        assert!(stored.starts_with("$argon2"));
        assert!(s.verify_password("alice", "hunter2").unwrap());
        assert!(!s.verify_password("alice", "wrong").unwrap());

        let empty = NewUser { password: String::new(), ..alice() };
        assert!(matches!(s.create_user(&empty), Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn validation_and_groups() {
        let s = SqlStore::in_memory().unwrap();
        s.create_user(&alice()).unwrap();
        s.set_validated("alice", true).unwrap();
        assert!(s.user("alice").unwrap().validated);
        assert!(matches!(s.set_validated("bob", true), Err(StoreError::UserNotFound(_))));

        assert!(matches!(s.set_group("alice", Some("staff")), Err(StoreError::InvalidInput(_))));
        s.create_group(&Group { id: "staff".into(), description: "Staff".into() }).unwrap();
        s.set_group("alice", Some("staff")).unwrap();
        assert_eq!(s.user("alice").unwrap().group.as_deref(), Some("staff"));
        assert_eq!(s.groups().unwrap().len(), 1);
    }

    #[test]
    fn acl_combines_exact_collection_and_global_rows() {
        let s = SqlStore::in_memory().unwrap();
        s.create_user(&alice()).unwrap();
        let uri: DataUri = "notes/a".parse().unwrap();
        assert_eq!(s.acl("alice", &uri).unwrap(), (false, false));

        s.grant(&Permission { user: "alice".into(), data_uri: "notes/*".into(), read: true, write: false })
            .unwrap();
        assert_eq!(s.acl("alice", &uri).unwrap(), (true, false));

        s.grant(&Permission { user: "alice".into(), data_uri: "notes/a".into(), read: false, write: true })
            .unwrap();
        assert_eq!(s.acl("alice", &uri).unwrap(), (true, true));
        assert_eq!(s.acl("alice", &"notes/b".parse().unwrap()).unwrap(), (true, false));
        assert_eq!(s.acl("alice", &"other/a".parse().unwrap()).unwrap(), (false, false));

        s.grant(&Permission { user: "alice".into(), data_uri: "*".into(), read: true, write: true })
            .unwrap();
        assert_eq!(s.acl("alice", &"other/a".parse().unwrap()).unwrap(), (true, true));

        s.revoke("alice", "*").unwrap();
        assert_eq!(s.acl("alice", &"other/a".parse().unwrap()).unwrap(), (false, false));
        assert_eq!(s.permissions("alice").unwrap().len(), 2);
    }

    #[test]
    fn grant_rejects_unknown_user_and_bad_uri() {
        let s = SqlStore::in_memory().unwrap();
        let p = Permission { user: "ghost".into(), data_uri: "notes/a".into(), read: true, write: false };
        assert!(matches!(s.grant(&p), Err(StoreError::UserNotFound(_))));
        s.create_user(&alice()).unwrap();
        let bad = Permission { user: "alice".into(), data_uri: "a/b/c".into(), ..p };
        assert!(matches!(s.grant(&bad), Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn access_lifecycle() {
        let s = SqlStore::in_memory().unwrap();
        s.create_user(&alice()).unwrap();
        let first = s.create_access("alice", "laptop").unwrap();
        let second = s.create_access("alice", "phone").unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(s.accesses("alice").unwrap().len(), 2);
        s.revoke_access(&first.id).unwrap();
        let left = s.accesses("alice").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].label, "phone");
        assert!(matches!(s.create_access("ghost", "x"), Err(StoreError::UserNotFound(_))));
    }
}
