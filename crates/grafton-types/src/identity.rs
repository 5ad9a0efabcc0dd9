use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ADMIN_IDENTITY;

/// The identity attached to a request by the authentication middleware.
///
/// Grafton never authenticates anyone itself: by the time a request reaches
/// the handler chain the username (if any) has already been verified.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Verified username, `None` for anonymous requests.
    pub username: Option<String>,
    /// Opaque claims carried over from the credential (token claims, etc.).
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            username: Some(name.into()),
            claims: BTreeMap::new(),
        }
    }

    /// The reserved administrator identity.
    pub fn admin() -> Self {
        Self::user(ADMIN_IDENTITY)
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Returns `true` if the username equals `admin_identity`.
    pub fn is(&self, admin_identity: &str) -> bool {
        self.username.as_deref() == Some(admin_identity)
    }

    /// Username or the empty string for anonymous callers.
    pub fn uid(&self) -> &str {
        self.username.as_deref().unwrap_or("")
    }
}

/// A registered user. The password hash never leaves the identity store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub validated: bool,
    pub created_at: DateTime<Utc>,
    pub group: Option<String>,
}

/// Input for user registration and creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub password: String,
    pub email: String,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub description: String,
}

/// Grants a user read and/or write access to a record or a pattern of records.
///
/// `data_uri` is `collection/id`, `collection/*` or `*`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub user: String,
    pub data_uri: String,
    pub read: bool,
    pub write: bool,
}

/// A named access grant held by a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub id: String,
    pub user: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_variants() {
        let anon = Caller::anonymous();
        assert!(anon.is_anonymous());
        assert_eq!(anon.uid(), "");

        let alice = Caller::user("alice").with_claim("scope", "rw");
        assert_eq!(alice.uid(), "alice");
        assert_eq!(alice.claims.get("scope").map(String::as_str), Some("rw"));
        assert!(!alice.is(ADMIN_IDENTITY));

        assert!(Caller::admin().is(ADMIN_IDENTITY));
    }
}
