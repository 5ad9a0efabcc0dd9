//! Request-scoped state: the caller, a cancellation token and the memo cache.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use grafton_policy::{AclGrant, Program};
use grafton_types::{Caller, DataInfo, GraftInfo, User};

use crate::error::{ChainError, ChainResult};

/// Everything one request carries through the chain.
///
/// A context is created per request and dropped with it; nothing in it is
/// shared between requests.
#[derive(Debug)]
pub struct RequestContext {
    caller: Caller,
    cache: RequestCache,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(caller: Caller) -> Self {
        Self::with_cancel(caller, CancellationToken::new())
    }

    /// Tie the request to an external cancellation token (client disconnect,
    /// server shutdown).
    pub fn with_cancel(caller: Caller, cancel: CancellationToken) -> Self {
        Self {
            caller,
            cache: RequestCache::default(),
            cancel,
        }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> ChainResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RequestCache
// ---------------------------------------------------------------------------

/// Per-request memoization of lookups the chain repeats.
///
/// Entries hold only successful loads; a failed load is retried on the next
/// lookup. Writes made through the chain invalidate what they change.
#[derive(Debug, Default)]
pub struct RequestCache {
    settings: RefCell<Option<Rc<Value>>>,
    users: RefCell<HashMap<String, Option<User>>>,
    data: RefCell<HashMap<String, DataInfo>>,
    grafts: RefCell<HashMap<String, GraftInfo>>,
    programs: RefCell<HashMap<String, Rc<Program>>>,
    acl: RefCell<HashMap<String, AclGrant>>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

fn data_key(collection: &str, id: &str) -> String {
    format!("{collection}\0{id}")
}

fn graft_key(collection: &str, data_id: &str, id: &str) -> String {
    format!("{collection}\0{data_id}\0{id}")
}

impl RequestCache {
    /// The whole settings document.
    pub fn settings(&self, load: impl FnOnce() -> ChainResult<Value>) -> ChainResult<Rc<Value>> {
        let cached = self.settings.borrow().clone();
        if let Some(document) = cached {
            self.hit("settings");
            return Ok(document);
        }
        self.misses.set(self.misses.get() + 1);
        let document = Rc::new(load()?);
        *self.settings.borrow_mut() = Some(document.clone());
        Ok(document)
    }

    /// A user row, `None` when no such user exists.
    pub fn user(
        &self,
        id: &str,
        load: impl FnOnce() -> ChainResult<Option<User>>,
    ) -> ChainResult<Option<User>> {
        self.memo(&self.users, id.to_string(), load)
    }

    pub fn data_info(
        &self,
        collection: &str,
        id: &str,
        load: impl FnOnce() -> ChainResult<DataInfo>,
    ) -> ChainResult<DataInfo> {
        self.memo(&self.data, data_key(collection, id), load)
    }

    pub fn graft_info(
        &self,
        collection: &str,
        data_id: &str,
        id: &str,
        load: impl FnOnce() -> ChainResult<GraftInfo>,
    ) -> ChainResult<GraftInfo> {
        self.memo(&self.grafts, graft_key(collection, data_id, id), load)
    }

    /// A compiled rule, keyed by its source text.
    pub fn program(
        &self,
        rule: &str,
        compile: impl FnOnce() -> ChainResult<Program>,
    ) -> ChainResult<Rc<Program>> {
        self.memo(&self.programs, rule.to_string(), || compile().map(Rc::new))
    }

    /// An `acl()` answer for one user and data uri.
    pub fn acl(
        &self,
        uid: &str,
        uri: &str,
        load: impl FnOnce() -> ChainResult<AclGrant>,
    ) -> ChainResult<AclGrant> {
        self.memo(&self.acl, data_key(uid, uri), load)
    }

    pub fn invalidate_settings(&self) {
        self.settings.borrow_mut().take();
        // Compiled programs stay valid: they are keyed by rule text.
    }

    pub fn invalidate_user(&self, id: &str) {
        self.users.borrow_mut().remove(id);
    }

    /// Forget a record and every graft cached under it.
    pub fn invalidate_data(&self, collection: &str, id: &str) {
        self.data.borrow_mut().remove(&data_key(collection, id));
        let prefix = graft_key(collection, id, "");
        self.grafts.borrow_mut().retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn invalidate_graft(&self, collection: &str, data_id: &str, id: &str) {
        self.grafts.borrow_mut().remove(&graft_key(collection, data_id, id));
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> usize {
        self.hits.get()
    }

    /// Lookups that had to load.
    pub fn misses(&self) -> usize {
        self.misses.get()
    }

    fn memo<V: Clone>(
        &self,
        map: &RefCell<HashMap<String, V>>,
        key: String,
        load: impl FnOnce() -> ChainResult<V>,
    ) -> ChainResult<V> {
        let cached = map.borrow().get(&key).cloned();
        if let Some(value) = cached {
            self.hit(&key);
            return Ok(value);
        }
        self.misses.set(self.misses.get() + 1);
        // The borrow is released before loading: loaders re-enter the chain.
        let value = load()?;
        map.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    fn hit(&self, key: &str) {
        self.hits.set(self.hits.get() + 1);
        tracing::debug!(key = %key.replace('\0', "/"), "request cache hit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(collection: &str, id: &str) -> DataInfo {
        DataInfo {
            id: id.into(),
            collection: collection.into(),
            created_by: "alice".into(),
            ..DataInfo::default()
        }
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let cache = RequestCache::default();
        let mut loads = 0;
        for _ in 0..3 {
            let got = cache
                .data_info("notes", "a", || {
                    loads += 1;
                    Ok(info("notes", "a"))
                })
                .unwrap();
            assert_eq!(got.created_by, "alice");
        }
        assert_eq!(loads, 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = RequestCache::default();
        let err = cache
            .data_info("notes", "a", || Err(ChainError::NotFound("notes/a".into())))
            .unwrap_err();
        assert!(err.is_not_found());
        let got = cache.data_info("notes", "a", || Ok(info("notes", "a"))).unwrap();
        assert_eq!(got.id, "a");
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn invalidating_a_record_drops_its_grafts() {
        let cache = RequestCache::default();
        cache.data_info("notes", "a", || Ok(info("notes", "a"))).unwrap();
        cache
            .graft_info("notes", "a", "v1", || Ok(GraftInfo::default()))
            .unwrap();
        cache
            .graft_info("notes", "ab", "v1", || Ok(GraftInfo::default()))
            .unwrap();

        cache.invalidate_data("notes", "a");

        let mut reloaded = Vec::new();
        cache
            .data_info("notes", "a", || {
                reloaded.push("data");
                Ok(info("notes", "a"))
            })
            .unwrap();
        cache
            .graft_info("notes", "a", "v1", || {
                reloaded.push("graft a");
                Ok(GraftInfo::default())
            })
            .unwrap();
        cache
            .graft_info("notes", "ab", "v1", || {
                reloaded.push("graft ab");
                Ok(GraftInfo::default())
            })
            .unwrap();
        assert_eq!(reloaded, vec!["data", "graft a"]);
    }

    #[test]
    fn settings_document_is_shared() {
        let cache = RequestCache::default();
        let first = cache.settings(|| Ok(json!({"data": {"maxsize": 10}}))).unwrap();
        let second = cache.settings(|| panic!("should be cached")).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        cache.invalidate_settings();
        let third = cache.settings(|| Ok(json!({}))).unwrap();
        assert_eq!(*third, json!({}));
    }

    #[test]
    fn unknown_users_are_remembered() {
        let cache = RequestCache::default();
        assert_eq!(cache.user("ghost", || Ok(None)).unwrap(), None);
        assert_eq!(cache.user("ghost", || panic!("should be cached")).unwrap(), None);
        cache.invalidate_user("ghost");
        let user = User {
            id: "ghost".into(),
            ..User::default()
        };
        assert_eq!(cache.user("ghost", || Ok(Some(user.clone()))).unwrap(), Some(user));
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_cancel(Caller::anonymous(), token.clone());
        ctx.check_cancelled().unwrap();
        token.cancel();
        assert_eq!(ctx.check_cancelled(), Err(ChainError::Cancelled));
    }
}
