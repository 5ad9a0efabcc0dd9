use grafton_policy::{AclGrant, AclSource, FunctionError};
use grafton_store::IdentityStore;
use grafton_types::DataUri;

use crate::context::RequestCache;

/// Backs the rule function `acl(uid, uri)` with the permission table.
///
/// Answers are memoized per request, so a list filter asks the store once
/// per distinct uri.
pub struct StoreAcl<'a> {
    identity: &'a dyn IdentityStore,
    cache: &'a RequestCache,
}

impl<'a> StoreAcl<'a> {
    pub fn new(identity: &'a dyn IdentityStore, cache: &'a RequestCache) -> Self {
        Self { identity, cache }
    }
}

impl AclSource for StoreAcl<'_> {
    fn grant(&self, uid: &str, uri: &str) -> Result<AclGrant, FunctionError> {
        let parsed: DataUri = uri.parse()?;
        let grant = self.cache.acl(uid, uri, || {
            let (read, write) = self.identity.acl(uid, &parsed)?;
            Ok(AclGrant { read, write })
        })?;
        Ok(grant)
    }
}
