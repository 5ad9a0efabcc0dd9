use serde_json::Value;

use grafton_store::check_setting;
use grafton_types::{content_size, NewUser, SettingsPath};

use crate::chain::{Layer, LayerKind, Next};
use crate::config::ChainConfig;
use crate::context::RequestContext;
use crate::error::{ChainError, ChainResult};
use crate::handler::{Request, Response};

use super::{guard_admin_write, lookup};

/// Structural checks on every request before it reaches policy.
///
/// Rejects empty or oversized names, settings paths outside the allow-list
/// and payloads above `data/maxsize`. Valid requests pass unchanged.
#[derive(Clone, Debug)]
pub struct ValidationLayer {
    config: ChainConfig,
}

impl ValidationLayer {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }

    fn collection(&self, name: &str) -> ChainResult<()> {
        if name.is_empty() {
            return Err(ChainError::bad_input("collection is required"));
        }
        if name.len() > self.config.max_collection_name {
            return Err(ChainError::bad_input(format!(
                "collection name exceeds {} bytes",
                self.config.max_collection_name
            )));
        }
        Ok(())
    }

    fn id(&self, field: &str, id: &str) -> ChainResult<()> {
        if id.is_empty() {
            return Err(ChainError::bad_input(format!("{field} is required")));
        }
        if id.len() > self.config.max_id_len {
            return Err(ChainError::bad_input(format!(
                "{field} exceeds {} bytes",
                self.config.max_id_len
            )));
        }
        if id.contains('/') {
            return Err(ChainError::bad_input(format!("{field} must not contain '/'")));
        }
        Ok(())
    }

    fn new_user(&self, user: &NewUser) -> ChainResult<()> {
        self.id("user id", &user.id)?;
        if user.id == self.config.admin_identity {
            return Err(ChainError::bad_input("user id is reserved"));
        }
        if user.password.is_empty() {
            return Err(ChainError::bad_input("password is required"));
        }
        if !user.email.contains('@') {
            return Err(ChainError::bad_input("email is invalid"));
        }
        Ok(())
    }

    fn payload(&self, next: Next<'_>, ctx: &RequestContext, content: &Value) -> ChainResult<()> {
        let settings = lookup::settings(next, ctx)?;
        let max = lookup::max_size(&settings);
        let size = content_size(content);
        if size > max {
            tracing::debug!(size, max, "payload rejected");
            return Err(ChainError::bad_input(format!(
                "payload of {size} bytes exceeds maximum of {max}"
            )));
        }
        Ok(())
    }
}

impl Layer for ValidationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Validation
    }

    fn handle<'a>(
        &'a self,
        next: Next<'a>,
        ctx: &'a RequestContext,
        request: Request<'a>,
    ) -> ChainResult<Response<'a>> {
        guard_admin_write(&self.config.admin_identity, ctx, request.operation())?;

        match &request {
            Request::GetSettings { .. } | Request::ListUsers | Request::Collections => {}
            Request::SetSettings { path, value } => {
                let path: SettingsPath = path.parse()?;
                check_setting(path, value)?;
            }
            Request::RegisterUser(user) | Request::CreateUser(user) => self.new_user(user)?,
            Request::ValidateUser { id, .. } | Request::UserInfo { id } => self.id("user id", id)?,
            Request::PutData(put) => {
                self.collection(&put.collection)?;
                self.id("id", &put.id)?;
                self.payload(next, ctx, &put.content)?;
            }
            Request::PatchData(patch) => {
                self.collection(&patch.collection)?;
                self.id("id", &patch.id)?;
                self.payload(next, ctx, &patch.patch)?;
            }
            Request::GetData(get) => {
                self.collection(&get.collection)?;
                self.id("id", &get.id)?;
            }
            Request::DataInfo(key) | Request::DeleteData(key) => {
                self.collection(&key.collection)?;
                self.id("id", &key.id)?;
            }
            Request::ListData { collection, .. } => self.collection(collection)?,
            Request::SaveGraft(save) => {
                self.collection(&save.collection)?;
                self.id("data id", &save.data_id)?;
                self.id("graft id", &save.id)?;
                self.payload(next, ctx, &save.content)?;
            }
            Request::GetGraft(get) => {
                self.collection(&get.collection)?;
                self.id("data id", &get.data_id)?;
                self.id("graft id", &get.id)?;
            }
            Request::GraftInfo(key) | Request::DeleteGraft(key) => {
                self.collection(&key.collection)?;
                self.id("data id", &key.data_id)?;
                self.id("graft id", &key.id)?;
            }
            Request::ListGrafts {
                collection, data_id, ..
            } => {
                self.collection(collection)?;
                self.id("data id", data_id)?;
            }
        }

        next.run(ctx, request)
    }
}
