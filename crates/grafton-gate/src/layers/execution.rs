use grafton_types::SettingsPath;

use crate::chain::{Layer, LayerKind, Next, Stores};
use crate::context::RequestContext;
use crate::error::ChainResult;
use crate::handler::{Request, Response};

use super::lookup;

/// Performs each request against the stores.
///
/// The last layer of the standard chain; it answers every request itself.
/// Writes invalidate the request cache entries they change.
#[derive(Clone, Debug)]
pub struct ExecutionLayer {
    stores: Stores,
}

impl ExecutionLayer {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

impl Layer for ExecutionLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Execution
    }

    fn handle<'a>(
        &'a self,
        next: Next<'a>,
        ctx: &'a RequestContext,
        request: Request<'a>,
    ) -> ChainResult<Response<'a>> {
        let Stores {
            records,
            settings,
            identity,
        } = &self.stores;
        let cache = ctx.cache();
        let uid = ctx.caller().uid();

        let response = match request {
            Request::GetSettings { path } => Response::Value(settings.get_setting(&path)?),
            Request::SetSettings { path, value } => {
                let path: SettingsPath = path.parse()?;
                settings.set_setting(path, value)?;
                cache.invalidate_settings();
                Response::Unit
            }
            Request::RegisterUser(mut user) => {
                user.validated = false;
                user.group = None;
                let created = identity.create_user(&user)?;
                cache.invalidate_user(&created.id);
                tracing::info!(user = %created.id, "user registered");
                Response::User(created)
            }
            Request::CreateUser(user) => {
                let created = identity.create_user(&user)?;
                cache.invalidate_user(&created.id);
                tracing::info!(user = %created.id, "user created");
                Response::User(created)
            }
            Request::ValidateUser { id, validated } => {
                identity.set_validated(&id, validated)?;
                cache.invalidate_user(&id);
                Response::User(identity.user(&id)?)
            }
            Request::UserInfo { id } => Response::User(identity.user(&id)?),
            Request::ListUsers => Response::Users(identity.users()?),
            Request::Collections => Response::Collections(records.collections()?),
            Request::PutData(put) => {
                let info = records.save(&put.collection, &put.id, uid, &put.content)?;
                cache.invalidate_data(&put.collection, &put.id);
                Response::DataInfo(info)
            }
            Request::PatchData(patch) => {
                let settings = lookup::settings(next, ctx)?;
                let max = lookup::max_size(&settings);
                let info = records.update(&patch.collection, &patch.id, &patch.patch, Some(max))?;
                cache.invalidate_data(&patch.collection, &patch.id);
                Response::DataInfo(info)
            }
            Request::GetData(get) => Response::Data(records.get(&get.collection, &get.id, get.path.as_deref())?),
            Request::DataInfo(key) => Response::DataInfo(records.info(&key.collection, &key.id)?),
            Request::DeleteData(key) => {
                records.delete(&key.collection, &key.id)?;
                cache.invalidate_data(&key.collection, &key.id);
                Response::Unit
            }
            Request::ListData {
                collection,
                mut options,
            } => {
                options.cancel.get_or_insert_with(|| ctx.cancellation().clone());
                Response::DataCursor(records.list(&collection, options)?)
            }
            Request::SaveGraft(save) => {
                let info = records.save_graft(&save.collection, &save.data_id, &save.id, uid, &save.content)?;
                cache.invalidate_graft(&save.collection, &save.data_id, &save.id);
                Response::GraftInfo(info)
            }
            Request::GetGraft(get) => Response::Graft(records.get_graft(
                &get.collection,
                &get.data_id,
                &get.id,
                get.path.as_deref(),
            )?),
            Request::GraftInfo(key) => Response::GraftInfo(records.graft_info(&key.collection, &key.data_id, &key.id)?),
            Request::DeleteGraft(key) => {
                records.delete_graft(&key.collection, &key.data_id, &key.id)?;
                cache.invalidate_graft(&key.collection, &key.data_id, &key.id);
                Response::Unit
            }
            Request::ListGrafts {
                collection,
                data_id,
                mut options,
            } => {
                options.cancel.get_or_insert_with(|| ctx.cancellation().clone());
                Response::GraftCursor(records.list_grafts(&collection, &data_id, options)?)
            }
        };
        Ok(response)
    }
}
