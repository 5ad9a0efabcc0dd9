//! The capability interface shared by the chain, its layers and terminals.

use std::fmt;

use serde_json::Value;

use grafton_store::{Cursor, ListOptions};
use grafton_types::{Data, DataInfo, Graft, GraftInfo, NewUser, User};

use crate::context::RequestContext;
use crate::cursor::ChainCursor;
use crate::error::{ChainError, ChainResult};

/// Write or replace a record.
#[derive(Clone, Debug, PartialEq)]
pub struct PutData {
    pub collection: String,
    pub id: String,
    pub content: Value,
}

/// Merge-patch an existing record.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchData {
    pub collection: String,
    pub id: String,
    pub patch: Value,
}

/// Address of one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataKey {
    pub collection: String,
    pub id: String,
}

/// Read a record, optionally only the sub-document at `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetData {
    pub collection: String,
    pub id: String,
    pub path: Option<String>,
}

/// Write or replace a graft on an existing record.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveGraft {
    pub collection: String,
    pub data_id: String,
    pub id: String,
    pub content: Value,
}

/// Address of one graft.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraftKey {
    pub collection: String,
    pub data_id: String,
    pub id: String,
}

/// Read a graft, optionally only the sub-document at `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetGraft {
    pub collection: String,
    pub data_id: String,
    pub id: String,
    pub path: Option<String>,
}

/// Name of an operation, for logging and authorization decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSettings,
    SetSettings,
    RegisterUser,
    CreateUser,
    ValidateUser,
    UserInfo,
    ListUsers,
    Collections,
    PutData,
    PatchData,
    GetData,
    DataInfo,
    DeleteData,
    ListData,
    SaveGraft,
    GetGraft,
    GraftInfo,
    DeleteGraft,
    ListGrafts,
}

impl Operation {
    /// Operations that modify records or grafts.
    pub fn is_data_write(self) -> bool {
        matches!(
            self,
            Self::PutData | Self::PatchData | Self::DeleteData | Self::SaveGraft | Self::DeleteGraft
        )
    }

    /// Operations only the administrator may perform.
    pub fn is_admin_only(self) -> bool {
        matches!(
            self,
            Self::GetSettings | Self::SetSettings | Self::CreateUser | Self::ValidateUser | Self::ListUsers
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One decoded request.
#[derive(Debug)]
pub enum Request<'a> {
    GetSettings { path: String },
    SetSettings { path: String, value: Value },
    RegisterUser(NewUser),
    CreateUser(NewUser),
    ValidateUser { id: String, validated: bool },
    UserInfo { id: String },
    ListUsers,
    Collections,
    PutData(PutData),
    PatchData(PatchData),
    GetData(GetData),
    DataInfo(DataKey),
    DeleteData(DataKey),
    ListData {
        collection: String,
        options: ListOptions<'a, Data>,
    },
    SaveGraft(SaveGraft),
    GetGraft(GetGraft),
    GraftInfo(GraftKey),
    DeleteGraft(GraftKey),
    ListGrafts {
        collection: String,
        data_id: String,
        options: ListOptions<'a, Graft>,
    },
}

impl Request<'_> {
    pub fn operation(&self) -> Operation {
        match self {
            Self::GetSettings { .. } => Operation::GetSettings,
            Self::SetSettings { .. } => Operation::SetSettings,
            Self::RegisterUser(_) => Operation::RegisterUser,
            Self::CreateUser(_) => Operation::CreateUser,
            Self::ValidateUser { .. } => Operation::ValidateUser,
            Self::UserInfo { .. } => Operation::UserInfo,
            Self::ListUsers => Operation::ListUsers,
            Self::Collections => Operation::Collections,
            Self::PutData(_) => Operation::PutData,
            Self::PatchData(_) => Operation::PatchData,
            Self::GetData(_) => Operation::GetData,
            Self::DataInfo(_) => Operation::DataInfo,
            Self::DeleteData(_) => Operation::DeleteData,
            Self::ListData { .. } => Operation::ListData,
            Self::SaveGraft(_) => Operation::SaveGraft,
            Self::GetGraft(_) => Operation::GetGraft,
            Self::GraftInfo(_) => Operation::GraftInfo,
            Self::DeleteGraft(_) => Operation::DeleteGraft,
            Self::ListGrafts { .. } => Operation::ListGrafts,
        }
    }
}

/// The result of one request.
pub enum Response<'a> {
    Unit,
    Value(Value),
    Collections(Vec<String>),
    User(User),
    Users(Vec<User>),
    DataInfo(DataInfo),
    Data(Data),
    DataCursor(Cursor<'a, Data>),
    GraftInfo(GraftInfo),
    Graft(Graft),
    GraftCursor(Cursor<'a, Graft>),
}

impl<'a> Response<'a> {
    /// The zero value a terminal returns for `operation`.
    pub fn empty(operation: Operation) -> Self {
        match operation {
            Operation::GetSettings => Self::Value(Value::Null),
            Operation::Collections => Self::Collections(Vec::new()),
            Operation::RegisterUser | Operation::CreateUser | Operation::ValidateUser | Operation::UserInfo => {
                Self::User(User::default())
            }
            Operation::ListUsers => Self::Users(Vec::new()),
            Operation::PutData | Operation::PatchData | Operation::DataInfo => Self::DataInfo(DataInfo::default()),
            Operation::GetData => Self::Data(Data::default()),
            Operation::ListData => Self::DataCursor(Cursor::empty()),
            Operation::SaveGraft | Operation::GraftInfo => Self::GraftInfo(GraftInfo::default()),
            Operation::GetGraft => Self::Graft(Graft::default()),
            Operation::ListGrafts => Self::GraftCursor(Cursor::empty()),
            Operation::SetSettings | Operation::DeleteData | Operation::DeleteGraft => Self::Unit,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Value(_) => "value",
            Self::Collections(_) => "collections",
            Self::User(_) => "user",
            Self::Users(_) => "users",
            Self::DataInfo(_) => "data info",
            Self::Data(_) => "data",
            Self::DataCursor(_) => "data cursor",
            Self::GraftInfo(_) => "graft info",
            Self::Graft(_) => "graft",
            Self::GraftCursor(_) => "graft cursor",
        }
    }

    fn mismatch(self, expected: &str) -> ChainError {
        tracing::error!(expected, found = self.name(), "handler returned the wrong response");
        ChainError::Internal("unexpected handler response".into())
    }

    pub fn into_unit(self) -> ChainResult<()> {
        match self {
            Self::Unit => Ok(()),
            other => Err(other.mismatch("unit")),
        }
    }

    pub fn into_value(self) -> ChainResult<Value> {
        match self {
            Self::Value(value) => Ok(value),
            other => Err(other.mismatch("value")),
        }
    }

    pub fn into_collections(self) -> ChainResult<Vec<String>> {
        match self {
            Self::Collections(names) => Ok(names),
            other => Err(other.mismatch("collections")),
        }
    }

    pub fn into_user(self) -> ChainResult<User> {
        match self {
            Self::User(user) => Ok(user),
            other => Err(other.mismatch("user")),
        }
    }

    pub fn into_users(self) -> ChainResult<Vec<User>> {
        match self {
            Self::Users(users) => Ok(users),
            other => Err(other.mismatch("users")),
        }
    }

    pub fn into_data_info(self) -> ChainResult<DataInfo> {
        match self {
            Self::DataInfo(info) => Ok(info),
            other => Err(other.mismatch("data info")),
        }
    }

    pub fn into_data(self) -> ChainResult<Data> {
        match self {
            Self::Data(data) => Ok(data),
            other => Err(other.mismatch("data")),
        }
    }

    pub fn into_data_cursor(self) -> ChainResult<Cursor<'a, Data>> {
        match self {
            Self::DataCursor(cursor) => Ok(cursor),
            other => Err(other.mismatch("data cursor")),
        }
    }

    pub fn into_graft_info(self) -> ChainResult<GraftInfo> {
        match self {
            Self::GraftInfo(info) => Ok(info),
            other => Err(other.mismatch("graft info")),
        }
    }

    pub fn into_graft(self) -> ChainResult<Graft> {
        match self {
            Self::Graft(graft) => Ok(graft),
            other => Err(other.mismatch("graft")),
        }
    }

    pub fn into_graft_cursor(self) -> ChainResult<Cursor<'a, Graft>> {
        match self {
            Self::GraftCursor(cursor) => Ok(cursor),
            other => Err(other.mismatch("graft cursor")),
        }
    }
}

impl fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Response").field(&self.name()).finish()
    }
}

/// Anything that can serve a [`Request`]: the chain itself, a position
/// inside it, or a terminal.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a RequestContext, request: Request<'a>) -> ChainResult<Response<'a>>;
}

/// Typed entry points over [`Handler::handle`].
pub trait HandlerExt: Handler {
    fn get_settings(&self, ctx: &RequestContext, path: &str) -> ChainResult<Value> {
        self.handle(ctx, Request::GetSettings { path: path.to_string() })?
            .into_value()
    }

    fn set_settings(&self, ctx: &RequestContext, path: &str, value: Value) -> ChainResult<()> {
        self.handle(
            ctx,
            Request::SetSettings {
                path: path.to_string(),
                value,
            },
        )?
        .into_unit()
    }

    /// Self-service registration; the new user starts unvalidated.
    fn register_user(&self, ctx: &RequestContext, user: NewUser) -> ChainResult<User> {
        self.handle(ctx, Request::RegisterUser(user))?.into_user()
    }

    fn create_user(&self, ctx: &RequestContext, user: NewUser) -> ChainResult<User> {
        self.handle(ctx, Request::CreateUser(user))?.into_user()
    }

    fn validate_user(&self, ctx: &RequestContext, id: &str, validated: bool) -> ChainResult<User> {
        self.handle(
            ctx,
            Request::ValidateUser {
                id: id.to_string(),
                validated,
            },
        )?
        .into_user()
    }

    fn user_info(&self, ctx: &RequestContext, id: &str) -> ChainResult<User> {
        self.handle(ctx, Request::UserInfo { id: id.to_string() })?
            .into_user()
    }

    fn list_users(&self, ctx: &RequestContext) -> ChainResult<Vec<User>> {
        self.handle(ctx, Request::ListUsers)?.into_users()
    }

    fn collections(&self, ctx: &RequestContext) -> ChainResult<Vec<String>> {
        self.handle(ctx, Request::Collections)?.into_collections()
    }

    fn put_data(&self, ctx: &RequestContext, collection: &str, id: &str, content: Value) -> ChainResult<DataInfo> {
        let request = Request::PutData(PutData {
            collection: collection.to_string(),
            id: id.to_string(),
            content,
        });
        self.handle(ctx, request)?.into_data_info()
    }

    fn patch_data(&self, ctx: &RequestContext, collection: &str, id: &str, patch: Value) -> ChainResult<DataInfo> {
        let request = Request::PatchData(PatchData {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        });
        self.handle(ctx, request)?.into_data_info()
    }

    fn get_data(&self, ctx: &RequestContext, collection: &str, id: &str, path: Option<&str>) -> ChainResult<Data> {
        let request = Request::GetData(GetData {
            collection: collection.to_string(),
            id: id.to_string(),
            path: path.map(str::to_string),
        });
        self.handle(ctx, request)?.into_data()
    }

    fn data_info(&self, ctx: &RequestContext, collection: &str, id: &str) -> ChainResult<DataInfo> {
        let request = Request::DataInfo(DataKey {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self.handle(ctx, request)?.into_data_info()
    }

    fn delete_data(&self, ctx: &RequestContext, collection: &str, id: &str) -> ChainResult<()> {
        let request = Request::DeleteData(DataKey {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self.handle(ctx, request)?.into_unit()
    }

    fn list_data<'a>(
        &'a self,
        ctx: &'a RequestContext,
        collection: &str,
        options: ListOptions<'a, Data>,
    ) -> ChainResult<ChainCursor<'a, Data>> {
        let request = Request::ListData {
            collection: collection.to_string(),
            options,
        };
        Ok(ChainCursor::new(self.handle(ctx, request)?.into_data_cursor()?))
    }

    fn save_graft(
        &self,
        ctx: &RequestContext,
        collection: &str,
        data_id: &str,
        id: &str,
        content: Value,
    ) -> ChainResult<GraftInfo> {
        let request = Request::SaveGraft(SaveGraft {
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            id: id.to_string(),
            content,
        });
        self.handle(ctx, request)?.into_graft_info()
    }

    fn get_graft(
        &self,
        ctx: &RequestContext,
        collection: &str,
        data_id: &str,
        id: &str,
        path: Option<&str>,
    ) -> ChainResult<Graft> {
        let request = Request::GetGraft(GetGraft {
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            id: id.to_string(),
            path: path.map(str::to_string),
        });
        self.handle(ctx, request)?.into_graft()
    }

    fn graft_info(&self, ctx: &RequestContext, collection: &str, data_id: &str, id: &str) -> ChainResult<GraftInfo> {
        let request = Request::GraftInfo(GraftKey {
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            id: id.to_string(),
        });
        self.handle(ctx, request)?.into_graft_info()
    }

    fn delete_graft(&self, ctx: &RequestContext, collection: &str, data_id: &str, id: &str) -> ChainResult<()> {
        let request = Request::DeleteGraft(GraftKey {
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            id: id.to_string(),
        });
        self.handle(ctx, request)?.into_unit()
    }

    fn list_grafts<'a>(
        &'a self,
        ctx: &'a RequestContext,
        collection: &str,
        data_id: &str,
        options: ListOptions<'a, Graft>,
    ) -> ChainResult<ChainCursor<'a, Graft>> {
        let request = Request::ListGrafts {
            collection: collection.to_string(),
            data_id: data_id.to_string(),
            options,
        };
        Ok(ChainCursor::new(self.handle(ctx, request)?.into_graft_cursor()?))
    }
}

impl<H: Handler + ?Sized> HandlerExt for H {}

/// Terminal that performs nothing and answers every request with an empty
/// response.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl Handler for NoopHandler {
    fn handle<'a>(&'a self, _ctx: &'a RequestContext, request: Request<'a>) -> ChainResult<Response<'a>> {
        Ok(Response::empty(request.operation()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafton_types::Caller;
    use serde_json::json;

    #[test]
    fn operation_classes() {
        assert!(Operation::PutData.is_data_write());
        assert!(Operation::DeleteGraft.is_data_write());
        assert!(!Operation::GetData.is_data_write());
        assert!(Operation::SetSettings.is_admin_only());
        assert!(!Operation::RegisterUser.is_admin_only());
        assert!(!Operation::UserInfo.is_admin_only());
    }

    #[test]
    fn noop_answers_with_empty_values() {
        let ctx = RequestContext::new(Caller::anonymous());
        let noop = NoopHandler;
        assert_eq!(noop.put_data(&ctx, "c", "a", json!({})).unwrap(), DataInfo::default());
        assert!(noop.collections(&ctx).unwrap().is_empty());
        assert_eq!(noop.get_settings(&ctx, "data/maxsize").unwrap(), Value::Null);
        noop.delete_data(&ctx, "c", "a").unwrap();
        let rows = noop
            .list_data(&ctx, "c", ListOptions::default())
            .unwrap()
            .collect_rows()
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn response_mismatch_is_internal() {
        let err = Response::Unit.into_data().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }
}
