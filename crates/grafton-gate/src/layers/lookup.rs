//! Internal lookups the layers issue through the chain.
//!
//! Every lookup skips validation and policy and goes through the request
//! cache, so a list that authorizes many rows loads each dependency once.

use std::rc::Rc;

use serde_json::Value;

use grafton_store::DEFAULT_MAX_SIZE;
use grafton_types::{DataInfo, GraftInfo, RuleAction, RuleTarget, User};

use crate::chain::{Bypass, Next};
use crate::context::RequestContext;
use crate::error::ChainResult;
use crate::handler::HandlerExt;

fn internal(next: Next<'_>) -> Next<'_> {
    next.bypass(Bypass::VALIDATION | Bypass::POLICY)
}

fn optional<T>(result: ChainResult<T>) -> ChainResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// The whole settings document.
pub(crate) fn settings(next: Next<'_>, ctx: &RequestContext) -> ChainResult<Rc<Value>> {
    ctx.cache().settings(|| internal(next).get_settings(ctx, ""))
}

pub(crate) fn max_size(settings: &Value) -> u64 {
    settings
        .pointer("/data/maxsize")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_SIZE)
}

/// Rule text for one action; an absent rule is empty and therefore denies.
pub(crate) fn rule(settings: &Value, target: RuleTarget, action: RuleAction) -> String {
    settings
        .pointer(&format!("/rules/{target}/{action}"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn data_info(next: Next<'_>, ctx: &RequestContext, collection: &str, id: &str) -> ChainResult<DataInfo> {
    ctx.cache()
        .data_info(collection, id, || internal(next).data_info(ctx, collection, id))
}

/// Like [`data_info`], with a missing record as `None`.
pub(crate) fn find_data_info(
    next: Next<'_>,
    ctx: &RequestContext,
    collection: &str,
    id: &str,
) -> ChainResult<Option<DataInfo>> {
    optional(data_info(next, ctx, collection, id))
}

pub(crate) fn graft_info(
    next: Next<'_>,
    ctx: &RequestContext,
    collection: &str,
    data_id: &str,
    id: &str,
) -> ChainResult<GraftInfo> {
    ctx.cache().graft_info(collection, data_id, id, || {
        internal(next).graft_info(ctx, collection, data_id, id)
    })
}

pub(crate) fn find_graft_info(
    next: Next<'_>,
    ctx: &RequestContext,
    collection: &str,
    data_id: &str,
    id: &str,
) -> ChainResult<Option<GraftInfo>> {
    optional(graft_info(next, ctx, collection, data_id, id))
}

/// A registered user, `None` if unknown.
pub(crate) fn user(next: Next<'_>, ctx: &RequestContext, id: &str) -> ChainResult<Option<User>> {
    ctx.cache().user(id, || optional(internal(next).user_info(ctx, id)))
}
