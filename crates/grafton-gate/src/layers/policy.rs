use std::rc::Rc;
use std::sync::Arc;

use chrono::Utc;

use grafton_policy::{shortcut, Activation, AuthVars, Bindings, DataVars, Environment, GraftVars, Program};
use grafton_store::{FilterError, IdentityStore, RowFilter};
use grafton_types::{DataInfo, Graft, GraftInfo, RuleAction, RuleTarget};

use crate::acl::StoreAcl;
use crate::chain::{Layer, LayerKind, Next};
use crate::config::ChainConfig;
use crate::context::RequestContext;
use crate::error::{ChainError, ChainResult};
use crate::handler::{Operation, Request, Response};

use super::{guard_admin_write, lookup};

/// A rule ready to decide: either a literal or a compiled program.
enum Verdict {
    Fixed(bool),
    Rule(Rc<Program>),
}

/// Authorizes requests against the rules in the settings document.
///
/// The administrator skips rules except for record writes, which are
/// refused. Other callers are checked against the rule for the action;
/// list operations get a per-row filter instead of an up-front decision.
pub struct PolicyLayer {
    identity: Arc<dyn IdentityStore>,
    env: Environment,
    admin: String,
}

impl PolicyLayer {
    pub fn new(identity: Arc<dyn IdentityStore>, config: &ChainConfig) -> Self {
        Self {
            identity,
            env: Environment::standard(),
            admin: config.admin_identity.clone(),
        }
    }

    /// `auth` for the caller. Unknown users are rejected.
    fn auth(&self, next: Next<'_>, ctx: &RequestContext) -> ChainResult<AuthVars> {
        let caller = ctx.caller();
        let Some(uid) = caller.username.as_deref() else {
            return Ok(AuthVars::default());
        };
        let Some(user) = lookup::user(next, ctx, uid)? else {
            tracing::warn!(uid, "request from unknown user");
            return Err(ChainError::Unauthorized("unknown user".into()));
        };
        Ok(AuthVars {
            uid: user.id,
            email: user.email,
            validated: user.validated,
            group: user.group.unwrap_or_default(),
        })
    }

    fn verdict(&self, ctx: &RequestContext, rule: &str) -> ChainResult<Verdict> {
        if let Some(fixed) = shortcut(rule) {
            return Ok(Verdict::Fixed(fixed));
        }
        let program = ctx.cache().program(rule, || Ok(self.env.compile(rule)?))?;
        Ok(Verdict::Rule(program))
    }

    fn allows(&self, ctx: &RequestContext, verdict: &Verdict, bindings: &Bindings) -> ChainResult<bool> {
        match verdict {
            Verdict::Fixed(allowed) => Ok(*allowed),
            Verdict::Rule(program) => {
                let acl = StoreAcl::new(self.identity.as_ref(), ctx.cache());
                Ok(program.eval(&Activation::from_bindings(bindings, &acl))?)
            }
        }
    }

    fn verdict_for(
        &self,
        next: Next<'_>,
        ctx: &RequestContext,
        target: RuleTarget,
        action: RuleAction,
    ) -> ChainResult<Verdict> {
        let settings = lookup::settings(next, ctx)?;
        self.verdict(ctx, &lookup::rule(&settings, target, action))
    }

    fn enforce(
        &self,
        next: Next<'_>,
        ctx: &RequestContext,
        target: RuleTarget,
        action: RuleAction,
        bindings: &Bindings,
    ) -> ChainResult<()> {
        let verdict = self.verdict_for(next, ctx, target, action)?;
        if self.allows(ctx, &verdict, bindings)? {
            tracing::debug!(uid = %bindings.auth.uid, %target, %action, "rule allowed request");
            return Ok(());
        }
        tracing::warn!(uid = %bindings.auth.uid, %target, %action, "rule denied request");
        Err(ChainError::Unauthorized(format!("{target} {action} denied")))
    }

    /// Bindings for a record rule.
    fn for_data(&self, auth: AuthVars, info: &DataInfo) -> Bindings {
        Bindings {
            auth,
            data: data_vars(info),
            graft: GraftVars::default(),
            at: Utc::now().timestamp(),
        }
    }

    fn for_graft(&self, auth: AuthVars, parent: &DataInfo, graft: &GraftInfo) -> Bindings {
        Bindings {
            graft: GraftVars {
                id: graft.id.clone(),
                creator: graft.created_by.clone(),
                created_at: graft.created_at.timestamp(),
            },
            ..self.for_data(auth, parent)
        }
    }

    /// Per-row filter for listings, composed in front of any filter the
    /// caller supplied.
    fn row_filter<'a, T: 'a>(
        &'a self,
        ctx: &'a RequestContext,
        verdict: Verdict,
        mut previous: Option<RowFilter<'a, T>>,
        bind: impl Fn(&T) -> Bindings + 'a,
    ) -> RowFilter<'a, T> {
        Box::new(move |row: &T| {
            let allowed = self
                .allows(ctx, &verdict, &bind(row))
                .map_err(|err| Box::new(err) as FilterError)?;
            if !allowed {
                return Ok(false);
            }
            match previous.as_mut() {
                Some(filter) => filter(row),
                None => Ok(true),
            }
        })
    }
}

fn data_vars(info: &DataInfo) -> DataVars {
    DataVars {
        id: info.id.clone(),
        collection: info.collection.clone(),
        creator: info.created_by.clone(),
    }
}

impl Layer for PolicyLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Policy
    }

    fn handle<'a>(
        &'a self,
        next: Next<'a>,
        ctx: &'a RequestContext,
        request: Request<'a>,
    ) -> ChainResult<Response<'a>> {
        let operation = request.operation();
        guard_admin_write(&self.admin, ctx, operation)?;

        if ctx.caller().is(&self.admin) {
            return next.run(ctx, request);
        }
        if operation.is_admin_only() {
            tracing::warn!(uid = %ctx.caller().uid(), %operation, "administrator operation refused");
            return Err(ChainError::Forbidden(format!("{operation} requires the administrator")));
        }

        let request = match request {
            Request::RegisterUser(_) | Request::Collections => request,
            Request::UserInfo { ref id } => {
                if ctx.caller().username.as_deref() != Some(id.as_str()) {
                    return Err(ChainError::Forbidden("user info is private".into()));
                }
                request
            }
            Request::PutData(ref put) => {
                let auth = self.auth(next, ctx)?;
                match lookup::find_data_info(next, ctx, &put.collection, &put.id)? {
                    Some(info) => {
                        let bindings = self.for_data(auth, &info);
                        self.enforce(next, ctx, RuleTarget::Data, RuleAction::Write, &bindings)?;
                    }
                    None => {
                        let info = DataInfo {
                            id: put.id.clone(),
                            collection: put.collection.clone(),
                            created_by: auth.uid.clone(),
                            ..DataInfo::default()
                        };
                        let bindings = self.for_data(auth, &info);
                        self.enforce(next, ctx, RuleTarget::Data, RuleAction::Create, &bindings)?;
                    }
                }
                request
            }
            Request::PatchData(ref patch) => {
                let auth = self.auth(next, ctx)?;
                let info = lookup::data_info(next, ctx, &patch.collection, &patch.id)?;
                self.enforce(next, ctx, RuleTarget::Data, RuleAction::Write, &self.for_data(auth, &info))?;
                request
            }
            Request::GetData(ref get) => {
                let auth = self.auth(next, ctx)?;
                let info = lookup::data_info(next, ctx, &get.collection, &get.id)?;
                self.enforce(next, ctx, RuleTarget::Data, RuleAction::Read, &self.for_data(auth, &info))?;
                request
            }
            Request::DataInfo(ref key) | Request::DeleteData(ref key) => {
                let action = if operation == Operation::DeleteData {
                    RuleAction::Delete
                } else {
                    RuleAction::Read
                };
                let auth = self.auth(next, ctx)?;
                let info = lookup::data_info(next, ctx, &key.collection, &key.id)?;
                self.enforce(next, ctx, RuleTarget::Data, action, &self.for_data(auth, &info))?;
                request
            }
            Request::SaveGraft(ref save) => {
                let auth = self.auth(next, ctx)?;
                let parent = lookup::data_info(next, ctx, &save.collection, &save.data_id)?;
                match lookup::find_graft_info(next, ctx, &save.collection, &save.data_id, &save.id)? {
                    Some(existing) => {
                        let bindings = self.for_graft(auth, &parent, &existing);
                        self.enforce(next, ctx, RuleTarget::Graft, RuleAction::Write, &bindings)?;
                    }
                    None => {
                        let graft = GraftInfo {
                            id: save.id.clone(),
                            data_id: save.data_id.clone(),
                            collection: save.collection.clone(),
                            created_by: auth.uid.clone(),
                            created_at: Utc::now(),
                            ..GraftInfo::default()
                        };
                        let bindings = self.for_graft(auth, &parent, &graft);
                        self.enforce(next, ctx, RuleTarget::Data, RuleAction::Graft, &bindings)?;
                    }
                }
                request
            }
            Request::GetGraft(ref get) => {
                let auth = self.auth(next, ctx)?;
                let parent = lookup::data_info(next, ctx, &get.collection, &get.data_id)?;
                let graft = lookup::graft_info(next, ctx, &get.collection, &get.data_id, &get.id)?;
                let bindings = self.for_graft(auth, &parent, &graft);
                self.enforce(next, ctx, RuleTarget::Graft, RuleAction::Read, &bindings)?;
                request
            }
            Request::GraftInfo(ref key) | Request::DeleteGraft(ref key) => {
                let action = if operation == Operation::DeleteGraft {
                    RuleAction::Delete
                } else {
                    RuleAction::Read
                };
                let auth = self.auth(next, ctx)?;
                let parent = lookup::data_info(next, ctx, &key.collection, &key.data_id)?;
                let graft = lookup::graft_info(next, ctx, &key.collection, &key.data_id, &key.id)?;
                let bindings = self.for_graft(auth, &parent, &graft);
                self.enforce(next, ctx, RuleTarget::Graft, action, &bindings)?;
                request
            }
            Request::ListData { collection, mut options } => {
                let auth = self.auth(next, ctx)?;
                let verdict = self.verdict_for(next, ctx, RuleTarget::Data, RuleAction::Read)?;
                let at = Utc::now().timestamp();
                let filter = self.row_filter(ctx, verdict, options.filter.take(), move |row: &grafton_types::Data| {
                    Bindings {
                        auth: auth.clone(),
                        data: DataVars {
                            id: row.id.clone(),
                            collection: row.collection.clone(),
                            creator: row.created_by.clone(),
                        },
                        graft: GraftVars::default(),
                        at,
                    }
                });
                options.filter = Some(filter);
                Request::ListData { collection, options }
            }
            Request::ListGrafts {
                collection,
                data_id,
                mut options,
            } => {
                let auth = self.auth(next, ctx)?;
                let parent = lookup::data_info(next, ctx, &collection, &data_id)?;
                let verdict = self.verdict_for(next, ctx, RuleTarget::Graft, RuleAction::Read)?;
                let at = Utc::now().timestamp();
                let filter = self.row_filter(ctx, verdict, options.filter.take(), move |row: &Graft| Bindings {
                    auth: auth.clone(),
                    data: data_vars(&parent),
                    graft: GraftVars {
                        id: row.id.clone(),
                        creator: row.created_by.clone(),
                        created_at: row.created_at.timestamp(),
                    },
                    at,
                });
                options.filter = Some(filter);
                Request::ListGrafts {
                    collection,
                    data_id,
                    options,
                }
            }
            Request::GetSettings { .. }
            | Request::SetSettings { .. }
            | Request::CreateUser(_)
            | Request::ValidateUser { .. }
            | Request::ListUsers => {
                return Err(ChainError::Forbidden(format!("{operation} requires the administrator")));
            }
        };

        next.run(ctx, request)
    }
}
