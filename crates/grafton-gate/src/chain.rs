use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use grafton_store::{IdentityStore, RecordStore, SettingsStore, SqlStore};

use crate::config::{ChainConfig, GraftonConfig};
use crate::context::RequestContext;
use crate::error::ChainResult;
use crate::handler::{Handler, NoopHandler, Request, Response};
use crate::layers::{ExecutionLayer, PolicyLayer, ValidationLayer};

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// Position class of a layer. The chain always runs layers in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKind {
    Validation,
    Policy,
    Execution,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Policy => "policy",
            Self::Execution => "execution",
        })
    }
}

/// One decorator in the chain.
///
/// A layer either answers the request itself, returns an error, or forwards
/// to `next`. It may also issue internal lookups through
/// [`Next::bypass`].
pub trait Layer: Send + Sync {
    fn kind(&self) -> LayerKind;

    fn handle<'a>(
        &'a self,
        next: Next<'a>,
        ctx: &'a RequestContext,
        request: Request<'a>,
    ) -> ChainResult<Response<'a>>;
}

// ---------------------------------------------------------------------------
// Bypass
// ---------------------------------------------------------------------------

/// Layer kinds an internal call skips.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bypass(u8);

impl Bypass {
    pub const NONE: Bypass = Bypass(0);
    pub const VALIDATION: Bypass = Bypass(1);
    pub const POLICY: Bypass = Bypass(1 << 1);

    pub fn contains(self, other: Bypass) -> bool {
        self.0 & other.0 == other.0
    }

    /// Execution layers are never skipped.
    pub fn skips(self, kind: LayerKind) -> bool {
        match kind {
            LayerKind::Validation => self.contains(Self::VALIDATION),
            LayerKind::Policy => self.contains(Self::POLICY),
            LayerKind::Execution => false,
        }
    }
}

impl BitOr for Bypass {
    type Output = Bypass;

    fn bitor(self, rhs: Bypass) -> Bypass {
        Bypass(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// The storage backends the execution layer drives.
#[derive(Clone)]
pub struct Stores {
    pub records: Arc<dyn RecordStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub identity: Arc<dyn IdentityStore>,
}

impl Stores {
    /// Back all three with one SQL store.
    pub fn sql(store: SqlStore) -> Self {
        let store = Arc::new(store);
        Self {
            records: store.clone(),
            settings: store.clone(),
            identity: store,
        }
    }
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// An ordered list of layers in front of a terminal handler.
///
/// Built once at startup and shared by every request.
pub struct Chain {
    layers: Vec<Box<dyn Layer>>,
    terminal: Box<dyn Handler>,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// The production chain: validation, then policy, then execution
    /// against `stores`.
    pub fn standard(stores: Stores, config: ChainConfig) -> Self {
        ChainBuilder::new()
            .layer(ValidationLayer::new(config.clone()))
            .layer(PolicyLayer::new(stores.identity.clone(), &config))
            .layer(ExecutionLayer::new(stores))
            .build()
    }

    /// Open the configured SQL store and build the standard chain over it.
    pub fn open(config: &GraftonConfig) -> ChainResult<Self> {
        let store = SqlStore::open(config.store.clone())?;
        Ok(Self::standard(Stores::sql(store), config.chain.clone()))
    }

    /// Kinds of the layers, in execution order.
    pub fn layer_kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(|layer| layer.kind()).collect()
    }

    fn start(&self, skip: Bypass) -> Next<'_> {
        Next {
            chain: self,
            pos: 0,
            skip,
        }
    }
}

impl Handler for Chain {
    fn handle<'a>(&'a self, ctx: &'a RequestContext, request: Request<'a>) -> ChainResult<Response<'a>> {
        self.start(Bypass::NONE).run(ctx, request)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("layers", &self.layer_kinds())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Chain`].
///
/// Layers are ordered by [`LayerKind`] on build; layers of the same kind keep
/// the order they were added in. Without an explicit terminal the chain ends
/// in a [`NoopHandler`].
#[derive(Default)]
pub struct ChainBuilder {
    layers: Vec<Box<dyn Layer>>,
    terminal: Option<Box<dyn Handler>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn terminal(mut self, terminal: impl Handler + 'static) -> Self {
        self.terminal = Some(Box::new(terminal));
        self
    }

    pub fn build(mut self) -> Chain {
        self.layers.sort_by_key(|layer| layer.kind());
        Chain {
            layers: self.layers,
            terminal: self.terminal.unwrap_or_else(|| Box::new(NoopHandler)),
        }
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// The rest of the chain as seen from inside a layer.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a Chain,
    pos: usize,
    skip: Bypass,
}

impl<'a> Next<'a> {
    /// The whole chain from its first layer, skipping the layer kinds in
    /// `flags` in addition to those this view already skips.
    ///
    /// Used for the chain's own lookups (settings, record ownership) so
    /// they are not validated or authorized a second time.
    pub fn bypass(self, flags: Bypass) -> Next<'a> {
        self.chain.start(self.skip | flags)
    }

    /// Layer kinds this view skips.
    pub fn skipping(&self) -> Bypass {
        self.skip
    }

    /// Forward `request` to the next layer that is not skipped, or to the
    /// terminal.
    pub fn run(self, ctx: &'a RequestContext, request: Request<'a>) -> ChainResult<Response<'a>> {
        ctx.check_cancelled()?;
        let mut pos = self.pos;
        while let Some(layer) = self.chain.layers.get(pos) {
            pos += 1;
            if self.skip.skips(layer.kind()) {
                continue;
            }
            tracing::debug!(layer = %layer.kind(), operation = %request.operation(), "forwarding");
            let next = Next {
                chain: self.chain,
                pos,
                skip: self.skip,
            };
            return layer.handle(next, ctx, request);
        }
        self.chain.terminal.handle(ctx, request)
    }
}

impl Handler for Next<'_> {
    fn handle<'a>(&'a self, ctx: &'a RequestContext, request: Request<'a>) -> ChainResult<Response<'a>> {
        let next: Next<'a> = *self;
        next.run(ctx, request)
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("pos", &self.pos)
            .field("skip", &self.skip)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use grafton_types::Caller;

    use crate::error::ChainError;
    use crate::handler::{HandlerExt, Operation};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records its name, optionally issues one bypass lookup, then forwards.
    struct Tracer {
        kind: LayerKind,
        name: &'static str,
        log: Log,
        lookup: Option<Bypass>,
    }

    impl Tracer {
        fn new(kind: LayerKind, name: &'static str, log: &Log) -> Self {
            Self {
                kind,
                name,
                log: log.clone(),
                lookup: None,
            }
        }
    }

    impl Layer for Tracer {
        fn kind(&self) -> LayerKind {
            self.kind
        }

        fn handle<'a>(
            &'a self,
            next: Next<'a>,
            ctx: &'a RequestContext,
            request: Request<'a>,
        ) -> ChainResult<Response<'a>> {
            self.log
                .lock()
                .expect("lock poisoned")
                .push(format!("{}:{}", self.name, request.operation()));
            if let Some(flags) = self.lookup {
                if request.operation() != Operation::GetSettings {
                    next.bypass(flags).get_settings(ctx, "data/maxsize")?;
                }
            }
            next.run(ctx, request)
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().expect("lock poisoned").clone()
    }

    // ---- 1. ordering ----

    #[test]
    fn layers_run_in_kind_order() {
        let log = Log::default();
        let chain = Chain::builder()
            .layer(Tracer::new(LayerKind::Execution, "exec", &log))
            .layer(Tracer::new(LayerKind::Validation, "valid", &log))
            .layer(Tracer::new(LayerKind::Policy, "policy", &log))
            .layer(Tracer::new(LayerKind::Validation, "valid2", &log))
            .build();
        assert_eq!(
            chain.layer_kinds(),
            vec![
                LayerKind::Validation,
                LayerKind::Validation,
                LayerKind::Policy,
                LayerKind::Execution
            ]
        );

        let ctx = RequestContext::new(Caller::user("alice"));
        chain.collections(&ctx).unwrap();
        assert_eq!(
            entries(&log),
            vec![
                "valid:Collections",
                "valid2:Collections",
                "policy:Collections",
                "exec:Collections"
            ]
        );
    }

    // ---- 2. bypass ----

    #[test]
    fn bypass_skips_flagged_kinds_from_the_top() {
        let log = Log::default();
        let mut policy = Tracer::new(LayerKind::Policy, "policy", &log);
        policy.lookup = Some(Bypass::VALIDATION | Bypass::POLICY);
        let chain = Chain::builder()
            .layer(Tracer::new(LayerKind::Validation, "valid", &log))
            .layer(policy)
            .layer(Tracer::new(LayerKind::Execution, "exec", &log))
            .build();

        let ctx = RequestContext::new(Caller::user("alice"));
        chain.delete_data(&ctx, "notes", "a").unwrap();
        assert_eq!(
            entries(&log),
            vec![
                "valid:DeleteData",
                "policy:DeleteData",
                "exec:GetSettings",
                "exec:DeleteData"
            ]
        );
    }

    #[test]
    fn partial_bypass_keeps_other_layers() {
        let log = Log::default();
        let mut exec = Tracer::new(LayerKind::Execution, "exec", &log);
        exec.lookup = Some(Bypass::POLICY);
        let chain = Chain::builder()
            .layer(Tracer::new(LayerKind::Validation, "valid", &log))
            .layer(Tracer::new(LayerKind::Policy, "policy", &log))
            .layer(exec)
            .build();

        let ctx = RequestContext::new(Caller::anonymous());
        chain.collections(&ctx).unwrap();
        assert_eq!(
            entries(&log),
            vec![
                "valid:Collections",
                "policy:Collections",
                "exec:Collections",
                "valid:GetSettings",
                "exec:GetSettings"
            ]
        );
    }

    #[test]
    fn bypass_flags_accumulate() {
        let flags = Bypass::VALIDATION | Bypass::POLICY;
        assert!(flags.skips(LayerKind::Validation));
        assert!(flags.skips(LayerKind::Policy));
        assert!(!flags.skips(LayerKind::Execution));
        assert!(!Bypass::NONE.skips(LayerKind::Validation));
        assert!(!Bypass::POLICY.contains(Bypass::VALIDATION));
    }

    // ---- 3. terminal ----

    #[test]
    fn empty_chain_reaches_noop_terminal() {
        let chain = Chain::builder().build();
        let ctx = RequestContext::new(Caller::anonymous());
        assert!(chain.collections(&ctx).unwrap().is_empty());
    }

    #[test]
    fn cancelled_request_never_reaches_a_layer() {
        let log = Log::default();
        let chain = Chain::builder()
            .layer(Tracer::new(LayerKind::Validation, "valid", &log))
            .build();
        let ctx = RequestContext::new(Caller::anonymous());
        ctx.cancellation().cancel();
        assert_eq!(chain.collections(&ctx), Err(ChainError::Cancelled));
        assert!(entries(&log).is_empty());
    }
}
