//! Handler chain for Grafton.
//!
//! Every operation a transport adapter can issue goes through one [`Chain`]:
//! a [`ValidationLayer`] for structural checks, a [`PolicyLayer`] that
//! evaluates the access rules in the settings document, and an
//! [`ExecutionLayer`] that performs the request against the stores. Layers
//! share the [`Handler`] capability interface and are composed once at
//! startup with [`ChainBuilder`].
//!
//! Each request carries a [`RequestContext`]: the caller's identity, a
//! cancellation token and a [`RequestCache`] that memoizes settings,
//! ownership lookups and compiled rules for that request only.
//!
//! # Quick Start
//!
//! ```rust
//! use grafton_gate::{Chain, GraftonConfig, HandlerExt, RequestContext};
//! use grafton_types::{Caller, NewUser};
//! use serde_json::json;
//!
//! let chain = Chain::open(&GraftonConfig::default()).unwrap();
//!
//! let anonymous = RequestContext::new(Caller::anonymous());
//! let alice = NewUser {
//!     id: "alice".into(),
//!     password: "s3cret".into(),
//!     email: "alice@example.com".into(),
//!     ..NewUser::default()
//! };
//! chain.register_user(&anonymous, alice).unwrap();
//! chain
//!     .validate_user(&RequestContext::new(Caller::admin()), "alice", true)
//!     .unwrap();
//!
//! let ctx = RequestContext::new(Caller::user("alice"));
//! chain.put_data(&ctx, "notes", "n1", json!({"title": "hello"})).unwrap();
//! let data = chain.get_data(&ctx, "notes", "n1", None).unwrap();
//! assert_eq!(data.content["title"], "hello");
//! ```
//!
//! # Error Kinds
//!
//! Callers only ever see a [`ChainError`]. Storage driver messages and rule
//! compiler output are logged, never returned.

pub mod acl;
pub mod chain;
pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod layers;

pub use acl::StoreAcl;
pub use chain::{Bypass, Chain, ChainBuilder, Layer, LayerKind, Next, Stores};
pub use config::{ChainConfig, GraftonConfig};
pub use context::{RequestCache, RequestContext};
pub use cursor::ChainCursor;
pub use error::{ChainError, ChainResult, ConfigError, ErrorKind};
pub use handler::{
    DataKey, GetData, GetGraft, GraftKey, Handler, HandlerExt, NoopHandler, Operation, PatchData, PutData,
    Request, Response, SaveGraft,
};
pub use layers::{ExecutionLayer, PolicyLayer, ValidationLayer};
