//! Access-rule language for Grafton.
//!
//! Every record and graft action is authorized by a one-line boolean rule
//! stored in the settings document, for example:
//!
//! ```text
//! auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).read
//! ```
//!
//! Rules are parsed and type-checked against an [`Environment`] that declares
//! the variables `auth`, `data`, `graft`, `at` and the host function `acl`.
//! The resulting [`Program`] is evaluated against an [`Activation`] holding
//! the request's [`Bindings`] and an [`AclSource`] that backs `acl()`.
//!
//! # Quick Start
//!
//! ```rust
//! use grafton_policy::{Activation, Bindings, Environment, NoAcl};
//!
//! let env = Environment::standard();
//! let program = env.compile(r#"auth.uid != "" && auth.validated"#).unwrap();
//!
//! let mut bindings = Bindings::default();
//! bindings.auth.uid = "alice".into();
//! bindings.auth.validated = true;
//! assert!(program.eval(&Activation::from_bindings(&bindings, &NoAcl)).unwrap());
//! ```

pub mod ast;
pub mod env;
pub mod error;
pub mod eval;
pub mod parser;
pub mod value;

pub use env::{acl_type, Environment, Type};
pub use error::{FunctionError, PolicyError, PolicyResult};
pub use eval::{AclGrant, AclSource, Activation, AuthVars, Bindings, DataVars, GraftVars, NoAcl, Program};
pub use value::Value;

/// Rule texts decided without compiling.
///
/// Returns `Some(false)` for the empty rule and `"false"`, `Some(true)` for
/// `"true"`, and `None` when the rule must be compiled.
pub fn shortcut(rule: &str) -> Option<bool> {
    match rule.trim() {
        "" | "false" => Some(false),
        "true" => Some(true),
        _ => None,
    }
}
