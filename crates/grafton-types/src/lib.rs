//! Foundation types for Grafton.
//!
//! Grafton is a multi-tenant object store: callers write JSON records into
//! named collections and attach grafts to them. This crate holds
//! the plain data model shared by the storage engine, the rule evaluator and
//! the handler chain. Every other Grafton crate depends on `grafton-types`.
//!
//! # Key Types
//!
//! - [`Data`] / [`DataInfo`] -- a record in a collection, with or without content
//! - [`Graft`] / [`GraftInfo`] -- an annotation owned by exactly one record
//! - [`User`], [`Group`], [`Permission`], [`Access`] -- identity-store rows
//! - [`Caller`] -- the already-authenticated identity of a request
//! - [`DataUri`] -- `collection/id` address used by permissions
//! - [`SettingsPath`] -- the allow-list of mutable settings paths

pub mod error;
pub mod identity;
pub mod record;
pub mod settings;
pub mod uri;

pub use error::TypeError;
pub use identity::{Access, Caller, Group, NewUser, Permission, User};
pub use record::{content_size, Data, DataInfo, Graft, GraftInfo};
pub use settings::{normalize_path, RuleAction, RuleTarget, SettingsPath};
pub use uri::DataUri;

/// Identity literal reserved for the store administrator.
pub const ADMIN_IDENTITY: &str = "admin";
