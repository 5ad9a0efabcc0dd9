//! SQL storage engine for Grafton.
//!
//! Records live in per-collection tables that are created on the first write
//! to a collection. A directory table maps each collection name to its data
//! and graft tables; grafts reference their parent record and are removed
//! with it. Listings are served through lazy [`Cursor`]s that fetch one page
//! at a time and apply a caller-supplied filter to every row.
//!
//! # Storage Backends
//!
//! All persistence goes through three traits:
//!
//! - [`RecordStore`] -- records, grafts and listings
//! - [`SettingsStore`] -- the settings document
//! - [`IdentityStore`] -- users, groups, permissions and access grants
//!
//! [`SqlStore`] implements all three on SQLite.
//!
//! # Design Rules
//!
//! 1. Collection names and document paths never reach SQL text unescaped:
//!    tables are hex-named, paths and values are bound parameters.
//! 2. A collection's tables are created at most once; losing the creation
//!    race reports [`StoreError::Conflict`].
//! 3. Driver errors are translated into [`StoreError`] at this boundary.
//! 4. The connection lock is never held between cursor steps.

pub mod config;
pub mod cursor;
pub mod error;
pub mod identity;
pub mod json;
pub mod naming;
pub mod query;
pub mod settings;
pub mod sqlite;
pub mod traits;

pub use config::StoreConfig;
pub use cursor::{Cursor, CursorState, Keyed, ListOptions, PageSource, RowFilter};
pub use error::{FilterError, StoreError, StoreResult};
pub use query::Condition;
pub use settings::{check_setting, default_settings, DEFAULT_MAX_SIZE};
pub use sqlite::SqlStore;
pub use traits::{IdentityStore, RecordStore, SettingsStore};
