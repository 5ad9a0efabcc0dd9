use rusqlite::ffi;

/// Error raised by a cursor filter predicate.
pub type FilterError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from storage operations.
///
/// Driver errors are translated at the store boundary: a unique-constraint
/// violation becomes [`StoreError::Conflict`], a missing parent becomes the
/// matching `*NotFound` variant, and only unexpected failures remain as
/// [`StoreError::Sqlite`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("record not found: {collection}/{id}")]
    RecordNotFound { collection: String, id: String },

    #[error("graft not found: {collection}/{data_id}/{id}")]
    GraftNotFound {
        collection: String,
        data_id: String,
        id: String,
    },

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("setting not found: {0}")]
    SettingNotFound(String),

    /// A uniqueness constraint was violated (duplicate key or lost creation race).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("payload of {size} bytes exceeds maximum of {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("password hashing failed: {0}")]
    Password(String),

    /// A cursor filter predicate failed; iteration was aborted.
    #[error("row filter failed: {0}")]
    Filter(#[source] FilterError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        translate(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Map a driver error into the store taxonomy.
pub fn translate(err: rusqlite::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Conflict("unique constraint violated".into());
    }
    StoreError::Sqlite(err)
}

fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        extended_code(err),
        Some(ffi::SQLITE_CONSTRAINT_UNIQUE) | Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    extended_code(err) == Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(extended: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(extended), None)
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = translate(failure(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = translate(failure(ffi::SQLITE_CONSTRAINT_PRIMARYKEY));
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn other_errors_stay_sqlite() {
        let err = translate(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert!(is_foreign_key_violation(&failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)));
        assert!(!is_unique_violation(&failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)));
    }
}
