use grafton_policy::PolicyError;
use grafton_store::StoreError;
use grafton_types::TypeError;

/// Kind of a [`ChainError`], the only error information a transport adapter
/// should act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadInput,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
    Cancelled,
}

/// Errors returned by the handler chain.
///
/// Messages never carry driver or compiler text; those details are logged
/// where the error is converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Malformed or missing fields, oversized payload, disallowed settings path.
    #[error("bad input: {0}")]
    BadInput(String),

    /// The caller is unknown or the applicable rule evaluated to false.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Administrator-only action, or an administrator writing records.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Result alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadInput(_) => ErrorKind::BadInput,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CollectionNotFound(_)
            | StoreError::RecordNotFound { .. }
            | StoreError::GraftNotFound { .. }
            | StoreError::UserNotFound(_)
            | StoreError::SettingNotFound(_) => Self::NotFound(err.to_string()),
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::InvalidInput(message) => Self::BadInput(message),
            StoreError::TooLarge { .. } => Self::BadInput(err.to_string()),
            StoreError::Cancelled => Self::Cancelled,
            StoreError::Filter(source) => match source.downcast::<ChainError>() {
                Ok(chain) => *chain,
                Err(other) => {
                    tracing::error!(error = %other, "row filter failed");
                    Self::Internal("row filter failed".into())
                }
            },
            StoreError::Serialization(_) | StoreError::Password(_) | StoreError::Sqlite(_) => {
                tracing::error!(error = %err, "storage failure");
                Self::Internal("storage failure".into())
            }
        }
    }
}

impl From<PolicyError> for ChainError {
    fn from(err: PolicyError) -> Self {
        tracing::error!(error = %err, "rule could not be evaluated");
        Self::Internal("rule could not be evaluated".into())
    }
}

impl From<TypeError> for ChainError {
    fn from(err: TypeError) -> Self {
        Self::BadInput(err.to_string())
    }
}

/// Failure to load a [`crate::GraftonConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        let not_found = ChainError::from(StoreError::RecordNotFound {
            collection: "c".into(),
            id: "a".into(),
        });
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(
            ChainError::from(StoreError::Conflict("raced".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ChainError::from(StoreError::TooLarge { size: 11, max: 10 }).kind(),
            ErrorKind::BadInput
        );
        assert_eq!(ChainError::from(StoreError::Cancelled), ChainError::Cancelled);
    }

    #[test]
    fn backend_text_stays_out_of_messages() {
        let err = ChainError::from(StoreError::Serialization("expected value at line 1".into()));
        assert_eq!(err, ChainError::Internal("storage failure".into()));
    }

    #[test]
    fn filter_errors_unwrap_chain_errors() {
        let inner: grafton_store::FilterError = Box::new(ChainError::Unauthorized("no".into()));
        assert_eq!(
            ChainError::from(StoreError::Filter(inner)),
            ChainError::Unauthorized("no".into())
        );
        let foreign: grafton_store::FilterError = "boom".into();
        assert_eq!(ChainError::from(StoreError::Filter(foreign)).kind(), ErrorKind::Internal);
    }

    #[test]
    fn policy_errors_are_internal() {
        let err = ChainError::from(PolicyError::evaluation("division by zero"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.to_string().contains("division"));
    }
}
