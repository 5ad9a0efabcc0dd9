use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid data uri: {0}")]
    InvalidUri(String),

    #[error("settings path is not mutable: {0}")]
    ImmutablePath(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
