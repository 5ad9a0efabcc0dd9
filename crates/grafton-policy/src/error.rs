/// Error returned by a host function such as `acl`.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from compiling or evaluating a rule.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The rule text is not a well-formed expression.
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("undeclared reference to '{0}'")]
    UnknownVariable(String),

    #[error("no such field '{field}' on {ty}")]
    UnknownField { field: String, ty: String },

    #[error("undeclared function '{0}'")]
    UnknownFunction(String),

    #[error("'{function}' expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    /// An operator or function was applied to operands of the wrong type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The rule does not produce a boolean.
    #[error("rule must evaluate to bool, got {0}")]
    NotBoolean(String),

    /// Runtime failure: overflow, division by zero, missing key.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("function '{name}' failed: {source}")]
    Function {
        name: String,
        #[source]
        source: FunctionError,
    },
}

/// Result alias for rule operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

impl PolicyError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }

    /// Returns `true` if the error was raised while compiling, before any
    /// variable was bound.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::UnknownVariable(_)
                | Self::UnknownField { .. }
                | Self::UnknownFunction(_)
                | Self::Arity { .. }
        )
    }
}
