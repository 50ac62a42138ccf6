//! Expression evaluation errors.

use thiserror::Error;

/// Result type for expression evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Failures raised while folding or evaluating an expression.
///
/// "Not constant" is not an error: the simplifier returns the partially
/// folded expression instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("wrong number of arguments for {name}: {count}")]
    Arity { name: String, count: usize },

    #[error("unbound column: {0}")]
    UnboundColumn(String),

    #[error("cannot evaluate: {0}")]
    Unsupported(String),
}
