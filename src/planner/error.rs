//! Planning errors.

use thiserror::Error;

use crate::expr::EvalError;
use crate::metadata::MetadataError;
use crate::sql::ParseError;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Query planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    #[error("unresolved reference: {0}")]
    Unresolved(String),

    #[error("access pattern not satisfied for {group}: one of {patterns} must be bound by criteria")]
    AccessPatternUnsatisfied { group: String, patterns: String },

    #[error("source model {model} requires criteria on {group}")]
    CriteriaRequired { group: String, model: String },

    #[error("invalid join: {0}")]
    InvalidJoin(String),

    #[error("rule execution limit of {0} exceeded")]
    RuleLimitExceeded(usize),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlanError {
    /// Errors caused by the query rather than by the planner or its inputs.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            PlanError::Parse(_)
                | PlanError::Unresolved(_)
                | PlanError::AccessPatternUnsatisfied { .. }
                | PlanError::CriteriaRequired { .. }
                | PlanError::InvalidJoin(_)
        )
    }
}
