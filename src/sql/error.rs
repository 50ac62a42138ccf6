//! Errors raised while turning SQL text into the statement AST.

use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Valid SQL the plan builder has no operator for.
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid bind parameter {0}, expected $1, $2, ... or ?")]
    InvalidParameter(String),

    #[error("derived table in FROM needs an alias")]
    MissingAlias,

    #[error("empty query")]
    EmptyQuery,

    #[error("expected one statement, found {0}")]
    MultipleStatements(usize),
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        match e {
            sqlparser::parser::ParserError::ParserError(msg)
            | sqlparser::parser::ParserError::TokenizerError(msg) => ParseError::Syntax(msg),
            other => ParseError::Syntax(other.to_string()),
        }
    }
}
