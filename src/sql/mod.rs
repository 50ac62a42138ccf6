//! SQL front end.
//!
//! Statements are parsed with `sqlparser` and lowered into a small AST that
//! covers the query shapes the plan builder binds: SELECT blocks, joins,
//! derived and lateral tables, set operations, ORDER BY and LIMIT/OFFSET.

mod ast;
mod error;
mod parser;

pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use parser::Parser;
