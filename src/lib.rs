//! fedplan - a rule-based plan optimizer for federated SQL
//!
//! Statements are bound against a catalog of source models into a relational
//! plan tree, then rewritten by a stack of optimization rules: criteria are
//! pushed toward the sources, provably empty subtrees are removed, outer
//! joins are strengthened, row limits are pushed into capable sources,
//! partitioned union views are joined branch by branch, and every join gets
//! a physical strategy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fedplan::metadata::InMemoryCatalog;
//! use fedplan::planner::QueryPlanner;
//!
//! let catalog = InMemoryCatalog::from_path("catalog.json").unwrap();
//! let planner = QueryPlanner::new(Arc::new(catalog));
//! let plan = planner.plan_sql("SELECT id FROM orders WHERE amount > 10").unwrap();
//! println!("{}", plan);
//! ```

pub mod expr;
pub mod metadata;
pub mod planner;
pub mod sql;

#[cfg(test)]
mod testing;
