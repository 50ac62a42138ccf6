//! Query planning and optimization.
//!
//! A statement is bound into a [`PlanTree`] by the [`PlanBuilder`], then
//! rewritten by the rule engine in [`optimizer`] until no rule has anything
//! left to do. [`QueryPlanner`] ties the steps together and caches results.

mod builder;
mod cache;
mod config;
pub mod context;
mod error;
mod node;
mod optimizer;
mod planner;
pub mod props;
pub mod rules;
mod symbol_map;

pub use builder::PlanBuilder;
pub use cache::PlanCache;
pub use config::PlannerConfig;
pub use context::{AliasGenerator, AnalysisRecord, RuleContext, RuleTrace};
pub use error::{PlanError, PlanResult};
pub use node::{NodeId, NodeKind, Operator, PlanNode, PlanTree};
pub use optimizer::{OptimizedPlan, Optimizer};
pub use planner::QueryPlanner;
pub use props::{JoinStrategy, JoinType, SetOperation, Side, SortOption};
pub use symbol_map::SymbolMap;

use crate::expr::ConstantSimplifier;
use crate::metadata::{CapabilitiesFinder, Metadata};

/// Optimize a bound plan with the default configuration and simplifier.
pub fn optimize(
    plan: PlanTree,
    metadata: &dyn Metadata,
    capabilities: &dyn CapabilitiesFinder,
) -> PlanResult<PlanTree> {
    let config = PlannerConfig::default();
    let optimizer = Optimizer::new(&config);
    optimizer
        .optimize(plan, metadata, capabilities, &ConstantSimplifier)
        .map(|run| run.plan)
}
