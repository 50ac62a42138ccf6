//! Query planner - binds SQL statements and optimizes the resulting plans.
//!
//! The planner is the entry point for plan optimization. It owns the shared,
//! read-only inputs (metadata, capabilities, simplifier) and a plan cache;
//! every statement is bound into a fresh tree and optimized privately.

use std::sync::Arc;

use super::builder::PlanBuilder;
use super::cache::PlanCache;
use super::config::PlannerConfig;
use super::error::PlanResult;
use super::node::PlanTree;
use super::optimizer::{OptimizedPlan, Optimizer};
use crate::expr::{ConstantSimplifier, ExprSimplifier};
use crate::metadata::{CapabilitiesFinder, InMemoryCatalog, Metadata};
use crate::sql::{Parser, Statement};

/// The query planner.
pub struct QueryPlanner {
    metadata: Arc<dyn Metadata>,
    capabilities: Arc<dyn CapabilitiesFinder>,
    simplifier: Arc<dyn ExprSimplifier>,
    optimizer: Optimizer,
    cache: PlanCache,
}

impl QueryPlanner {
    /// Create a planner over an in-memory catalog with the default
    /// configuration.
    pub fn new(catalog: Arc<InMemoryCatalog>) -> Self {
        Self::with_config(catalog.clone(), catalog, PlannerConfig::default())
    }

    /// Create a planner over separate metadata and capability sources.
    pub fn with_config(
        metadata: Arc<dyn Metadata>,
        capabilities: Arc<dyn CapabilitiesFinder>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            metadata,
            capabilities,
            simplifier: Arc::new(ConstantSimplifier),
            cache: PlanCache::new(config.cache_capacity),
            optimizer: Optimizer::new(&config),
        }
    }

    /// Replace the expression simplifier.
    pub fn with_simplifier(mut self, simplifier: Arc<dyn ExprSimplifier>) -> Self {
        self.simplifier = simplifier;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        self.optimizer.config()
    }

    /// Bind a statement into its canonical plan tree.
    pub fn build(&self, stmt: &Statement) -> PlanResult<PlanTree> {
        PlanBuilder::new(self.metadata.as_ref()).build(stmt)
    }

    /// Optimize an already bound plan.
    pub fn optimize(&self, plan: PlanTree) -> PlanResult<OptimizedPlan> {
        self.optimizer.optimize(
            plan,
            self.metadata.as_ref(),
            self.capabilities.as_ref(),
            self.simplifier.as_ref(),
        )
    }

    /// Bind and optimize a statement.
    pub fn plan(&self, stmt: &Statement) -> PlanResult<OptimizedPlan> {
        self.optimize(self.build(stmt)?)
    }

    /// Plan SQL text, reusing a cached plan for the same statement.
    pub fn plan_sql(&self, sql: &str) -> PlanResult<Arc<PlanTree>> {
        if let Some(plan) = self.cache.get(sql) {
            log::debug!("plan cache hit");
            return Ok(plan);
        }
        let stmt = Parser::parse(sql)?;
        let optimized = self.plan(&stmt)?;
        Ok(self.cache.insert(sql, optimized.plan))
    }

    /// Explain how SQL text is planned: the optimized tree, the rules that
    /// ran and any notes they left.
    pub fn explain(&self, sql: &str) -> PlanResult<String> {
        let stmt = Parser::parse(sql)?;
        let built = self.build(&stmt)?;
        let mut out = format!("Bound Plan:\n{}\n", built);
        let optimized = self.optimize(built)?;
        out.push_str(&format!("Optimized Plan:\n{}", optimized.explain()));
        Ok(out)
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }
}
