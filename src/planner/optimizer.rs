//! Rule-driven plan optimizer.
//!
//! The optimizer seeds a [`RuleStack`] from the shape of the bound plan and
//! pops rules until the stack is empty. Rules push follow-up work only when
//! they changed the tree, so a run always converges; the execution count
//! guard turns a misbehaving rule set into an error instead of a hang.

use std::fmt;

use super::config::PlannerConfig;
use super::context::{AliasGenerator, AnalysisRecord, RuleContext, RuleTrace};
use super::error::{PlanError, PlanResult};
use super::node::PlanTree;
use super::rules::{Rule, RuleStack};
use crate::expr::ExprSimplifier;
use crate::metadata::{CapabilitiesFinder, Metadata};

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    pub plan: PlanTree,
    /// Rules in execution order.
    pub rules_applied: Vec<Rule>,
    pub record: AnalysisRecord,
}

impl OptimizedPlan {
    /// Plan tree followed by the rules that produced it and any notes left
    /// by the rules.
    pub fn explain(&self) -> String {
        let mut out = format!("{}", self.plan);
        let rules: Vec<&str> = self.rules_applied.iter().map(|r| r.name()).collect();
        out.push_str(&format!("\nRules: {}\n", rules.join(", ")));
        for note in &self.record.notes {
            out.push_str(&format!("Note: {}\n", note));
        }
        out
    }
}

impl fmt::Display for OptimizedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plan)
    }
}

/// Query optimizer.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: PlannerConfig,
}

impl Optimizer {
    pub fn new(config: &PlannerConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Optimize a bound plan.
    pub fn optimize(
        &self,
        plan: PlanTree,
        metadata: &dyn Metadata,
        capabilities: &dyn CapabilitiesFinder,
        simplifier: &dyn ExprSimplifier,
    ) -> PlanResult<OptimizedPlan> {
        let stack = RuleStack::for_plan(&plan);
        self.run(plan, stack, metadata, capabilities, simplifier)
    }

    /// Run an explicit rule schedule instead of the one derived from the plan.
    pub fn run(
        &self,
        mut plan: PlanTree,
        mut stack: RuleStack,
        metadata: &dyn Metadata,
        capabilities: &dyn CapabilitiesFinder,
        simplifier: &dyn ExprSimplifier,
    ) -> PlanResult<OptimizedPlan> {
        let mut ctx = RuleContext::new(metadata, capabilities, simplifier, &self.config);
        ctx.aliases = AliasGenerator::for_plan(&plan);
        let mut applied = Vec::new();

        while let Some(rule) = stack.pop() {
            if applied.len() >= self.config.max_rule_executions {
                log::warn!(
                    "giving up after {} rule executions, {} still queued",
                    applied.len(),
                    stack.len() + 1
                );
                return Err(PlanError::RuleLimitExceeded(self.config.max_rule_executions));
            }
            let before = self.config.enable_trace.then(|| plan.to_string());
            log::debug!("executing {} (#{})", rule, applied.len() + 1);
            rule.implementation().execute(&mut plan, &mut stack, &mut ctx)?;
            if let Some(before) = before {
                let after = plan.to_string();
                log::trace!("after {}:\n{}", rule, after);
                ctx.record.traces.push(RuleTrace {
                    rule: rule.name(),
                    before,
                    after,
                });
            }
            applied.push(rule);
        }

        log::debug!("optimized plan after {} rule executions:\n{}", applied.len(), plan);
        Ok(OptimizedPlan {
            plan,
            rules_applied: applied,
            record: ctx.record,
        })
    }
}
