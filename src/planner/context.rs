//! State shared by the rules of one optimization run.

use std::collections::HashSet;

use super::config::PlannerConfig;
use super::node::{NodeKind, PlanTree};
use crate::expr::{ExprSimplifier, GroupSymbol};
use crate::metadata::{CapabilitiesFinder, Metadata};

/// One rule execution, recorded when tracing is enabled.
#[derive(Debug, Clone)]
pub struct RuleTrace {
    pub rule: &'static str,
    pub before: String,
    pub after: String,
}

/// Debug record of an optimization run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRecord {
    pub traces: Vec<RuleTrace>,
    /// Free-form annotations left by rules (why a rewrite was skipped, ...).
    pub notes: Vec<String>,
}

impl AnalysisRecord {
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::trace!("{}", message);
        self.notes.push(message);
    }
}

/// Hands out fresh group names for rewritten subtrees.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    next_seq: u32,
    next_name: u32,
    used: HashSet<String>,
}

impl AliasGenerator {
    /// A generator that will not collide with any group already in `plan`.
    pub fn for_plan(plan: &PlanTree) -> Self {
        let mut aliases = AliasGenerator::default();
        for source in plan.preorder(plan.root()) {
            if plan.kind(source) != NodeKind::Source {
                continue;
            }
            if let Some(group) = plan.source_group(source) {
                aliases.next_seq = aliases.next_seq.max(group.seq);
                aliases.used.insert(group.name.to_lowercase());
            }
        }
        aliases
    }

    /// The same group under a sequence number no other symbol uses.
    pub fn realias(&mut self, group: &GroupSymbol) -> GroupSymbol {
        self.next_seq += 1;
        group.with_seq(self.next_seq)
    }

    /// A brand new virtual group.
    pub fn fresh(&mut self, prefix: &str) -> GroupSymbol {
        loop {
            self.next_name += 1;
            let name = format!("{}{}", prefix, self.next_name);
            if self.used.insert(name.to_lowercase()) {
                return GroupSymbol::new(name);
            }
        }
    }
}

/// Collaborators and scratch state available to every rule.
pub struct RuleContext<'a> {
    pub metadata: &'a dyn Metadata,
    pub capabilities: &'a dyn CapabilitiesFinder,
    pub simplifier: &'a dyn ExprSimplifier,
    pub config: &'a PlannerConfig,
    pub aliases: AliasGenerator,
    pub record: AnalysisRecord,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        metadata: &'a dyn Metadata,
        capabilities: &'a dyn CapabilitiesFinder,
        simplifier: &'a dyn ExprSimplifier,
        config: &'a PlannerConfig,
    ) -> Self {
        Self {
            metadata,
            capabilities,
            simplifier,
            config,
            aliases: AliasGenerator::default(),
            record: AnalysisRecord::default(),
        }
    }
}
