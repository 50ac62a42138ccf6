//! Rewrite rules and the stack that schedules them.
//!
//! Rules are executed one at a time off a LIFO stack. A rule may push
//! follow-up rules; those run before anything already queued.

mod assign_output;
mod calculate_cost;
mod choose_dependent;
mod choose_join;
mod clean_criteria;
mod copy_criteria;
mod decompose_join;
pub(crate) mod frame;
pub(crate) mod join_strength;
pub(crate) mod partition;
mod push_limit;
mod push_non_join;
mod push_select;
mod raise_access;
mod raise_null;
mod implement_join;
mod validate_access;

use std::collections::VecDeque;
use std::fmt;

use super::context::RuleContext;
use super::error::PlanResult;
use super::node::{NodeKind, PlanTree};

/// Rewrite rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    PushSelectCriteria,
    CopyCriteria,
    PushNonJoinCriteria,
    CleanCriteria,
    RaiseNull,
    DecomposeJoin,
    RaiseAccess,
    PushLimit,
    ChooseJoinStrategy,
    ChooseDependent,
    CalculateCost,
    AssignOutputElements,
    ImplementJoinStrategy,
    ValidateAccess,
}

impl Rule {
    pub fn implementation(&self) -> &'static dyn OptimizationRule {
        match self {
            Rule::PushSelectCriteria => &push_select::PushSelectCriteria,
            Rule::CopyCriteria => &copy_criteria::CopyCriteria,
            Rule::PushNonJoinCriteria => &push_non_join::PushNonJoinCriteria,
            Rule::CleanCriteria => &clean_criteria::CleanCriteria,
            Rule::RaiseNull => &raise_null::RaiseNull,
            Rule::DecomposeJoin => &decompose_join::DecomposeJoin,
            Rule::RaiseAccess => &raise_access::RaiseAccess,
            Rule::PushLimit => &push_limit::PushLimit,
            Rule::ChooseJoinStrategy => &choose_join::ChooseJoinStrategy,
            Rule::ChooseDependent => &choose_dependent::ChooseDependent,
            Rule::CalculateCost => &calculate_cost::CalculateCost,
            Rule::AssignOutputElements => &assign_output::AssignOutputElements,
            Rule::ImplementJoinStrategy => &implement_join::ImplementJoinStrategy,
            Rule::ValidateAccess => &validate_access::ValidateAccess,
        }
    }

    pub fn name(&self) -> &'static str {
        self.implementation().name()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A plan rewrite.
pub trait OptimizationRule: Send + Sync {
    /// Name of the rule.
    fn name(&self) -> &'static str;

    /// Rewrite the plan in place, pushing any follow-up rules onto `stack`.
    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()>;
}

/// LIFO stack of pending rules. The head is the next rule to run.
#[derive(Debug, Clone, Default)]
pub struct RuleStack {
    rules: VecDeque<Rule>,
}

impl RuleStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// The initial schedule for a plan, shaped by which node kinds it has.
    /// The first rule listed runs first.
    pub fn for_plan(plan: &PlanTree) -> Self {
        let has = |kind| !plan.find_all(kind).is_empty();
        let joins = has(NodeKind::Join);
        let set_ops = has(NodeKind::SetOp);
        let limits = has(NodeKind::TupleLimit);

        let mut stack = RuleStack::new();
        stack.add_last(Rule::PushSelectCriteria);
        if joins {
            stack.add_last(Rule::PushNonJoinCriteria);
            stack.add_last(Rule::CopyCriteria);
        }
        stack.add_last(Rule::CleanCriteria);
        stack.add_last(Rule::RaiseNull);
        if joins && set_ops {
            stack.add_last(Rule::DecomposeJoin);
        }
        if set_ops {
            stack.add_last(Rule::RaiseAccess);
        }
        if limits {
            stack.add_last(Rule::PushLimit);
        }
        stack.add_last(Rule::ChooseJoinStrategy);
        stack.add_last(Rule::ChooseDependent);
        stack.add_last(Rule::CalculateCost);
        stack.add_last(Rule::AssignOutputElements);
        stack.add_last(Rule::ImplementJoinStrategy);
        stack.add_last(Rule::ValidateAccess);
        stack
    }

    /// Schedule a rule to run next.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push_front(rule);
    }

    /// Schedule a rule to run after everything already queued.
    pub fn add_last(&mut self, rule: Rule) {
        self.rules.push_back(rule);
    }

    pub fn pop(&mut self) -> Option<Rule> {
        self.rules.pop_front()
    }

    pub fn contains(&self, rule: Rule) -> bool {
        self.rules.contains(&rule)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
