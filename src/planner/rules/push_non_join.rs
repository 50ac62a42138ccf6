//! Move single-side ON conjuncts out of joins into filters on that side.

use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::Expr;
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeKind, Operator, PlanTree};
use crate::planner::props::{JoinType, SelectProps};

pub struct PushNonJoinCriteria;

impl OptimizationRule for PushNonJoinCriteria {
    fn name(&self) -> &'static str {
        "PushNonJoinCriteria"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, _ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut moved = false;
        for join in plan.find_all(NodeKind::Join) {
            let Some(props) = plan.join(join).cloned() else {
                continue;
            };
            let (Some(left), Some(right)) = (plan.child(join, 0), plan.child(join, 1)) else {
                continue;
            };
            let (push_left, push_right) = match props.join_type {
                JoinType::Inner => (true, true),
                JoinType::LeftOuter => (false, true),
                JoinType::RightOuter => (true, false),
                JoinType::Cross | JoinType::FullOuter => continue,
            };
            let visible = plan.groups(join).clone();
            let left_groups = plan.groups(left).clone();
            let right_groups = plan.groups(right).clone();

            let mut kept = Vec::new();
            let mut to_left = Vec::new();
            let mut to_right = Vec::new();
            for conjunct in props.criteria {
                let groups: std::collections::BTreeSet<_> =
                    conjunct.groups().intersection(&visible).cloned().collect();
                if groups.is_empty() || !conjunct.is_deterministic() {
                    kept.push(conjunct);
                } else if push_left && groups.is_subset(&left_groups) {
                    to_left.push(conjunct);
                } else if push_right && groups.is_subset(&right_groups) {
                    to_right.push(conjunct);
                } else {
                    kept.push(conjunct);
                }
            }
            if to_left.is_empty() && to_right.is_empty() {
                continue;
            }
            for (side, conjuncts) in [(left, to_left), (right, to_right)] {
                if conjuncts.is_empty() {
                    continue;
                }
                let select = plan.add_node(Operator::Select(SelectProps::new(Expr::and(conjuncts))));
                plan.insert_above(side, select);
            }
            if let Some(j) = plan.join_mut(join) {
                if j.join_type == JoinType::Inner && kept.is_empty() {
                    j.join_type = JoinType::Cross;
                }
                j.criteria = kept;
            }
            moved = true;
        }
        if moved {
            stack.push(Rule::PushSelectCriteria);
        }
        Ok(())
    }
}
