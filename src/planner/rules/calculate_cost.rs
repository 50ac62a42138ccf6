//! Cardinality estimates for every node.

use super::{OptimizationRule, RuleStack};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, Operator, PlanTree};
use crate::planner::props::{JoinType, SetOperation};

/// Fraction of rows assumed to pass a criteria.
const SELECTIVITY: f64 = 0.33;

pub struct CalculateCost;

impl OptimizationRule for CalculateCost {
    fn name(&self) -> &'static str {
        "CalculateCost"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        for node in plan.postorder(plan.root()) {
            let estimate = estimate(plan, node, ctx)?;
            plan.node_mut(node).estimate = estimate;
        }
        Ok(())
    }
}

fn estimate(tree: &PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Option<f64>> {
    let child = |i: usize| tree.child(node, i).and_then(|c| tree.node(c).estimate);
    let estimate = match tree.op(node) {
        Operator::Source(_) if tree.children(node).is_empty() => {
            match tree.source_group(node).and_then(|g| g.definition.clone()) {
                Some(table) => ctx.metadata.cardinality(&table)?,
                None => None,
            }
        }
        Operator::Null => Some(0.0),
        Operator::Select(_) => child(0).map(|c| c * SELECTIVITY),
        Operator::DupRemove => child(0).map(|c| c / 2.0),
        Operator::Group(g) if g.group_cols.is_empty() => Some(1.0),
        Operator::Group(_) => child(0).map(|c| (c / 10.0).max(1.0)),
        Operator::Join(j) => match (child(0), child(1)) {
            (Some(l), Some(r)) if j.join_type == JoinType::Cross => Some(l * r),
            (Some(l), Some(r)) => Some(l.max(r)),
            _ => None,
        },
        Operator::SetOp(s) => match (child(0), child(1)) {
            (Some(l), Some(r)) => Some(match s.op {
                SetOperation::Union => l + r,
                SetOperation::Intersect => l.min(r),
                SetOperation::Except => l,
            }),
            _ => None,
        },
        Operator::TupleLimit(l) => {
            let limit = l
                .limit
                .as_ref()
                .and_then(|e| e.as_constant())
                .and_then(|v| v.as_i64())
                .map(|n| n.max(0) as f64);
            match (child(0), limit) {
                (Some(c), Some(n)) => Some(c.min(n)),
                (None, Some(n)) => Some(n),
                (c, None) => c,
            }
        }
        Operator::Source(_) | Operator::Access(_) | Operator::Project(_) | Operator::Sort(_) => child(0),
    };
    Ok(estimate)
}
