//! Push whole set operations into a source.
//!
//! When every branch of a set operation reads from models served by the
//! same connector, and everything between the set operation and each
//! branch's access node is something that connector can evaluate, the
//! branch access nodes are removed and a single one is placed above the
//! set operation.

use super::{OptimizationRule, RuleStack};
use crate::metadata::CapabilitiesFinder;
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::AccessProps;

pub struct RaiseAccess;

impl OptimizationRule for RaiseAccess {
    fn name(&self) -> &'static str {
        "RaiseAccess"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        // Inner set operations first so that outer ones see a single access.
        let set_ops: Vec<NodeId> = plan
            .postorder(plan.root())
            .into_iter()
            .filter(|n| plan.kind(*n) == NodeKind::SetOp)
            .collect();
        for set_op in set_ops {
            raise_over(plan, set_op, ctx.capabilities)?;
        }
        Ok(())
    }
}

/// The access node at the bottom of a branch, if the nodes above it can
/// all be evaluated by its model.
fn branch_access(tree: &PlanTree, branch: NodeId, caps: &dyn CapabilitiesFinder) -> PlanResult<Option<NodeId>> {
    let mut between = Vec::new();
    let mut node = branch;
    let access = loop {
        match tree.op(node) {
            Operator::Access(_) => break node,
            Operator::Project(_) | Operator::Select(_) | Operator::Sort(_) | Operator::DupRemove | Operator::TupleLimit(_) => {
                between.push(node);
                match tree.first_child(node) {
                    Some(c) => node = c,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        }
    };
    let Some(model) = tree.access(access).map(|a| a.model.clone()) else {
        return Ok(None);
    };
    for n in between {
        let supported = match tree.op(n) {
            Operator::Project(p) => p.into.is_none() && p.columns.iter().all(|c| c.is_deterministic()),
            Operator::Select(s) => {
                !s.having && s.criteria.is_deterministic() && caps.supports_criteria(&model)?
            }
            Operator::Sort(_) => caps.supports_order_by(&model)?,
            Operator::DupRemove => true,
            Operator::TupleLimit(l) => {
                caps.supports_row_limit(&model)? && (l.offset.is_none() || caps.supports_row_offset(&model)?)
            }
            _ => false,
        };
        if !supported {
            return Ok(None);
        }
    }
    Ok(Some(access))
}

fn raise_over(tree: &mut PlanTree, set_op: NodeId, caps: &dyn CapabilitiesFinder) -> PlanResult<()> {
    let mut accesses = Vec::new();
    for branch in tree.children(set_op).to_vec() {
        match branch_access(tree, branch, caps)? {
            Some(access) => accesses.push(access),
            None => return Ok(()),
        }
    }
    let models: Vec<String> = accesses
        .iter()
        .filter_map(|a| tree.access(*a).map(|p| p.model.clone()))
        .collect();
    let Some(first) = models.first().cloned() else {
        return Ok(());
    };
    for model in &models {
        if !caps.supports_set_operations(model)? || !caps.same_connector(&first, model)? {
            return Ok(());
        }
    }

    for access in accesses {
        tree.splice_out(access);
    }
    let access = tree.add_node(Operator::Access(AccessProps { model: first.clone() }));
    tree.insert_above(set_op, access);
    log::debug!("raised access [{}] above set operation {}", first, set_op);
    Ok(())
}
