//! Propagate empty results upward.
//!
//! A Null node is raised through every parent that would produce no rows
//! from an empty input. Outer joins and unions instead lose the empty
//! branch, and references to its columns above become typed NULLs.

use std::collections::HashMap;

use super::frame::{convert_frame, null_mapping};
use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::Expr;
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{JoinType, ProjectProps, SetOperation};

pub struct RaiseNull;

impl OptimizationRule for RaiseNull {
    fn name(&self) -> &'static str {
        "RaiseNull"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, _ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut substituted = false;
        loop {
            let mut progressed = false;
            for null in plan.find_all(NodeKind::Null) {
                match raise(plan, null) {
                    Outcome::Stuck => continue,
                    Outcome::Raised => {}
                    Outcome::Substituted => substituted = true,
                }
                progressed = true;
                break;
            }
            if !progressed {
                break;
            }
        }
        if substituted {
            stack.push(Rule::CleanCriteria);
        }
        Ok(())
    }
}

enum Outcome {
    Stuck,
    Raised,
    /// A branch was removed and NULLs were substituted for its columns.
    Substituted,
}

fn raise(tree: &mut PlanTree, null: NodeId) -> Outcome {
    let Some(parent) = tree.parent(null) else {
        return Outcome::Stuck;
    };
    let side = tree.child_index(null).unwrap_or(0);
    match tree.op(parent) {
        Operator::Join(join) => {
            let join_type = join.join_type;
            let whole = match join_type {
                JoinType::Inner | JoinType::Cross => true,
                JoinType::LeftOuter => side == 0,
                JoinType::RightOuter => side == 1,
                JoinType::FullOuter => false,
            };
            if whole {
                tree.replace_with_null(parent);
                return Outcome::Raised;
            }
            let Some(survivor) = tree.child(parent, 1 - side) else {
                return Outcome::Stuck;
            };
            let mapping = null_mapping(&tree.output_columns(null), tree.groups(null));
            tree.detach(survivor);
            tree.replace(parent, survivor);
            convert_frame(tree, survivor, &mapping);
            log::debug!("removed {} join {} with an empty side", join_type, parent);
            Outcome::Substituted
        }
        Operator::SetOp(props) => {
            let (op, all) = (props.op, props.all);
            let whole = match op {
                SetOperation::Intersect => true,
                SetOperation::Except => side == 0,
                SetOperation::Union => false,
            };
            if whole {
                tree.replace_with_null(parent);
                return Outcome::Raised;
            }
            degrade_set_op(tree, parent, side, all);
            Outcome::Raised
        }
        Operator::Group(g) => {
            // A global aggregate still yields one row over no input.
            if g.group_cols.is_empty() {
                return Outcome::Stuck;
            }
            tree.replace_with_null(parent);
            Outcome::Raised
        }
        Operator::Project(p) if p.into.is_some() => Outcome::Stuck,
        Operator::Null => Outcome::Stuck,
        _ => {
            tree.replace_with_null(parent);
            Outcome::Raised
        }
    }
}

/// Replace a two-branch set operation with its surviving branch.
fn degrade_set_op(tree: &mut PlanTree, set_op: NodeId, null_side: usize, all: bool) {
    let Some(survivor) = tree.child(set_op, 1 - null_side) else {
        return;
    };
    if tree.kind(survivor) == NodeKind::Null {
        tree.replace_with_null(set_op);
        return;
    }
    let old_outputs = tree.output_columns(set_op);
    let names: Vec<String> = old_outputs.iter().map(|c| c.output_name()).collect();
    tree.detach(survivor);

    // Align the survivor's column names with the set operation's.
    let mut project = survivor;
    while tree.kind(project) == NodeKind::DupRemove {
        match tree.first_child(project) {
            Some(c) => project = c,
            None => break,
        }
    }
    let top = match tree.project_mut(project) {
        Some(p) if p.into.is_none() => {
            p.columns = rename(&p.columns, &names);
            survivor
        }
        _ => {
            let columns = rename(&tree.output_columns(survivor), &names);
            let wrapper = tree.add_node(Operator::Project(ProjectProps { columns, into: None }));
            tree.add_child(wrapper, survivor);
            wrapper
        }
    };
    let top = if !all && tree.kind(top) != NodeKind::DupRemove {
        let distinct = tree.add_node(Operator::DupRemove);
        tree.add_child(distinct, top);
        distinct
    } else {
        top
    };
    tree.replace(set_op, top);

    let new_outputs = tree.output_columns(top);
    retarget(tree, top, &old_outputs, &new_outputs);
    log::debug!("set operation {} reduced to its remaining branch", set_op);
}

fn rename(columns: &[Expr], names: &[String]) -> Vec<Expr> {
    columns
        .iter()
        .zip(names)
        .map(|(c, name)| {
            if c.output_name() == *name {
                c.clone()
            } else {
                Expr::alias(name.clone(), c.unalias().clone())
            }
        })
        .collect()
}

/// Point references to the old set operation outputs at the new ones.
fn retarget(tree: &mut PlanTree, start: NodeId, old: &[Expr], new: &[Expr]) {
    if old == new {
        return;
    }
    let mapping: HashMap<&Expr, &Expr> = old.iter().zip(new).collect();
    let swap = |e: &Expr| e.transform(&|x| mapping.get(x).map(|n| (*n).clone()));
    for ancestor in tree.ancestors(start) {
        match tree.op_mut(ancestor) {
            Operator::Sort(s) => {
                for k in s.keys.iter_mut() {
                    k.expr = swap(&k.expr);
                }
            }
            Operator::DupRemove | Operator::TupleLimit(_) | Operator::Select(_) => {}
            Operator::Project(p) => {
                p.columns = p
                    .columns
                    .iter()
                    .map(|c| match c {
                        Expr::Alias { name, expr } => Expr::alias(name.clone(), swap(expr)),
                        other => {
                            let swapped = swap(other);
                            if swapped.output_name() == other.output_name() {
                                swapped
                            } else {
                                Expr::alias(other.output_name(), swapped.unalias().clone())
                            }
                        }
                    })
                    .collect();
                break;
            }
            Operator::Source(s) => {
                if let Some(map) = s.symbol_map.as_mut() {
                    map.set_values(new);
                }
                break;
            }
            _ => break,
        }
    }
}
