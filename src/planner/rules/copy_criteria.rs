//! Copy single-column constant criteria across join equalities.
//!
//! With `a.x = b.x` joining two sides, a filter `a.x = 5` on one side
//! implies `b.x = 5` on the other for every joined row. The copy is marked
//! so that it can be dropped again if it cannot be pushed into a source.

use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::{CompareOp, ElementSymbol, Expr};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{JoinType, SelectProps};

pub struct CopyCriteria;

impl OptimizationRule for CopyCriteria {
    fn name(&self) -> &'static str {
        "CopyCriteria"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, _ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut copied = 0;
        // Bottom-up so copies made at a lower join feed the joins above it.
        let joins: Vec<NodeId> = plan
            .postorder(plan.root())
            .into_iter()
            .filter(|n| plan.kind(*n) == NodeKind::Join)
            .collect();
        for join in joins {
            copied += copy_across(plan, join);
        }
        if copied > 0 {
            log::debug!("copied {} criteria across join equalities", copied);
            stack.push(Rule::PushSelectCriteria);
        }
        Ok(())
    }
}

/// Column equalities of a join, oriented as (left column, right column).
fn equalities(tree: &PlanTree, join: NodeId, left: NodeId, right: NodeId) -> Vec<(ElementSymbol, ElementSymbol)> {
    let Some(props) = tree.join(join) else {
        return Vec::new();
    };
    let (lg, rg) = (tree.groups(left), tree.groups(right));
    props
        .criteria
        .iter()
        .filter_map(|c| match c {
            Expr::Compare {
                left: l,
                op: CompareOp::Eq,
                right: r,
            } => match (l.as_column(), r.as_column()) {
                (Some(a), Some(b)) if lg.contains(&a.group) && rg.contains(&b.group) => Some((a.clone(), b.clone())),
                (Some(a), Some(b)) if rg.contains(&a.group) && lg.contains(&b.group) => Some((b.clone(), a.clone())),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Selects in the same frame as `side`, including `side` itself.
fn frame_selects(tree: &PlanTree, side: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![side];
    while let Some(n) = stack.pop() {
        match tree.kind(n) {
            NodeKind::Select => out.push(n),
            NodeKind::Source => continue,
            _ => {}
        }
        stack.extend(tree.children(n).iter().copied());
    }
    out
}

/// The column a criteria constrains if it compares one column with constants.
fn constrained_column(criteria: &Expr) -> Option<&ElementSymbol> {
    match criteria {
        Expr::Compare { left, right, .. } => match (left.as_column(), right.as_column()) {
            (Some(c), None) if right.is_constant() => Some(c),
            (None, Some(c)) if left.is_constant() => Some(c),
            _ => None,
        },
        Expr::InList { expr, list, .. } if list.iter().all(|e| e.is_constant()) => expr.as_column(),
        _ => None,
    }
}

fn copy_across(tree: &mut PlanTree, join: NodeId) -> usize {
    let Some(join_type) = tree.join(join).map(|j| j.join_type) else {
        return 0;
    };
    let (Some(left), Some(right)) = (tree.child(join, 0), tree.child(join, 1)) else {
        return 0;
    };
    let directions: Vec<(NodeId, NodeId, bool)> = match join_type {
        // (from, to, from_is_left)
        JoinType::Inner => vec![(left, right, true), (right, left, false)],
        JoinType::LeftOuter => vec![(left, right, true)],
        _ => return 0,
    };
    let pairs = equalities(tree, join, left, right);
    if pairs.is_empty() {
        return 0;
    }

    let mut count = 0;
    for (from, to, from_is_left) in directions {
        let candidates: Vec<Expr> = frame_selects(tree, from)
            .into_iter()
            .filter_map(|s| tree.select(s))
            .filter(|p| !p.phantom && !p.having)
            .flat_map(|p| p.criteria.conjuncts())
            .collect();
        for criteria in candidates {
            let Some(column) = constrained_column(&criteria).cloned() else {
                continue;
            };
            for (l, r) in &pairs {
                let (source_col, target_col) = if from_is_left { (l, r) } else { (r, l) };
                if *source_col != column {
                    continue;
                }
                let copy = criteria.transform(&|e| match e {
                    Expr::Column(sym) if *sym == column => Some(Expr::Column(target_col.clone())),
                    _ => None,
                });
                let exists = frame_selects(tree, to)
                    .into_iter()
                    .filter_map(|s| tree.select(s))
                    .any(|p| p.criteria.conjuncts().contains(&copy));
                if exists {
                    continue;
                }
                let mut props = SelectProps::new(copy);
                props.copied = true;
                let select = tree.add_node(Operator::Select(props));
                let target = tree.children(join).get(if from_is_left { 1 } else { 0 }).copied().unwrap_or(to);
                tree.insert_above(target, select);
                count += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{apply_rules, build};

    fn copied_criteria(tree: &PlanTree) -> Vec<String> {
        tree.find_all(NodeKind::Select)
            .into_iter()
            .filter_map(|s| tree.select(s))
            .filter(|p| p.copied)
            .map(|p| p.criteria.to_string())
            .collect()
    }

    #[test]
    fn test_copies_constant_across_inner_join() {
        let mut tree = build("SELECT o.id FROM orders o, customers c WHERE o.customer_id = c.id AND o.customer_id = 7");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CopyCriteria]).unwrap();
        assert_eq!(copied_criteria(&tree), vec!["c.id = 7".to_string()]);
    }

    #[test]
    fn test_copies_in_list() {
        let mut tree =
            build("SELECT o.id FROM orders o, customers c WHERE o.customer_id = c.id AND c.id IN (1, 2)");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CopyCriteria]).unwrap();
        assert_eq!(copied_criteria(&tree), vec!["o.customer_id IN (1, 2)".to_string()]);
    }

    #[test]
    fn test_left_join_copies_only_outward_to_inner() {
        let mut tree = build(
            "SELECT o.id FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id \
             WHERE o.customer_id = 7",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CopyCriteria]).unwrap();
        assert_eq!(copied_criteria(&tree), vec!["c.id = 7".to_string()]);

        let mut tree = build(
            "SELECT o.id FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id AND c.id = 7",
        );
        apply_rules(&mut tree, &[Rule::PushNonJoinCriteria, Rule::CopyCriteria]).unwrap();
        assert!(copied_criteria(&tree).is_empty());
    }

    #[test]
    fn test_does_not_duplicate() {
        let mut tree = build(
            "SELECT o.id FROM orders o, customers c WHERE o.customer_id = c.id AND o.customer_id = 7 AND c.id = 7",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CopyCriteria, Rule::CopyCriteria]).unwrap();
        assert!(copied_criteria(&tree).is_empty());
    }

    #[test]
    fn test_transitive_through_two_joins() {
        let mut tree = build(
            "SELECT o.id FROM orders o, customers c, t1 WHERE o.customer_id = c.id AND c.id = t1.a AND o.customer_id = 3",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CopyCriteria]).unwrap();
        let mut copies = copied_criteria(&tree);
        copies.sort();
        assert_eq!(copies, vec!["c.id = 3".to_string(), "t1.a = 3".to_string()]);
    }
}
