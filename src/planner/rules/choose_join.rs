//! Classify join criteria into merge keys and residual criteria.

use std::collections::BTreeSet;

use super::{OptimizationRule, RuleStack};
use crate::expr::{CompareOp, Expr, GroupSymbol};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, PlanTree};
use crate::planner::props::{JoinStrategy, JoinType};

pub struct ChooseJoinStrategy;

impl OptimizationRule for ChooseJoinStrategy {
    fn name(&self) -> &'static str {
        "ChooseJoinStrategy"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, _ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        for join in plan.find_all(NodeKind::Join) {
            choose(plan, join);
        }
        Ok(())
    }
}

/// Split an equality into (left, right) operands when each side references
/// groups of exactly one join child.
pub(crate) fn key_pair(
    criteria: &Expr,
    left: &BTreeSet<GroupSymbol>,
    right: &BTreeSet<GroupSymbol>,
) -> Option<(Expr, Expr)> {
    let Expr::Compare {
        left: a,
        op: CompareOp::Eq,
        right: b,
    } = criteria
    else {
        return None;
    };
    // References to groups outside the join are constants here.
    let visible = |e: &Expr| -> BTreeSet<GroupSymbol> {
        e.groups()
            .into_iter()
            .filter(|g| left.contains(g) || right.contains(g))
            .collect()
    };
    let (ga, gb) = (visible(a), visible(b));
    if ga.is_empty() || gb.is_empty() {
        return None;
    }
    if ga.is_subset(left) && gb.is_subset(right) {
        Some((a.as_ref().clone(), b.as_ref().clone()))
    } else if ga.is_subset(right) && gb.is_subset(left) {
        Some((b.as_ref().clone(), a.as_ref().clone()))
    } else {
        None
    }
}

fn choose(tree: &mut PlanTree, join: NodeId) {
    let (Some(l), Some(r)) = (tree.child(join, 0), tree.child(join, 1)) else {
        return;
    };
    let left = tree.groups(l).clone();
    let right = tree.groups(r).clone();
    let Some(props) = tree.join_mut(join) else {
        return;
    };

    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    let mut residual = Vec::new();
    for criteria in &props.criteria {
        match key_pair(criteria, &left, &right) {
            Some((lk, rk)) => {
                left_keys.push(lk);
                right_keys.push(rk);
            }
            None => residual.push(criteria.clone()),
        }
    }

    if props.join_type == JoinType::Inner && props.criteria.is_empty() {
        props.join_type = JoinType::Cross;
    }
    let strategy = if left_keys.is_empty() {
        JoinStrategy::NestedLoop
    } else {
        JoinStrategy::Merge
    };
    log::trace!("join {} uses {} with {} key(s)", join, strategy, left_keys.len());
    props.strategy = Some(strategy);
    props.left_keys = left_keys;
    props.right_keys = right_keys;
    props.residual = residual;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::rules::Rule;
    use crate::testing::{apply_rules, build};

    fn chosen(sql: &str) -> crate::planner::props::JoinProps {
        let mut tree = build(sql);
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::ChooseJoinStrategy]).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        tree.join(join).unwrap().clone()
    }

    #[test]
    fn test_equality_becomes_oriented_keys() {
        let props = chosen("SELECT o.id FROM orders o JOIN customers c ON c.id = o.customer_id AND o.amount > c.id");
        assert_eq!(props.strategy, Some(JoinStrategy::Merge));
        assert_eq!(props.left_keys.len(), 1);
        assert_eq!(props.left_keys[0].to_string(), "o.customer_id");
        assert_eq!(props.right_keys[0].to_string(), "c.id");
        assert_eq!(props.residual.len(), 1);
        assert_eq!(props.criteria.len(), 2);
    }

    #[test]
    fn test_expression_keys() {
        let props = chosen("SELECT c.id FROM customers c, orders o WHERE upper(c.name) = o.status");
        assert_eq!(props.strategy, Some(JoinStrategy::Merge));
        assert_eq!(props.left_keys[0].to_string(), "upper(c.name)");
    }

    #[test]
    fn test_no_criteria_is_cross() {
        let mut tree = build("SELECT t1.a FROM t1 INNER JOIN t2 ON t1.a = t2.a");
        let join = tree.find_all(NodeKind::Join)[0];
        tree.join_mut(join).unwrap().criteria.clear();
        apply_rules(&mut tree, &[Rule::ChooseJoinStrategy]).unwrap();
        let props = tree.join(join).unwrap();
        assert_eq!(props.join_type, JoinType::Cross);
        assert_eq!(props.strategy, Some(JoinStrategy::NestedLoop));
    }

    #[test]
    fn test_non_equality_is_nested_loop() {
        let props = chosen("SELECT t1.a FROM t1 LEFT OUTER JOIN t2 ON t1.a < t2.a");
        assert_eq!(props.join_type, JoinType::LeftOuter);
        assert_eq!(props.strategy, Some(JoinStrategy::NestedLoop));
        assert!(props.left_keys.is_empty());
        assert_eq!(props.residual.len(), 1);
    }

    #[test]
    fn test_single_sided_equality_is_residual() {
        let props = chosen("SELECT t1.a FROM t1 JOIN t2 ON t1.a = t1.b + t2.b");
        assert_eq!(props.strategy, Some(JoinStrategy::NestedLoop));
        assert_eq!(props.residual.len(), 1);
    }
}
