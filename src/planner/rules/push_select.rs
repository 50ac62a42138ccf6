//! Move filters as close to their sources as the plan allows.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::join_strength::optimize_join_type;
use super::{OptimizationRule, RuleStack};
use crate::expr::{ElementSymbol, Expr, GroupSymbol};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{JoinType, SelectProps};

pub struct PushSelectCriteria;

impl OptimizationRule for PushSelectCriteria {
    fn name(&self) -> &'static str {
        "PushSelectCriteria"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut worklist = plan.find_all(NodeKind::Select);
        let mut done = HashSet::new();
        while let Some(select) = worklist.pop() {
            if !done.insert(select) {
                continue;
            }
            push_select(plan, select, ctx, &mut worklist)?;
        }
        Ok(())
    }
}

/// Where a walk down from a Select ended.
enum Placement {
    /// Put the Select directly above this node.
    Above(NodeId),
    /// The criteria became part of this join's ON clause.
    MergedInto(NodeId),
}

fn frame_groups(criteria: &Expr, visible: &BTreeSet<GroupSymbol>) -> BTreeSet<GroupSymbol> {
    criteria.groups().intersection(visible).cloned().collect()
}

fn push_select(tree: &mut PlanTree, select: NodeId, ctx: &mut RuleContext<'_>, worklist: &mut Vec<NodeId>) -> PlanResult<()> {
    let Some(props) = tree.select(select) else {
        return Ok(());
    };
    if props.phantom || !props.criteria.is_deterministic() {
        return Ok(());
    }
    let Some(start) = tree.first_child(select) else {
        return Ok(());
    };

    let mut criteria = props.criteria.clone();
    let mut groups = frame_groups(&criteria, tree.groups(start));
    let mut node = start;

    let placement = loop {
        match tree.op(node) {
            Operator::Select(_) | Operator::DupRemove | Operator::Sort(_) => match tree.first_child(node) {
                Some(c) => node = c,
                None => break Placement::Above(node),
            },
            Operator::Group(g) => {
                let grouped = !criteria.contains_aggregate()
                    && criteria
                        .columns()
                        .into_iter()
                        .all(|c| g.group_cols.contains(&Expr::Column(c)));
                match tree.first_child(node) {
                    Some(c) if grouped => node = c,
                    _ => break Placement::Above(node),
                }
            }
            Operator::Access(access) => {
                let model = access.model.clone();
                let supported = ctx.capabilities.supports_criteria(&model)?;
                match tree.first_child(node) {
                    Some(c) if supported => node = c,
                    _ => break Placement::Above(node),
                }
            }
            Operator::Join(join) => {
                let join_type = join.join_type;
                let (Some(left), Some(right)) = (tree.child(node, 0), tree.child(node, 1)) else {
                    break Placement::Above(node);
                };
                if groups.is_subset(tree.groups(left))
                    && matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::LeftOuter)
                {
                    node = left;
                    continue;
                }
                if groups.is_subset(tree.groups(right))
                    && matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::RightOuter)
                {
                    node = right;
                    continue;
                }
                if join_type.is_outer() && optimize_join_type(tree, node, &criteria, ctx.simplifier) {
                    continue;
                }
                if matches!(join_type, JoinType::Inner | JoinType::Cross)
                    && !groups.is_empty()
                    && groups.is_subset(tree.groups(node))
                {
                    break Placement::MergedInto(node);
                }
                break Placement::Above(node);
            }
            Operator::Source(source) => {
                let Some(map) = source.symbol_map.clone() else {
                    break Placement::Above(node);
                };
                if !source.correlated.is_empty() || criteria.contains_aggregate() {
                    break Placement::Above(node);
                }
                let Some(below) = tree.first_child(node) else {
                    break Placement::Above(node);
                };
                let mut inner = below;
                while tree.kind(inner) == NodeKind::DupRemove {
                    match tree.first_child(inner) {
                        Some(c) => inner = c,
                        None => break,
                    }
                }
                match tree.kind(below) {
                    NodeKind::Project if tree.project(below).is_some_and(|p| p.into.is_none()) => {
                        let translated = criteria.substitute(&map.as_substitution());
                        let Some(project_child) = tree.first_child(below) else {
                            break Placement::Above(node);
                        };
                        if translated.contains_aggregate() || !translated.is_deterministic() {
                            break Placement::Above(node);
                        }
                        criteria = translated;
                        groups = frame_groups(&criteria, tree.groups(project_child));
                        node = project_child;
                    }
                    _ if tree.kind(inner) == NodeKind::SetOp => {
                        let keys = map.keys();
                        if distribute_into_branches(tree, select, inner, &keys, &criteria, worklist) {
                            if let Some(p) = tree.select_mut(select) {
                                p.phantom = true;
                            }
                        }
                        break Placement::Above(node);
                    }
                    _ => break Placement::Above(node),
                }
            }
            _ => break Placement::Above(node),
        }
    };

    match placement {
        Placement::MergedInto(join) => {
            tree.splice_out(select);
            if let Some(j) = tree.join_mut(join) {
                j.criteria.extend(criteria.conjuncts());
                j.join_type = JoinType::Inner;
            }
            log::trace!("merged select {} into join {}", select, join);
        }
        Placement::Above(target) => {
            if target == start {
                return Ok(());
            }
            tree.splice_out(select);
            if let Some(p) = tree.select_mut(select) {
                p.criteria = criteria;
            }
            tree.insert_above(target, select);
            log::trace!("pushed select {} above {}", select, target);
        }
    }
    Ok(())
}

/// Copy the criteria into every set operation branch that is topped by a
/// Project, translating the view's columns positionally. Returns true if
/// every branch received a copy.
fn distribute_into_branches(
    tree: &mut PlanTree,
    select: NodeId,
    set_op: NodeId,
    keys: &[ElementSymbol],
    criteria: &Expr,
    worklist: &mut Vec<NodeId>,
) -> bool {
    let mut all = true;
    for branch in tree.children(set_op).to_vec() {
        let mut top = branch;
        while tree.kind(top) == NodeKind::DupRemove {
            match tree.first_child(top) {
                Some(c) => top = c,
                None => break,
            }
        }
        let items = match tree.project(top) {
            Some(p) if p.into.is_none() && p.columns.len() == keys.len() => p.columns.clone(),
            _ => {
                all = false;
                continue;
            }
        };
        let mapping: HashMap<ElementSymbol, Expr> = keys
            .iter()
            .cloned()
            .zip(items.iter().map(|i| i.unalias().clone()))
            .collect();
        let translated = criteria.substitute(&mapping);
        let Some(project_child) = tree.first_child(top) else {
            all = false;
            continue;
        };
        if translated.contains_aggregate() || !translated.is_deterministic() {
            all = false;
            continue;
        }
        let mut props = tree.select(select).cloned().unwrap_or_else(|| SelectProps::new(Expr::boolean(true)));
        props.criteria = translated;
        props.phantom = false;
        let copy = tree.add_node(Operator::Select(props));
        tree.insert_above(project_child, copy);
        worklist.push(copy);
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::rules::Rule;
    use crate::testing::{apply_rules, build, count};

    fn selects(tree: &PlanTree) -> Vec<NodeId> {
        tree.find_all(NodeKind::Select)
    }

    fn parent_kind(tree: &PlanTree, id: NodeId) -> Option<NodeKind> {
        tree.parent(id).map(|p| tree.kind(p))
    }

    fn child_kind(tree: &PlanTree, id: NodeId) -> Option<NodeKind> {
        tree.first_child(id).map(|c| tree.kind(c))
    }

    #[test]
    fn test_push_to_join_side_and_under_access() {
        let mut tree = build("SELECT o.id FROM orders o, customers c WHERE o.amount > 5");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let sel = selects(&tree)[0];
        assert_eq!(parent_kind(&tree, sel), Some(NodeKind::Access));
        assert_eq!(child_kind(&tree, sel), Some(NodeKind::Source));
    }

    #[test]
    fn test_access_without_criteria_support_keeps_select_above() {
        let mut tree = build("SELECT id FROM items WHERE qty > 1");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let sel = selects(&tree)[0];
        assert_eq!(child_kind(&tree, sel), Some(NodeKind::Access));
    }

    #[test]
    fn test_spanning_criteria_merges_into_join() {
        let mut tree = build("SELECT o.id FROM orders o, customers c WHERE o.customer_id = c.id");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        assert_eq!(count(&tree, NodeKind::Select), 0);
        let join = tree.find_all(NodeKind::Join)[0];
        let props = tree.join(join).cloned().unwrap();
        assert_eq!(props.join_type, JoinType::Inner);
        assert_eq!(props.criteria.len(), 1);
    }

    #[test]
    fn test_inner_side_criteria_strengthens_left_join() {
        let mut tree = build(
            "SELECT o.id FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id WHERE c.region = 'eu'",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        assert_eq!(tree.join(join).map(|j| j.join_type), Some(JoinType::Inner));
        let sel = selects(&tree)[0];
        assert_eq!(parent_kind(&tree, sel), Some(NodeKind::Access));
    }

    #[test]
    fn test_outer_side_criteria_pushes_through_left_join() {
        let mut tree = build(
            "SELECT o.id FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id WHERE o.amount > 3",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        assert_eq!(tree.join(join).map(|j| j.join_type), Some(JoinType::LeftOuter));
        let sel = selects(&tree)[0];
        assert_eq!(parent_kind(&tree, sel), Some(NodeKind::Access));
    }

    #[test]
    fn test_translated_through_view() {
        let mut tree = build("SELECT v.total FROM (SELECT id, amount AS total FROM orders) v WHERE v.total > 10");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let sel = selects(&tree)[0];
        assert_eq!(parent_kind(&tree, sel), Some(NodeKind::Access));
        let crit = tree.select(sel).map(|s| s.criteria.to_string());
        assert_eq!(crit, Some("orders.amount > 10".to_string()));
    }

    #[test]
    fn test_aggregate_view_column_blocks() {
        let mut tree = build(
            "SELECT v.total FROM (SELECT customer_id, SUM(amount) AS total FROM orders GROUP BY customer_id) v \
             WHERE v.total > 10",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let sel = selects(&tree)[0];
        assert_eq!(child_kind(&tree, sel), Some(NodeKind::Source));
    }

    #[test]
    fn test_group_column_criteria_passes_group() {
        let mut tree = build(
            "SELECT v.total FROM (SELECT customer_id, SUM(amount) AS total FROM orders GROUP BY customer_id) v \
             WHERE v.customer_id = 3",
        );
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let sel = selects(&tree)[0];
        assert_eq!(parent_kind(&tree, sel), Some(NodeKind::Access));
    }

    #[test]
    fn test_limit_blocks() {
        let mut tree = build("SELECT v.a FROM (SELECT a FROM t1 LIMIT 5) v WHERE v.a = 1");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let sel = selects(&tree)[0];
        assert_eq!(child_kind(&tree, sel), Some(NodeKind::Source));
    }

    #[test]
    fn test_distributed_into_union_branches() {
        let mut tree = build("SELECT v.a FROM (SELECT a FROM t1 UNION ALL SELECT a FROM t2) v WHERE v.a = 1");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let all = selects(&tree);
        assert_eq!(all.len(), 3);
        let phantoms = all.iter().filter(|s| tree.select(**s).is_some_and(|p| p.phantom)).count();
        assert_eq!(phantoms, 1);
        // t1 lives in a model that evaluates criteria, t2 does not.
        let under_access = all
            .iter()
            .filter(|s| parent_kind(&tree, **s) == Some(NodeKind::Access))
            .count();
        assert_eq!(under_access, 1);
    }

    #[test]
    fn test_idempotent() {
        let mut tree = build("SELECT o.id FROM orders o, customers c WHERE o.amount > 5 AND c.id = 2");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        let before = tree.to_string();
        apply_rules(&mut tree, &[Rule::PushSelectCriteria]).unwrap();
        assert_eq!(tree.to_string(), before);
    }
}
