//! Physical join implementation.
//!
//! Lateral views force nested-table joins on every join between the view
//! and the groups it references. Merge joins get their sides prepared:
//! a side whose keys cover a unique key of its table is read unsorted and
//! marked distinct, an oversized side is read unsorted, and any other side
//! is sorted, inside the source when the model supports ORDER BY.

use std::collections::BTreeSet;

use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::{ElementSymbol, Expr, GroupSymbol};
use crate::planner::config::PlannerConfig;
use crate::planner::context::RuleContext;
use crate::planner::error::{PlanError, PlanResult};
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{JoinStrategy, JoinType, Side, SortKey, SortOption, SortProps};

pub struct ImplementJoinStrategy;

impl OptimizationRule for ImplementJoinStrategy {
    fn name(&self) -> &'static str {
        "ImplementJoinStrategy"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut changed = false;
        for source in plan.find_all(NodeKind::Source) {
            let correlated = plan.source(source).map(|s| s.correlated.clone()).unwrap_or_default();
            if !correlated.is_empty() {
                changed |= nest_correlated(plan, source, &correlated)?;
            }
        }
        for join in plan.find_all(NodeKind::Join) {
            let pending = plan.join(join).is_some_and(|j| {
                j.strategy == Some(JoinStrategy::Merge) && j.sort_left.is_none() && j.sort_right.is_none()
            });
            if pending {
                implement_merge(plan, join, ctx)?;
                changed = true;
            }
        }
        if changed {
            stack.push(Rule::AssignOutputElements);
        }
        Ok(())
    }
}

/// Mark every join from a lateral view up to the join that supplies its
/// outer references as a nested-table join, with the view on the right.
fn nest_correlated(tree: &mut PlanTree, source: NodeId, correlated: &BTreeSet<GroupSymbol>) -> PlanResult<bool> {
    let mut changed = false;
    let mut current = source;
    while let Some(parent) = tree.parent(current) {
        match tree.kind(parent) {
            NodeKind::Join => {
                let Some(props) = tree.join(parent) else {
                    break;
                };
                if props.dependent.is_some() {
                    return Err(PlanError::InvalidJoin(format!(
                        "join {} cannot be dependent and feed a lateral view",
                        parent
                    )));
                }
                let join_type = props.join_type;
                let on_left = tree.child_index(current) == Some(0);
                if on_left {
                    if !matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::RightOuter) {
                        return Err(PlanError::InvalidJoin(format!(
                            "lateral view cannot be the preserved side of a {} join",
                            join_type
                        )));
                    }
                    tree.swap_children(parent);
                    if let Some(j) = tree.join_mut(parent) {
                        j.swap_sides();
                    }
                    log::trace!("swapped join {} to put the lateral view on the right", parent);
                } else if !matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::LeftOuter) {
                    return Err(PlanError::InvalidJoin(format!(
                        "lateral view cannot be the preserved side of a {} join",
                        join_type
                    )));
                }
                if let Some(j) = tree.join_mut(parent) {
                    if j.strategy != Some(JoinStrategy::NestedTable) {
                        j.strategy = Some(JoinStrategy::NestedTable);
                        changed = true;
                    }
                }
                changed |= on_left;
                if correlated.is_subset(tree.groups(parent)) {
                    break;
                }
            }
            // Left the view's frame.
            NodeKind::Source => break,
            _ => {}
        }
        current = parent;
    }
    Ok(changed)
}

fn implement_merge(tree: &mut PlanTree, join: NodeId, ctx: &RuleContext<'_>) -> PlanResult<()> {
    for side in [Side::Left, Side::Right] {
        use_unique_key(tree, join, side, ctx)?;
    }
    for side in [Side::Left, Side::Right] {
        let done = tree.join(join).is_some_and(|j| match side {
            Side::Left => j.sort_left.is_some(),
            Side::Right => j.sort_right.is_some(),
        });
        if done {
            continue;
        }
        if too_large_to_sort(tree, join, side, ctx.config) {
            if let Some(j) = tree.join_mut(join) {
                j.set_sort(side, SortOption::NotSorted);
            }
            continue;
        }
        sort_side(tree, join, side, ctx)?;
    }
    if let Some(j) = tree.join_mut(join) {
        if j.sort_left == Some(SortOption::NotSorted) || j.sort_right == Some(SortOption::NotSorted) {
            j.strategy = Some(JoinStrategy::EnhancedSort);
        }
        log::debug!(
            "join {} implemented as {} (left {:?}, right {:?})",
            join,
            j.strategy.unwrap_or(JoinStrategy::Merge),
            j.sort_left,
            j.sort_right
        );
    }
    Ok(())
}

/// The group and table of a side that reads exactly one physical table.
fn single_table(tree: &PlanTree, side: NodeId) -> Option<(GroupSymbol, String)> {
    if tree.kind(side) != NodeKind::Access {
        return None;
    }
    let sources: Vec<NodeId> = tree
        .preorder(side)
        .into_iter()
        .filter(|n| tree.kind(*n) == NodeKind::Source)
        .collect();
    let [source] = sources.as_slice() else {
        return None;
    };
    let group = tree.source_group(*source)?.clone();
    let table = group.definition.clone()?;
    Some((group, table))
}

fn is_column(expr: &Expr, group: &GroupSymbol, name: &str) -> bool {
    matches!(expr.as_column(), Some(ElementSymbol { group: g, name: n, .. }) if g == group && n.eq_ignore_ascii_case(name))
}

/// Positions in `keys` that match each column of some unique key of the
/// side's table, in key order.
fn covered_key(keys: &[Expr], group: &GroupSymbol, table: &str, ctx: &RuleContext<'_>) -> PlanResult<Option<Vec<usize>>> {
    for key in ctx.metadata.unique_keys(table)? {
        let positions: Option<Vec<usize>> = key
            .iter()
            .map(|col| keys.iter().position(|k| is_column(k, group, col)))
            .collect();
        if let Some(positions) = positions.filter(|p| !p.is_empty()) {
            return Ok(Some(positions));
        }
    }
    for index in ctx.metadata.function_indexes(table)? {
        let position = keys.iter().position(|k| match k {
            Expr::Function { name, args } => {
                name.eq_ignore_ascii_case(&index.function)
                    && matches!(args.as_slice(), [arg] if is_column(arg, group, &index.column))
            }
            _ => false,
        });
        if let Some(position) = position {
            return Ok(Some(vec![position]));
        }
    }
    Ok(None)
}

/// Key the side by a unique key when its join keys cover one. Equalities
/// outside the unique key become residual criteria.
fn use_unique_key(tree: &mut PlanTree, join: NodeId, side: Side, ctx: &RuleContext<'_>) -> PlanResult<bool> {
    let Some((group, table)) = tree.child(join, side.index()).and_then(|c| single_table(tree, c)) else {
        return Ok(false);
    };
    let Some(props) = tree.join(join) else {
        return Ok(false);
    };
    let Some(positions) = covered_key(props.keys(side), &group, &table, ctx)? else {
        return Ok(false);
    };

    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    let mut residual = props.residual.clone();
    for p in &positions {
        left_keys.push(props.left_keys[*p].clone());
        right_keys.push(props.right_keys[*p].clone());
    }
    for (i, (l, r)) in props.left_keys.iter().zip(props.right_keys.iter()).enumerate() {
        if !positions.contains(&i) {
            residual.push(Expr::eq(l.clone(), r.clone()));
        }
    }
    if let Some(j) = tree.join_mut(join) {
        j.left_keys = left_keys;
        j.right_keys = right_keys;
        j.residual = residual;
        j.set_sort(side, SortOption::NotSorted);
        j.set_distinct(side);
    }
    log::trace!("join {} side {:?} is unique on {}", join, side, table);
    Ok(true)
}

fn too_large_to_sort(tree: &PlanTree, join: NodeId, side: Side, config: &PlannerConfig) -> bool {
    let estimate = |s: Side| tree.child(join, s.index()).and_then(|c| tree.node(c).estimate);
    match (estimate(side), estimate(side.other())) {
        (Some(this), Some(other)) => {
            this > config.batch_size as f64 && this / other.max(1.0) > config.sort_cost_ratio
        }
        _ => false,
    }
}

fn sort_side(tree: &mut PlanTree, join: NodeId, side: Side, ctx: &RuleContext<'_>) -> PlanResult<()> {
    let (Some(child), Some(props)) = (tree.child(join, side.index()), tree.join(join)) else {
        return Ok(());
    };
    let keys = props
        .keys(side)
        .iter()
        .map(|k| SortKey {
            expr: k.clone(),
            ascending: true,
        })
        .collect();
    let sort = tree.add_node(Operator::Sort(SortProps { keys }));

    let pushed = match (tree.access(child).map(|a| a.model.clone()), tree.first_child(child)) {
        (Some(model), Some(inner)) => ctx.capabilities.supports_order_by(&model)?.then_some(inner),
        _ => None,
    };
    let option = match pushed {
        Some(inner) => {
            tree.insert_above(inner, sort);
            SortOption::AlreadySorted
        }
        None => {
            tree.insert_above(child, sort);
            SortOption::Sort
        }
    };
    if let Some(j) = tree.join_mut(join) {
        j.set_sort(side, option);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::props::JoinProps;
    use crate::testing::{apply_rules, apply_rules_with, build, count, execute, TestData};

    const WITH_COST: &[Rule] = &[
        Rule::PushSelectCriteria,
        Rule::ChooseJoinStrategy,
        Rule::CalculateCost,
        Rule::ImplementJoinStrategy,
    ];
    const WITHOUT_COST: &[Rule] = &[Rule::PushSelectCriteria, Rule::ChooseJoinStrategy, Rule::ImplementJoinStrategy];

    fn implement(sql: &str, rules: &[Rule]) -> (PlanTree, JoinProps) {
        let mut tree = build(sql);
        apply_rules(&mut tree, rules).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        let props = tree.join(join).unwrap().clone();
        (tree, props)
    }

    #[test]
    fn test_unique_and_oversized_sides_skip_sorting() {
        let (tree, props) = implement(
            "SELECT o.id, c.name FROM orders o, customers c WHERE o.customer_id = c.id",
            WITH_COST,
        );
        assert_eq!(props.strategy, Some(JoinStrategy::EnhancedSort));
        assert_eq!(props.sort_right, Some(SortOption::NotSorted));
        assert!(props.right_distinct);
        assert_eq!(props.sort_left, Some(SortOption::NotSorted));
        assert!(!props.left_distinct);
        assert_eq!(count(&tree, NodeKind::Sort), 0);
    }

    #[test]
    fn test_large_batches_sort_the_bigger_side() {
        let mut tree = build("SELECT o.id, c.name FROM orders o, customers c WHERE o.customer_id = c.id");
        let config = PlannerConfig::default().with_batch_size(100_000);
        apply_rules_with(&mut tree, WITH_COST, &config).unwrap();
        let props = tree.join(tree.find_all(NodeKind::Join)[0]).unwrap();
        assert_eq!(props.sort_left, Some(SortOption::AlreadySorted));
        assert_eq!(props.sort_right, Some(SortOption::NotSorted));
        assert_eq!(props.strategy, Some(JoinStrategy::EnhancedSort));
    }

    #[test]
    fn test_sort_pushed_into_ordering_source() {
        let (tree, props) = implement(
            "SELECT o.id, c.name FROM orders o, customers c WHERE o.customer_id = c.id",
            WITHOUT_COST,
        );
        assert_eq!(props.sort_left, Some(SortOption::AlreadySorted));
        assert_eq!(props.strategy, Some(JoinStrategy::EnhancedSort));
        let sort = tree.find_all(NodeKind::Sort)[0];
        assert_eq!(tree.parent(sort).map(|p| tree.kind(p)), Some(NodeKind::Access));
    }

    #[test]
    fn test_both_sides_sorted() {
        let sql = "SELECT t1.a, t2.b FROM t1, t2 WHERE t1.a = t2.a";
        let (tree, props) = implement(sql, WITH_COST);
        assert_eq!(props.strategy, Some(JoinStrategy::Merge));
        assert_eq!(props.sort_left, Some(SortOption::AlreadySorted));
        assert_eq!(props.sort_right, Some(SortOption::Sort));
        assert_eq!(count(&tree, NodeKind::Sort), 2);
        let join = tree.find_all(NodeKind::Join)[0];
        let right = tree.child(join, 1).unwrap();
        assert_eq!(tree.kind(right), NodeKind::Sort);

        let data = TestData::new()
            .ints("t1", &[(Some(2), Some(1)), (Some(1), Some(1)), (None, Some(3))])
            .ints("t2", &[(Some(1), Some(10)), (Some(2), Some(20)), (Some(1), Some(30))]);
        let expected = execute(&build(sql), &data).unwrap();
        let actual = execute(&tree, &data).unwrap();
        assert_eq!(actual.sorted(), expected.sorted());
    }

    #[test]
    fn test_function_index_counts_as_unique() {
        let (_, props) = implement(
            "SELECT c.id FROM customers c, orders o WHERE upper(c.name) = o.status",
            WITHOUT_COST,
        );
        assert_eq!(props.sort_left, Some(SortOption::NotSorted));
        assert!(props.left_distinct);
    }

    #[test]
    fn test_surplus_keys_become_residual() {
        let (_, props) = implement(
            "SELECT t1.a FROM t1 JOIN orders o ON t1.a = o.customer_id AND t1.b = o.id",
            WITHOUT_COST,
        );
        let right: Vec<String> = props.right_keys.iter().map(|k| k.to_string()).collect();
        let left: Vec<String> = props.left_keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(right, vec!["o.id"]);
        assert_eq!(left, vec!["t1.b"]);
        let residual: Vec<String> = props.residual.iter().map(|k| k.to_string()).collect();
        assert_eq!(residual, vec!["t1.a = o.customer_id"]);
        assert_eq!(props.criteria.len(), 2);
    }

    const LATERAL: &str =
        "SELECT c.name, v.amount FROM customers c, LATERAL (SELECT amount FROM orders o WHERE o.customer_id = c.id) v";

    #[test]
    fn test_lateral_join_is_nested_table() {
        let (tree, props) = implement(LATERAL, &[Rule::ImplementJoinStrategy]);
        assert_eq!(props.strategy, Some(JoinStrategy::NestedTable));
        let join = tree.find_all(NodeKind::Join)[0];
        let right = tree.child(join, 1).unwrap();
        assert!(tree.source(right).is_some_and(|s| !s.correlated.is_empty()));
    }

    #[test]
    fn test_lateral_on_left_is_swapped_back() {
        let mut tree = build(LATERAL);
        let join = tree.find_all(NodeKind::Join)[0];
        tree.swap_children(join);
        tree.join_mut(join).unwrap().swap_sides();
        let executed = apply_rules(&mut tree, &[Rule::ImplementJoinStrategy]).unwrap();
        assert_eq!(executed, vec![Rule::ImplementJoinStrategy, Rule::AssignOutputElements]);
        let right = tree.child(join, 1).unwrap();
        assert!(tree.source(right).is_some_and(|s| !s.correlated.is_empty()));
        assert_eq!(tree.join(join).unwrap().strategy, Some(JoinStrategy::NestedTable));
    }

    #[test]
    fn test_lateral_on_preserved_side_is_rejected() {
        let mut tree = build(
            "SELECT c.name FROM customers c RIGHT OUTER JOIN \
             LATERAL (SELECT amount FROM orders o WHERE o.customer_id = c.id) v ON 1 = 1",
        );
        let err = apply_rules(&mut tree, &[Rule::ImplementJoinStrategy]).unwrap_err();
        assert!(matches!(err, PlanError::InvalidJoin(_)));
    }

    #[test]
    fn test_dependent_lateral_join_is_rejected() {
        let mut tree = build(LATERAL);
        let join = tree.find_all(NodeKind::Join)[0];
        tree.join_mut(join).unwrap().dependent = Some(Side::Left);
        let err = apply_rules(&mut tree, &[Rule::ImplementJoinStrategy]).unwrap_err();
        assert!(matches!(err, PlanError::InvalidJoin(_)));
    }
}
