//! Push row limits toward the sources.
//!
//! Limit and offset may be arbitrary constant expressions (bind
//! parameters included). Arithmetic on them is folded when both operands
//! are integer literals and otherwise built as a deferred function
//! expression.

use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::Expr;
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{LimitProps, SetOperation};

pub struct PushLimit;

impl OptimizationRule for PushLimit {
    fn name(&self) -> &'static str {
        "PushLimit"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut worklist = plan.find_all(NodeKind::TupleLimit);
        worklist.reverse();
        let mut emptied = false;
        while let Some(limit) = worklist.pop() {
            if !plan.is_reachable(limit) || plan.kind(limit) != NodeKind::TupleLimit {
                continue;
            }
            emptied |= push_limit(plan, limit, ctx, &mut worklist)?;
        }
        if emptied {
            stack.push(Rule::RaiseNull);
        }
        Ok(())
    }
}

fn literal(expr: &Option<Expr>) -> Option<i64> {
    expr.as_ref()?.as_constant()?.as_i64()
}

fn add(a: &Expr, b: &Expr) -> Expr {
    match (literal_of(a), literal_of(b)) {
        (Some(x), Some(y)) => Expr::int(x.saturating_add(y)),
        _ => Expr::function("+", vec![a.clone(), b.clone()]),
    }
}

/// `a - b`, never below zero.
fn sub(a: &Expr, b: &Expr) -> Expr {
    match (literal_of(a), literal_of(b)) {
        (Some(x), Some(y)) => Expr::int(x.saturating_sub(y).max(0)),
        _ => Expr::function(
            "greatest",
            vec![Expr::function("-", vec![a.clone(), b.clone()]), Expr::int(0)],
        ),
    }
}

fn least(a: &Expr, b: &Expr) -> Expr {
    match (literal_of(a), literal_of(b)) {
        (Some(x), Some(y)) => Expr::int(x.min(y)),
        _ => Expr::function("least", vec![a.clone(), b.clone()]),
    }
}

fn literal_of(expr: &Expr) -> Option<i64> {
    expr.as_constant()?.as_i64()
}

/// Merge a limit with the limit directly beneath it.
///
/// The child runs first. When the child has an offset of its own, the
/// merged node keeps the child's offset and the parent's is not added to
/// it.
pub(crate) fn combine(parent: &LimitProps, child: &LimitProps) -> LimitProps {
    let limit = match &child.limit {
        Some(cl) => {
            let remaining = match &parent.offset {
                Some(po) => sub(cl, po),
                None => cl.clone(),
            };
            Some(match &parent.limit {
                Some(pl) => least(pl, &remaining),
                None => remaining,
            })
        }
        None => parent.limit.clone(),
    };
    let offset = child.offset.clone().or_else(|| parent.offset.clone());
    LimitProps {
        limit,
        offset,
        strict: child.strict,
    }
}

/// Push one limit node as far as it goes. Returns true if it turned into
/// a Null node.
fn push_limit(
    tree: &mut PlanTree,
    node: NodeId,
    ctx: &mut RuleContext<'_>,
    worklist: &mut Vec<NodeId>,
) -> PlanResult<bool> {
    loop {
        let Some(props) = tree.limit_mut(node) else {
            return Ok(false);
        };
        if literal(&props.offset) == Some(0) {
            props.offset = None;
        }
        let props = props.clone();
        if props.limit.is_none() && props.offset.is_none() {
            tree.splice_out(node);
            return Ok(false);
        }
        if literal(&props.limit) == Some(0) {
            log::debug!("limit {} is zero; subtree produces no rows", node);
            tree.replace_with_null(node);
            return Ok(true);
        }
        if props.strict {
            return Ok(false);
        }
        let Some(child) = tree.first_child(node) else {
            return Ok(false);
        };

        match tree.op(child) {
            Operator::TupleLimit(inner) => {
                let merged = combine(&props, inner);
                log::trace!("merging limit {} into {}", child, node);
                tree.splice_out(child);
                if let Some(l) = tree.limit_mut(node) {
                    *l = merged;
                }
            }
            Operator::Project(p) if p.into.is_none() => {
                if !move_below(tree, node, child) {
                    return Ok(false);
                }
            }
            Operator::Source(s) if s.symbol_map.is_some() && s.correlated.is_empty() => {
                if !move_below(tree, node, child) {
                    return Ok(false);
                }
            }
            Operator::SetOp(s) if s.op == SetOperation::Union && s.all => {
                distribute(tree, child, &props, worklist);
                return Ok(false);
            }
            Operator::Access(access) => {
                let model = access.model.clone();
                if !ctx.capabilities.supports_row_limit(&model)? {
                    return Ok(false);
                }
                let Some(inner) = tree.first_child(child) else {
                    return Ok(false);
                };
                let offset_ok = props.offset.is_none() || ctx.capabilities.supports_row_offset(&model)?;
                if offset_ok {
                    log::debug!("pushing limit {} into access {} [{}]", node, child, model);
                    tree.move_above(node, inner);
                    continue;
                }
                // Fetch enough rows to cover the offset that stays local.
                if let (Some(limit), Some(offset)) = (&props.limit, &props.offset) {
                    let pushed = add(limit, offset);
                    let present = tree
                        .limit(inner)
                        .is_some_and(|l| l.offset.is_none() && l.limit.as_ref() == Some(&pushed));
                    if !present {
                        let copy = tree.add_node(Operator::TupleLimit(LimitProps::new(Some(pushed), None)));
                        tree.insert_above(inner, copy);
                    }
                }
                return Ok(false);
            }
            _ => return Ok(false),
        }
    }
}

/// Move `node` from above `child` to directly beneath it.
fn move_below(tree: &mut PlanTree, node: NodeId, child: NodeId) -> bool {
    match tree.first_child(child) {
        Some(grandchild) => {
            tree.move_above(node, grandchild);
            true
        }
        None => false,
    }
}

/// Give every branch of a `UNION ALL` a limit covering the parent's
/// limit and offset.
fn distribute(tree: &mut PlanTree, set_op: NodeId, props: &LimitProps, worklist: &mut Vec<NodeId>) {
    let Some(limit) = &props.limit else {
        return;
    };
    let branch_limit = match &props.offset {
        Some(offset) => add(limit, offset),
        None => limit.clone(),
    };
    for branch in tree.children(set_op).to_vec() {
        let present = tree
            .limit(branch)
            .is_some_and(|l| l.offset.is_none() && l.limit.as_ref() == Some(&branch_limit));
        if present {
            continue;
        }
        let copy = tree.add_node(Operator::TupleLimit(LimitProps::new(Some(branch_limit.clone()), None)));
        tree.insert_above(branch, copy);
        worklist.push(copy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{DataType, Value};
    use crate::testing::{apply_rules, build, count, execute, TestData};
    use proptest::prelude::*;

    fn limits(tree: &PlanTree) -> Vec<(Option<Expr>, Option<Expr>)> {
        tree.find_all(NodeKind::TupleLimit)
            .into_iter()
            .filter_map(|n| tree.limit(n))
            .map(|l| (l.limit.clone(), l.offset.clone()))
            .collect()
    }

    fn parent_kind(tree: &PlanTree, node: NodeId) -> Option<NodeKind> {
        tree.parent(node).map(|p| tree.kind(p))
    }

    fn data() -> TestData {
        let rows: Vec<(Option<i64>, Option<i64>)> = (1..=30).map(|i| (Some(i), Some(i % 4))).collect();
        TestData::new().ints("t1", &rows).ints("t2", &rows[..12]).ints("t3", &rows[5..])
    }

    fn assert_same_rows(sql: &str) -> PlanTree {
        let built = build(sql);
        let mut tree = built.clone();
        apply_rules(&mut tree, &[Rule::PushLimit]).unwrap();
        let expected = execute(&built, &data()).unwrap();
        let actual = execute(&tree, &data()).unwrap();
        assert_eq!(actual.rows, expected.rows, "{}", tree);
        tree
    }

    #[test]
    fn test_limit_enters_capable_access() {
        let tree = assert_same_rows("SELECT a FROM t1 LIMIT 5");
        let limit = tree.find_all(NodeKind::TupleLimit)[0];
        assert_eq!(parent_kind(&tree, limit), Some(NodeKind::Access));
    }

    #[test]
    fn test_limit_stops_above_incapable_access() {
        let tree = assert_same_rows("SELECT a FROM t2 LIMIT 5 OFFSET 3");
        let limit = tree.find_all(NodeKind::TupleLimit)[0];
        assert_eq!(parent_kind(&tree, limit), Some(NodeKind::Project));
        assert_eq!(tree.first_child(limit).map(|c| tree.kind(c)), Some(NodeKind::Access));
    }

    #[test]
    fn test_offset_kept_local_when_unsupported() {
        let mut tree = build("SELECT id FROM feed LIMIT 5 OFFSET 2");
        apply_rules(&mut tree, &[Rule::PushLimit]).unwrap();
        assert_eq!(
            limits(&tree),
            vec![(Some(Expr::int(5)), Some(Expr::int(2))), (Some(Expr::int(7)), None)]
        );
        let inner = tree.find_all(NodeKind::TupleLimit)[1];
        assert_eq!(parent_kind(&tree, inner), Some(NodeKind::Access));
    }

    #[test]
    fn test_nested_limits_combine() {
        let tree = assert_same_rows("SELECT v.a FROM (SELECT a FROM t2 LIMIT 20) v LIMIT 10 OFFSET 5");
        assert_eq!(limits(&tree), vec![(Some(Expr::int(10)), Some(Expr::int(5)))]);

        let tree = assert_same_rows("SELECT v.a FROM (SELECT a FROM t2 LIMIT 8) v LIMIT 10 OFFSET 5");
        assert_eq!(limits(&tree), vec![(Some(Expr::int(3)), Some(Expr::int(5)))]);
    }

    #[test]
    fn test_both_offsets_keep_child_offset() {
        // Both limits carry an offset; the merged node keeps the inner one.
        let mut tree = build("SELECT v.a FROM (SELECT a FROM t2 LIMIT 20 OFFSET 3) v LIMIT 10 OFFSET 5");
        apply_rules(&mut tree, &[Rule::PushLimit]).unwrap();
        assert_eq!(limits(&tree), vec![(Some(Expr::int(10)), Some(Expr::int(3)))]);
    }

    #[test]
    fn test_union_all_branches_get_limits() {
        let tree = assert_same_rows("SELECT a FROM t1 UNION ALL SELECT a FROM t2 LIMIT 3 OFFSET 1");
        assert_eq!(count(&tree, NodeKind::TupleLimit), 3);
        let branch_limits: Vec<_> = limits(&tree).into_iter().skip(1).collect();
        assert_eq!(branch_limits, vec![(Some(Expr::int(4)), None), (Some(Expr::int(4)), None)]);
    }

    #[test]
    fn test_union_distinct_blocks() {
        let tree = assert_same_rows("SELECT a FROM t1 UNION SELECT a FROM t2 LIMIT 3");
        assert_eq!(count(&tree, NodeKind::TupleLimit), 1);
    }

    #[test]
    fn test_symbolic_limit() {
        let mut tree = build("SELECT a FROM t1 UNION ALL SELECT a FROM t2 LIMIT ? OFFSET 2");
        apply_rules(&mut tree, &[Rule::PushLimit]).unwrap();
        let param = Expr::Parameter {
            index: 0,
            data_type: DataType::Null,
        };
        let expected = Expr::function("+", vec![param, Expr::int(2)]);
        let branch_limits: Vec<_> = limits(&tree).into_iter().skip(1).map(|(l, _)| l).collect();
        assert_eq!(branch_limits, vec![Some(expected.clone()), Some(expected)]);
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let mut tree = build("SELECT a FROM t1 LIMIT 0");
        let executed = apply_rules(&mut tree, &[Rule::PushLimit]).unwrap();
        assert_eq!(executed, vec![Rule::PushLimit, Rule::RaiseNull]);
        assert_eq!(tree.kind(tree.root()), NodeKind::Null);
    }

    #[test]
    fn test_zero_limit_under_global_aggregate() {
        let tree = assert_same_rows("SELECT COUNT(*) FROM (SELECT a FROM t1 LIMIT 0) v");
        assert_eq!(count(&tree, NodeKind::Group), 1);
        let rows = execute(&tree, &data()).unwrap().rows;
        assert_eq!(rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn test_blocked_by_distinct_and_strict() {
        let tree = assert_same_rows("SELECT DISTINCT b FROM t1 LIMIT 2");
        assert_eq!(tree.kind(tree.root()), NodeKind::TupleLimit);

        let mut tree = build("SELECT a, rand() FROM t1 LIMIT 5");
        apply_rules(&mut tree, &[Rule::PushLimit]).unwrap();
        assert_eq!(tree.kind(tree.root()), NodeKind::TupleLimit);
    }

    fn apply(rows: &[u32], limit: Option<i64>, offset: Option<i64>) -> Vec<u32> {
        rows.iter()
            .skip(offset.unwrap_or(0) as usize)
            .take(limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .copied()
            .collect()
    }

    fn props(limit: Option<i64>, offset: Option<i64>) -> LimitProps {
        LimitProps::new(limit.map(Expr::int), offset.map(Expr::int))
    }

    proptest! {
        #[test]
        fn test_combined_limit_matches_sequential(
            n in 0u32..40,
            pl in proptest::option::of(0i64..15),
            po in proptest::option::of(0i64..8),
            cl in proptest::option::of(0i64..25),
        ) {
            let rows: Vec<u32> = (0..n).collect();
            let sequential = apply(&apply(&rows, cl, None), pl, po);
            let merged = combine(&props(pl, po), &props(cl, None));
            let combined = apply(&rows, literal(&merged.limit), literal(&merged.offset));
            prop_assert_eq!(sequential, combined);
        }

        #[test]
        fn test_combined_limit_with_child_offset_only(
            n in 0u32..40,
            pl in proptest::option::of(0i64..15),
            cl in proptest::option::of(0i64..25),
            co in 0i64..8,
        ) {
            let rows: Vec<u32> = (0..n).collect();
            let sequential = apply(&apply(&rows, cl, Some(co)), pl, None);
            let merged = combine(&props(pl, None), &props(cl, Some(co)));
            let combined = apply(&rows, literal(&merged.limit), literal(&merged.offset));
            prop_assert_eq!(sequential, combined);
        }
    }
}
