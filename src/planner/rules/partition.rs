//! Partitioning of union views.
//!
//! A column of a `UNION ALL` view is partitioned when every branch can be
//! shown to produce only values from a known set: either the branch
//! projects a constant, or its criteria bind the column with `=` or `IN`.

use std::collections::BTreeSet;

use crate::expr::{CompareOp, ElementSymbol, Expr, Value};
use crate::planner::node::{NodeId, Operator, PlanTree};
use crate::planner::props::{JoinType, PartitionInfo, SetOperation};

/// Branches of a tree of `UNION ALL` nodes, left to right.
pub fn union_branches(tree: &PlanTree, node: NodeId) -> Option<Vec<NodeId>> {
    match tree.set_op(node) {
        Some(p) if p.op == SetOperation::Union && p.all => {
            let mut out = Vec::new();
            for c in tree.children(node) {
                match union_branches(tree, *c) {
                    Some(nested) => out.extend(nested),
                    None => out.push(*c),
                }
            }
            Some(out)
        }
        _ => None,
    }
}

/// Partition info of a virtual Source over a `UNION ALL`, if any column is
/// partitioned.
pub fn partition_info(tree: &PlanTree, source: NodeId) -> Option<PartitionInfo> {
    let map = tree.source(source)?.symbol_map.as_ref()?;
    let branches = union_branches(tree, tree.first_child(source)?)?;
    let mut info = PartitionInfo::default();
    for (position, key) in map.keys().into_iter().enumerate() {
        let sets: Option<Vec<BTreeSet<Value>>> = branches
            .iter()
            .map(|b| branch_values(tree, *b, position))
            .collect();
        if let Some(sets) = sets {
            info.columns.insert(key, sets);
        }
    }
    (!info.is_empty()).then_some(info)
}

fn branch_values(tree: &PlanTree, branch: NodeId, position: usize) -> Option<BTreeSet<Value>> {
    let cols = tree.output_columns(branch);
    let item = cols.get(position)?.unalias();
    if let Some(value) = item.as_constant() {
        return (!value.is_null()).then(|| BTreeSet::from([value.clone()]));
    }
    if tree.set_op(branch).is_some() {
        return set_op_values(tree, branch, position);
    }
    bound_values(tree, branch, item.as_column()?)
}

/// Values a set operation can produce at `position`, from its branches.
fn set_op_values(tree: &PlanTree, node: NodeId, position: usize) -> Option<BTreeSet<Value>> {
    let props = tree.set_op(node)?;
    let children = tree.children(node);
    match props.op {
        // Every branch contributes rows, so every branch must be bounded.
        SetOperation::Union => children.iter().try_fold(BTreeSet::new(), |mut acc, c| {
            acc.extend(branch_values(tree, *c, position)?);
            Some(acc)
        }),
        SetOperation::Intersect => children
            .iter()
            .filter_map(|c| branch_values(tree, *c, position))
            .reduce(|a, b| a.intersection(&b).cloned().collect()),
        SetOperation::Except => branch_values(tree, *children.first()?, position),
    }
}

fn narrow(result: Option<BTreeSet<Value>>, values: BTreeSet<Value>) -> BTreeSet<Value> {
    match result {
        Some(prev) => prev.intersection(&values).cloned().collect(),
        None => values,
    }
}

/// Values the criteria below `branch` allow for `column`.
fn bound_values(tree: &PlanTree, branch: NodeId, column: &ElementSymbol) -> Option<BTreeSet<Value>> {
    let mut result: Option<BTreeSet<Value>> = None;
    let mut stack = vec![branch];
    while let Some(n) = stack.pop() {
        match tree.op(n) {
            Operator::Source(_) => continue,
            // Criteria on the inner side of an outer join do not bind the join's rows.
            Operator::Join(j) => {
                let sides: &[usize] = match j.join_type {
                    JoinType::Inner | JoinType::Cross => &[0, 1],
                    JoinType::LeftOuter => &[0],
                    JoinType::RightOuter => &[1],
                    JoinType::FullOuter => &[],
                };
                stack.extend(sides.iter().filter_map(|i| tree.child(n, *i)));
                continue;
            }
            // Criteria inside one branch say nothing about the others.
            Operator::SetOp(_) => {
                let position = tree
                    .output_columns(n)
                    .iter()
                    .position(|c| c.unalias().as_column() == Some(column));
                if let Some(values) = position.and_then(|p| set_op_values(tree, n, p)) {
                    result = Some(narrow(result, values));
                }
                continue;
            }
            Operator::Select(s) => {
                for conjunct in s.criteria.conjuncts() {
                    if let Some(values) = allowed_values(&conjunct, column) {
                        result = Some(narrow(result, values));
                    }
                }
            }
            _ => {}
        }
        stack.extend(tree.children(n).iter().copied());
    }
    result
}

fn allowed_values(criteria: &Expr, column: &ElementSymbol) -> Option<BTreeSet<Value>> {
    match criteria {
        Expr::Compare {
            left,
            op: CompareOp::Eq,
            right,
        } => {
            let value = match (left.as_column(), right.as_column()) {
                (Some(c), None) if c == column => right.as_constant()?,
                (None, Some(c)) if c == column => left.as_constant()?,
                _ => return None,
            };
            Some(if value.is_null() {
                BTreeSet::new()
            } else {
                BTreeSet::from([value.clone()])
            })
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } if expr.as_column() == Some(column) => list
            .iter()
            .map(|e| e.as_constant().cloned())
            .collect::<Option<BTreeSet<Value>>>()
            .map(|set| set.into_iter().filter(|v| !v.is_null()).collect()),
        _ => None,
    }
}
