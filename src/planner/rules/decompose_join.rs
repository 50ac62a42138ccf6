//! Split joins of partitioned union views into unions of smaller joins.
//!
//! When both sides of an inner join are `UNION ALL` views partitioned on
//! the columns the join equates, only branches whose value sets overlap can
//! produce rows. The join becomes a new union view with one join per
//! overlapping branch pair, and that view carries partition info of its own
//! so enclosing joins can be decomposed in turn.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::frame::convert_frame;
use super::partition::{partition_info, union_branches};
use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::{CompareOp, ElementSymbol, Expr, GroupSymbol, Value};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{
    JoinProps, JoinType, PartitionInfo, ProjectProps, SetOpProps, SetOperation, SourceProps,
};
use crate::planner::symbol_map::SymbolMap;

pub struct DecomposeJoin;

impl OptimizationRule for DecomposeJoin {
    fn name(&self) -> &'static str {
        "DecomposeJoin"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let mut decomposed = false;
        let mut emptied = false;
        for join in plan.find_all(NodeKind::Join) {
            if !plan.is_reachable(join) {
                continue;
            }
            match decompose(plan, join, ctx) {
                Outcome::Unchanged => {}
                Outcome::Decomposed => decomposed = true,
                Outcome::Empty => emptied = true,
            }
        }
        if decomposed {
            stack.push(Rule::DecomposeJoin);
        }
        if emptied {
            stack.push(Rule::RaiseNull);
        }
        Ok(())
    }
}

enum Outcome {
    Unchanged,
    Decomposed,
    /// No branch pair can match; the join was replaced by a Null node.
    Empty,
}

/// One side of the join: a virtual Source over a `UNION ALL`.
struct UnionView {
    group: GroupSymbol,
    map: SymbolMap,
    branches: Vec<NodeId>,
    partition: PartitionInfo,
}

fn union_view(tree: &PlanTree, node: NodeId) -> Option<UnionView> {
    let props = tree.source(node)?;
    if !props.correlated.is_empty() {
        return None;
    }
    let map = props.symbol_map.clone()?;
    let branches = union_branches(tree, tree.first_child(node)?)?;
    let partition = match &props.partition {
        Some(p) => p.clone(),
        None => partition_info(tree, node)?,
    };
    Some(UnionView {
        group: tree.source_group(node)?.clone(),
        map,
        branches,
        partition,
    })
}

/// The first `left = right` conjunct over partitioned columns of both views.
fn partition_key(criteria: &[Expr], left: &UnionView, right: &UnionView) -> Option<(ElementSymbol, ElementSymbol)> {
    criteria.iter().find_map(|c| {
        let Expr::Compare {
            left: a,
            op: CompareOp::Eq,
            right: b,
        } = c
        else {
            return None;
        };
        let (a, b) = (a.as_column()?, b.as_column()?);
        let (l, r) = if a.group == left.group && b.group == right.group {
            (a, b)
        } else if a.group == right.group && b.group == left.group {
            (b, a)
        } else {
            return None;
        };
        (left.partition.get(l).is_some() && right.partition.get(r).is_some()).then(|| (l.clone(), r.clone()))
    })
}

fn decompose(tree: &mut PlanTree, join: NodeId, ctx: &mut RuleContext<'_>) -> Outcome {
    let Some(props) = tree.join(join).cloned() else {
        return Outcome::Unchanged;
    };
    if props.join_type != JoinType::Inner {
        return Outcome::Unchanged;
    }
    let (Some(l), Some(r)) = (tree.child(join, 0), tree.child(join, 1)) else {
        return Outcome::Unchanged;
    };
    let (Some(left), Some(right)) = (union_view(tree, l), union_view(tree, r)) else {
        return Outcome::Unchanged;
    };
    let Some((lkey, rkey)) = partition_key(&props.criteria, &left, &right) else {
        return Outcome::Unchanged;
    };
    let (Some(lsets), Some(rsets)) = (left.partition.get(&lkey), right.partition.get(&rkey)) else {
        return Outcome::Unchanged;
    };

    let overlaps: Vec<Vec<usize>> = lsets
        .iter()
        .map(|ls| {
            rsets
                .iter()
                .enumerate()
                .filter(|(_, rs)| !ls.is_disjoint(rs))
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    if overlaps.iter().all(|o| o.is_empty()) {
        log::debug!("join {} of disjoint partitions {} and {} is empty", join, left.group, right.group);
        tree.replace_with_null(join);
        return Outcome::Empty;
    }
    if overlaps.iter().any(|o| o.len() > 1) {
        ctx.record.note(format!(
            "not decomposing join {}: a branch of {} overlaps several branches of {}",
            join, left.group, right.group
        ));
        return Outcome::Unchanged;
    }
    let pairs: Vec<(usize, usize)> = overlaps
        .iter()
        .enumerate()
        .filter_map(|(i, o)| o.first().map(|j| (i, *j)))
        .collect();

    let mut used_right = HashSet::new();
    let mut branches = Vec::with_capacity(pairs.len());
    for (i, j) in &pairs {
        let lbranch = left.branches[*i];
        tree.detach(lbranch);
        let rbranch = if used_right.insert(*j) {
            let b = right.branches[*j];
            tree.detach(b);
            b
        } else {
            tree.copy_subtree(right.branches[*j])
        };
        branches.push(pair_join(tree, ctx, &props, (&left, lbranch), (&right, rbranch)));
    }

    let mut top = branches[0];
    for branch in &branches[1..] {
        let union = tree.add_node(Operator::SetOp(SetOpProps {
            op: SetOperation::Union,
            all: true,
        }));
        tree.add_child(union, top);
        tree.add_child(union, *branch);
        top = union;
    }

    let group = ctx.aliases.fresh("dj");
    let map = SymbolMap::create(&group, &tree.output_columns(branches[0]));
    let keys = map.keys();
    let old_keys: Vec<ElementSymbol> = left.map.keys().into_iter().chain(right.map.keys()).collect();
    let mapping: HashMap<ElementSymbol, Expr> = old_keys
        .iter()
        .cloned()
        .zip(keys.iter().cloned().map(Expr::Column))
        .collect();

    let mut info = PartitionInfo::default();
    let lwidth = left.map.len();
    for (position, key) in left.map.keys().iter().enumerate() {
        if let Some(sets) = left.partition.get(key) {
            info.columns
                .insert(keys[position].clone(), pairs.iter().map(|(i, _)| sets[*i].clone()).collect());
        }
    }
    for (position, key) in right.map.keys().iter().enumerate() {
        if let Some(sets) = right.partition.get(key) {
            info.columns
                .insert(keys[lwidth + position].clone(), pairs.iter().map(|(_, j)| sets[*j].clone()).collect());
        }
    }
    // Both join keys now only carry values present on both sides.
    let shared: Vec<BTreeSet<Value>> = pairs
        .iter()
        .map(|(i, j)| lsets[*i].intersection(&rsets[*j]).cloned().collect())
        .collect();
    for key in [&lkey, &rkey] {
        if let Some(new_key) = mapping.get(key).and_then(|e| e.as_column()) {
            info.columns.insert(new_key.clone(), shared.clone());
        }
    }

    let mut source_props = SourceProps::virtual_group(map);
    source_props.partition = Some(info);
    let source = tree.add_source(group.clone(), source_props, vec![]);
    tree.add_child(source, top);
    tree.replace(join, source);
    convert_frame(tree, source, &mapping);
    log::debug!(
        "decomposed join of {} and {} into {} branch joins under {}",
        left.group,
        right.group,
        pairs.len(),
        group
    );
    Outcome::Decomposed
}

/// `Project(Join(Source(left branch), Source(right branch)))` with the
/// columns of both views named `<group>_<column>`.
fn pair_join(
    tree: &mut PlanTree,
    ctx: &mut RuleContext<'_>,
    props: &JoinProps,
    (left, lbranch): (&UnionView, NodeId),
    (right, rbranch): (&UnionView, NodeId),
) -> NodeId {
    let mut substitution = HashMap::new();
    let mut columns = Vec::new();
    let mut sides = Vec::with_capacity(2);
    for (view, branch) in [(left, lbranch), (right, rbranch)] {
        let group = ctx.aliases.realias(&view.group);
        let map = view.map.rebind(&group, &tree.output_columns(branch));
        for key in view.map.keys() {
            let rebound = Expr::Column(key.with_group(group.clone()));
            columns.push(Expr::alias(format!("{}_{}", view.group.name, key.name), rebound.clone()));
            substitution.insert(key, rebound);
        }
        let source = tree.add_source(group, SourceProps::virtual_group(map), vec![]);
        tree.add_child(source, branch);
        sides.push(source);
    }

    let criteria = props.criteria.iter().map(|c| c.substitute(&substitution)).collect();
    let join = tree.add_node(Operator::Join(JoinProps::new(JoinType::Inner, criteria)));
    for side in sides {
        tree.add_child(join, side);
    }
    let project = tree.add_node(Operator::Project(ProjectProps { columns, into: None }));
    tree.add_child(project, join);
    project
}
