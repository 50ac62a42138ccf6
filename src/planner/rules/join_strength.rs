//! Null dependence of criteria and outer join strengthening.
//!
//! A criteria is null dependent on a set of groups when it can still be
//! satisfied after every column of those groups is replaced by NULL. A
//! filter above an outer join that is not null dependent on the inner
//! side rejects every null-extended row, so the join can be strengthened.

use std::collections::BTreeSet;

use crate::expr::{Expr, ExprSimplifier, GroupSymbol, TriBool};
use crate::planner::node::{NodeId, PlanTree};
use crate::planner::props::JoinType;

/// True unless the criteria is provably FALSE or UNKNOWN with `groups` null.
/// Evaluation failures count as dependent.
pub fn is_null_dependent(criteria: &Expr, groups: &BTreeSet<GroupSymbol>, simplifier: &dyn ExprSimplifier) -> bool {
    let nulled = criteria.transform(&|e| match e {
        Expr::Column(sym) if groups.contains(&sym.group) => Some(Expr::null(sym.data_type)),
        _ => None,
    });
    match simplifier.simplify_criteria(&nulled) {
        Ok(folded) => !matches!(folded.as_tri(), Some(TriBool::False) | Some(TriBool::Unknown)),
        Err(e) => {
            log::debug!("treating {} as null dependent: {}", criteria, e);
            true
        }
    }
}

/// Strengthen an outer join given a criteria applied above it. Returns
/// true if the join type changed. A FULL join that only keeps right rows
/// has its children swapped and becomes LEFT OUTER.
pub fn optimize_join_type(
    tree: &mut PlanTree,
    join: NodeId,
    criteria: &Expr,
    simplifier: &dyn ExprSimplifier,
) -> bool {
    let join_type = match tree.join(join) {
        Some(props) if props.join_type.is_outer() => props.join_type,
        _ => return false,
    };
    let (Some(left), Some(right)) = (tree.child(join, 0), tree.child(join, 1)) else {
        return false;
    };
    let criteria_groups = criteria.groups();
    if criteria_groups.is_empty() || !criteria_groups.is_subset(tree.groups(join)) {
        return false;
    }
    let left_groups = tree.groups(left).clone();
    let right_groups = tree.groups(right).clone();

    let new_type = match join_type {
        JoinType::LeftOuter | JoinType::RightOuter => {
            let (outer, inner) = if join_type == JoinType::LeftOuter {
                (&left_groups, &right_groups)
            } else {
                (&right_groups, &left_groups)
            };
            if criteria_groups.is_subset(outer) || is_null_dependent(criteria, inner, simplifier) {
                return false;
            }
            JoinType::Inner
        }
        JoinType::FullOuter => {
            let left_dependent = is_null_dependent(criteria, &left_groups, simplifier);
            let right_dependent = is_null_dependent(criteria, &right_groups, simplifier);
            match (left_dependent, right_dependent) {
                (true, true) => return false,
                // Rows with a null left side are rejected.
                (false, true) => JoinType::LeftOuter,
                // Rows with a null right side are rejected.
                (true, false) => {
                    tree.swap_children(join);
                    if let Some(props) = tree.join_mut(join) {
                        props.swap_sides();
                    }
                    JoinType::LeftOuter
                }
                (false, false) => JoinType::Inner,
            }
        }
        _ => return false,
    };

    log::debug!("join {} strengthened from {} to {}", join, join_type, new_type);
    if let Some(props) = tree.join_mut(join) {
        props.join_type = new_type;
    }
    true
}
