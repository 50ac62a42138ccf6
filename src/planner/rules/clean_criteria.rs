//! Drop criteria that no longer do anything and turn provably empty
//! subtrees into Null nodes.

use super::{OptimizationRule, Rule, RuleStack};
use crate::expr::{Expr, ExprSimplifier, TriBool};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, PlanTree};
use crate::planner::props::JoinType;

pub struct CleanCriteria;

impl OptimizationRule for CleanCriteria {
    fn name(&self) -> &'static str {
        "CleanCriteria"
    }

    fn execute(&self, plan: &mut PlanTree, stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        let keep_copies = stack.contains(Rule::CopyCriteria);
        let mut nulls = 0;

        for select in plan.find_all(NodeKind::Select) {
            if !plan.is_reachable(select) {
                continue;
            }
            let Some(props) = plan.select(select).cloned() else {
                continue;
            };
            if props.phantom {
                plan.splice_out(select);
                continue;
            }
            if props.copied
                && !keep_copies
                && !plan.is_beneath(select, NodeKind::Access, &[NodeKind::Join, NodeKind::Source, NodeKind::SetOp])
            {
                log::trace!("dropping copied criteria {}", props.criteria);
                plan.splice_out(select);
                continue;
            }
            match fold(&props.criteria, ctx.simplifier)? {
                Some(TriBool::True) => {
                    plan.splice_out(select);
                }
                Some(_) => {
                    log::debug!("criteria {} is never satisfied", props.criteria);
                    plan.replace_with_null(select);
                    nulls += 1;
                }
                None => {}
            }
        }

        for join in plan.find_all(NodeKind::Join) {
            if !plan.is_reachable(join) {
                continue;
            }
            nulls += clean_join(plan, join, ctx.simplifier)?;
        }

        if nulls > 0 {
            stack.push(Rule::RaiseNull);
        }
        Ok(())
    }
}

/// Truth value of a criteria if it folds to a constant. Evaluation errors
/// are only reported for criteria with no row context.
fn fold(criteria: &Expr, simplifier: &dyn ExprSimplifier) -> PlanResult<Option<TriBool>> {
    match simplifier.simplify_criteria(criteria) {
        Ok(folded) => Ok(folded.as_tri()),
        Err(e) if criteria.is_constant() => Err(e.into()),
        Err(_) => Ok(None),
    }
}

fn clean_join(tree: &mut PlanTree, join: NodeId, simplifier: &dyn ExprSimplifier) -> PlanResult<usize> {
    let Some(props) = tree.join(join).cloned() else {
        return Ok(0);
    };
    let mut kept = Vec::new();
    let mut never = false;
    for conjunct in &props.criteria {
        match fold(conjunct, simplifier)? {
            Some(TriBool::True) => {}
            Some(_) => {
                never = true;
                kept.push(conjunct.clone());
            }
            None => kept.push(conjunct.clone()),
        }
    }

    if never {
        let target = match props.join_type {
            JoinType::Inner | JoinType::Cross => Some(join),
            JoinType::LeftOuter => tree.child(join, 1),
            JoinType::RightOuter => tree.child(join, 0),
            JoinType::FullOuter => None,
        };
        if let Some(target) = target {
            if tree.kind(target) != NodeKind::Null {
                log::debug!("join {} criteria is never satisfied", join);
                tree.replace_with_null(target);
                return Ok(1);
            }
        }
    }

    if let Some(j) = tree.join_mut(join) {
        if j.join_type == JoinType::Inner && kept.is_empty() {
            j.join_type = JoinType::Cross;
        }
        j.criteria = kept;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{apply_rules, build, count};

    #[test]
    fn test_true_criteria_removed() {
        let mut tree = build("SELECT id FROM orders WHERE 1 = 1");
        apply_rules(&mut tree, &[Rule::CleanCriteria]).unwrap();
        assert_eq!(count(&tree, NodeKind::Select), 0);
    }

    #[test]
    fn test_false_criteria_empties_plan() {
        let mut tree = build("SELECT id FROM orders WHERE 1 = 0");
        let executed = apply_rules(&mut tree, &[Rule::CleanCriteria]).unwrap();
        assert_eq!(executed[1], Rule::RaiseNull);
        assert_eq!(tree.kind(tree.root()), NodeKind::Null);
    }

    #[test]
    fn test_comparison_with_null_is_never_true() {
        let mut tree = build("SELECT id FROM orders WHERE amount = NULL");
        apply_rules(&mut tree, &[Rule::CleanCriteria]).unwrap();
        assert_eq!(tree.kind(tree.root()), NodeKind::Null);
    }

    #[test]
    fn test_constant_error_surfaces() {
        let mut tree = build("SELECT id FROM orders WHERE 1 / 0 = 1");
        assert!(apply_rules(&mut tree, &[Rule::CleanCriteria]).is_err());
    }

    #[test]
    fn test_phantom_removed() {
        let mut tree = build("SELECT v.a FROM (SELECT a FROM t1 UNION ALL SELECT a FROM t3) v WHERE v.a = 1");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CleanCriteria]).unwrap();
        assert_eq!(count(&tree, NodeKind::Select), 2);
    }

    #[test]
    fn test_unpushed_copy_removed() {
        let mut tree =
            build("SELECT t1.a FROM t1, t2 WHERE t1.a = t2.a AND t1.a = 4");
        apply_rules(&mut tree, &[Rule::PushSelectCriteria, Rule::CopyCriteria]).unwrap();
        assert_eq!(count(&tree, NodeKind::Select), 2);
        apply_rules(&mut tree, &[Rule::CleanCriteria]).unwrap();
        // t2 lives in a model that cannot take the copy.
        assert_eq!(count(&tree, NodeKind::Select), 1);
    }

    #[test]
    fn test_false_on_clause_of_left_join_nulls_inner_side() {
        let mut tree = build("SELECT t1.a, t2.b FROM t1 LEFT OUTER JOIN t2 ON t1.a = t2.a AND 1 = 0");
        apply_rules(&mut tree, &[Rule::CleanCriteria]).unwrap();
        // The inner side is gone and its columns read as NULL.
        assert_eq!(count(&tree, NodeKind::Join), 0);
        assert_eq!(count(&tree, NodeKind::Null), 0);
        let project = tree.root();
        assert_eq!(
            tree.project(project).map(|p| p.columns[1].clone()),
            Some(Expr::alias("b", Expr::null(crate::expr::DataType::Integer)))
        );
    }

    #[test]
    fn test_inner_join_true_criteria_becomes_cross() {
        let mut tree = build("SELECT t1.a FROM t1 INNER JOIN t2 ON 1 = 1");
        apply_rules(&mut tree, &[Rule::CleanCriteria]).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        assert_eq!(tree.join(join).map(|j| j.join_type), Some(JoinType::Cross));
    }
}
