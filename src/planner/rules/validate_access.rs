//! Final checks that every source will accept the query sent to it.

use super::{OptimizationRule, RuleStack};
use crate::expr::{CompareOp, ElementSymbol, Expr, GroupSymbol};
use crate::planner::context::RuleContext;
use crate::planner::error::{PlanError, PlanResult};
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};

pub struct ValidateAccess;

impl OptimizationRule for ValidateAccess {
    fn name(&self) -> &'static str {
        "ValidateAccess"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        for source in plan.find_all(NodeKind::Source) {
            if !plan.children(source).is_empty() {
                continue;
            }
            let Some(group) = plan.source_group(source).cloned() else {
                continue;
            };
            let Some(table) = group.definition.clone() else {
                continue;
            };
            let Some((model, criteria)) = pushed_criteria(plan, source) else {
                continue;
            };
            check_access_patterns(&group, &table, &criteria, ctx)?;
            if criteria.is_empty() && ctx.capabilities.requires_criteria(&model)? {
                return Err(PlanError::CriteriaRequired {
                    group: group.to_string(),
                    model,
                });
            }
        }
        Ok(())
    }
}

/// Model of the access node above `source` and the criteria between them.
fn pushed_criteria(tree: &PlanTree, source: NodeId) -> Option<(String, Vec<Expr>)> {
    let mut criteria = Vec::new();
    for ancestor in tree.ancestors(source) {
        match tree.op(ancestor) {
            Operator::Access(a) => return Some((a.model.clone(), criteria)),
            Operator::Select(s) => criteria.extend(s.criteria.conjuncts()),
            _ => {}
        }
    }
    None
}

/// Column of `group` bound to a value by the criteria.
fn bound_column<'a>(criteria: &'a Expr, group: &GroupSymbol) -> Option<&'a ElementSymbol> {
    let own = |e: &Expr| e.groups().contains(group);
    match criteria {
        Expr::Compare {
            left,
            op: CompareOp::Eq,
            right,
        } => match (left.as_column(), right.as_column()) {
            (Some(c), _) if c.group == *group && !own(&**right) => Some(c),
            (_, Some(c)) if c.group == *group && !own(&**left) => Some(c),
            _ => None,
        },
        Expr::InList {
            expr, negated: false, ..
        }
        | Expr::DependentIn { expr, .. } => expr.as_column().filter(|c| c.group == *group),
        _ => None,
    }
}

fn check_access_patterns(group: &GroupSymbol, table: &str, criteria: &[Expr], ctx: &RuleContext<'_>) -> PlanResult<()> {
    let patterns = ctx.metadata.access_patterns(table)?;
    if patterns.is_empty() {
        return Ok(());
    }
    let bound: Vec<&ElementSymbol> = criteria.iter().filter_map(|c| bound_column(c, group)).collect();
    let satisfied = patterns.iter().any(|pattern| {
        pattern
            .iter()
            .all(|col| bound.iter().any(|b| b.name.eq_ignore_ascii_case(col)))
    });
    if satisfied {
        return Ok(());
    }
    let patterns = patterns
        .iter()
        .map(|p| format!("[{}]", p.join(", ")))
        .collect::<Vec<_>>()
        .join(", ");
    Err(PlanError::AccessPatternUnsatisfied {
        group: group.to_string(),
        patterns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::rules::Rule;
    use crate::testing::{apply_rules, build};

    fn validate(sql: &str) -> PlanResult<Vec<Rule>> {
        let mut tree = build(sql);
        apply_rules(
            &mut tree,
            &[
                Rule::PushSelectCriteria,
                Rule::ChooseJoinStrategy,
                Rule::ChooseDependent,
                Rule::ValidateAccess,
            ],
        )
    }

    #[test]
    fn test_bound_access_pattern() {
        validate("SELECT label FROM lookup WHERE code = 5").unwrap();
        validate("SELECT label FROM lookup WHERE code IN (1, 2) AND label = 'x'").unwrap();
    }

    #[test]
    fn test_unbound_access_pattern() {
        let err = validate("SELECT label FROM lookup WHERE label = 'x'").unwrap_err();
        match err {
            PlanError::AccessPatternUnsatisfied { group, patterns } => {
                assert_eq!(group, "lookup");
                assert_eq!(patterns, "[code]");
            }
            other => panic!("unexpected error {}", other),
        }
        assert!(validate("SELECT label FROM lookup WHERE code = code + 1").is_err());
    }

    #[test]
    fn test_dependent_join_binds_pattern() {
        validate("SELECT o.id, l.label FROM orders o, lookup l WHERE o.customer_id = l.code").unwrap();
    }

    #[test]
    fn test_preserved_lookup_is_unbound() {
        let err = validate("SELECT l.label FROM lookup l LEFT OUTER JOIN orders o ON o.customer_id = l.code")
            .unwrap_err();
        assert!(matches!(err, PlanError::AccessPatternUnsatisfied { .. }));
        assert!(err.is_user_visible());
    }

    #[test]
    fn test_criteria_required() {
        let err = validate("SELECT note FROM audit").unwrap_err();
        assert!(matches!(err, PlanError::CriteriaRequired { ref model, .. } if model == "api"));
        validate("SELECT note FROM audit WHERE id > 3").unwrap();
    }
}
