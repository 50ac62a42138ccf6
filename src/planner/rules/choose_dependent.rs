//! Make merge joins dependent when one side's table asks for it.
//!
//! The dependent side receives a semi-join filter on its first key, bound
//! at runtime to the key values read from the other side.

use super::{OptimizationRule, RuleStack};
use crate::expr::Expr;
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::{NodeId, NodeKind, Operator, PlanTree};
use crate::planner::props::{JoinStrategy, JoinType, SelectProps, Side};

pub struct ChooseDependent;

impl OptimizationRule for ChooseDependent {
    fn name(&self) -> &'static str {
        "ChooseDependent"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        for join in plan.find_all(NodeKind::Join) {
            let Some(props) = plan.join(join) else {
                continue;
            };
            if props.strategy != Some(JoinStrategy::Merge) || props.dependent.is_some() {
                continue;
            }
            // Only a side whose rows are not all preserved can be filtered.
            let candidates: &[Side] = match props.join_type {
                JoinType::Inner | JoinType::Cross => &[Side::Left, Side::Right],
                JoinType::LeftOuter => &[Side::Right],
                JoinType::RightOuter => &[Side::Left],
                JoinType::FullOuter => &[],
            };
            for side in candidates {
                let Some(access) = plan.child(join, side.index()) else {
                    continue;
                };
                let Some(table) = dependent_table(plan, access, ctx)? else {
                    continue;
                };
                make_dependent(plan, join, access, *side, ctx)?;
                log::debug!("join {} reads {} dependently", join, table);
                break;
            }
        }
        Ok(())
    }
}

/// The physical table behind an access node, if the node covers exactly one
/// table and that table asks to be joined dependently.
fn dependent_table(tree: &PlanTree, access: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Option<String>> {
    if tree.kind(access) != NodeKind::Access {
        return Ok(None);
    }
    let sources: Vec<NodeId> = tree
        .preorder(access)
        .into_iter()
        .filter(|n| tree.kind(*n) == NodeKind::Source)
        .collect();
    let [source] = sources.as_slice() else {
        return Ok(None);
    };
    let Some(table) = tree.source_group(*source).and_then(|g| g.definition.clone()) else {
        return Ok(None);
    };
    Ok(ctx.metadata.make_dependent(&table)?.then_some(table))
}

fn make_dependent(
    tree: &mut PlanTree,
    join: NodeId,
    access: NodeId,
    side: Side,
    ctx: &mut RuleContext<'_>,
) -> PlanResult<()> {
    let Some(key) = tree.join(join).and_then(|j| j.keys(side).first().cloned()) else {
        return Ok(());
    };
    let model = tree.access(access).map(|a| a.model.clone()).unwrap_or_default();
    let source = ctx.aliases.fresh("dep").name;
    let filter = tree.add_node(Operator::Select(SelectProps::new(Expr::DependentIn {
        expr: Box::new(key),
        source,
    })));
    let pushable = ctx.capabilities.supports_criteria(&model)?;
    match tree.first_child(access) {
        Some(inner) if pushable => tree.insert_above(inner, filter),
        _ => tree.insert_above(access, filter),
    }
    if let Some(j) = tree.join_mut(join) {
        j.dependent = Some(side);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::rules::Rule;
    use crate::testing::{apply_rules, build};

    const RULES: &[Rule] = &[Rule::PushSelectCriteria, Rule::ChooseJoinStrategy, Rule::ChooseDependent];

    fn dependent_filters(tree: &PlanTree) -> Vec<NodeId> {
        tree.find_all(NodeKind::Select)
            .into_iter()
            .filter(|s| tree.select(*s).is_some_and(|p| matches!(p.criteria, Expr::DependentIn { .. })))
            .collect()
    }

    #[test]
    fn test_lookup_side_becomes_dependent() {
        let mut tree = build("SELECT o.id, l.label FROM orders o, lookup l WHERE o.customer_id = l.code");
        apply_rules(&mut tree, RULES).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        assert_eq!(tree.join(join).unwrap().dependent, Some(Side::Right));

        let filters = dependent_filters(&tree);
        assert_eq!(filters.len(), 1);
        let filter = filters[0];
        // The api model evaluates criteria, so the filter sits inside the access.
        assert_eq!(tree.parent(filter).map(|p| tree.kind(p)), Some(NodeKind::Access));
        let Some(Expr::DependentIn { expr, .. }) = tree.select(filter).map(|p| p.criteria.clone()) else {
            panic!("expected a dependent filter");
        };
        assert_eq!(expr.to_string(), "l.code");
    }

    #[test]
    fn test_preserved_side_is_not_dependent() {
        let mut tree = build("SELECT o.id FROM lookup l LEFT OUTER JOIN orders o ON o.customer_id = l.code");
        apply_rules(&mut tree, RULES).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        assert_eq!(tree.join(join).unwrap().dependent, None);
        assert!(dependent_filters(&tree).is_empty());
    }

    #[test]
    fn test_nested_loop_is_not_dependent() {
        let mut tree = build("SELECT o.id FROM orders o, lookup l WHERE o.customer_id < l.code");
        apply_rules(&mut tree, RULES).unwrap();
        assert!(dependent_filters(&tree).is_empty());
    }

    #[test]
    fn test_rerun_adds_nothing() {
        let mut tree = build("SELECT o.id FROM orders o, lookup l WHERE o.customer_id = l.code");
        apply_rules(&mut tree, RULES).unwrap();
        apply_rules(&mut tree, &[Rule::ChooseDependent]).unwrap();
        assert_eq!(dependent_filters(&tree).len(), 1);
    }
}
