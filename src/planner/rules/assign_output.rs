//! Recompute the output columns of every node after structural rewrites.

use super::{OptimizationRule, RuleStack};
use crate::planner::context::RuleContext;
use crate::planner::error::PlanResult;
use crate::planner::node::PlanTree;

pub struct AssignOutputElements;

impl OptimizationRule for AssignOutputElements {
    fn name(&self) -> &'static str {
        "AssignOutputElements"
    }

    fn execute(&self, plan: &mut PlanTree, _stack: &mut RuleStack, _ctx: &mut RuleContext<'_>) -> PlanResult<()> {
        // Children first so derived lists see their inputs' final columns.
        for node in plan.postorder(plan.root()) {
            let cols = plan.output_columns(node);
            plan.node_mut(node).output_cols = cols;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::planner::node::NodeKind;
    use crate::planner::rules::Rule;
    use crate::testing::{apply_rules, build};

    #[test]
    fn test_join_lists_both_sides() {
        let mut tree = build("SELECT o.id, c.name FROM orders o JOIN customers c ON o.customer_id = c.id");
        apply_rules(&mut tree, &[Rule::AssignOutputElements]).unwrap();
        let join = tree.find_all(NodeKind::Join)[0];
        let names: Vec<String> = tree.node(join).output_cols.iter().map(|c| c.to_string()).collect();
        assert!(names.contains(&"o.customer_id".to_string()));
        assert!(names.contains(&"c.name".to_string()));
        let root = tree.root();
        assert_eq!(tree.node(root).output_cols.len(), 2);
    }

    #[test]
    fn test_refreshed_after_rewrite() {
        let mut tree = build("SELECT a FROM t1");
        apply_rules(&mut tree, &[Rule::AssignOutputElements]).unwrap();
        let project = tree.find_all(NodeKind::Project)[0];
        let access = tree.find_all(NodeKind::Access)[0];
        tree.node_mut(access).output_cols.clear();
        apply_rules(&mut tree, &[Rule::AssignOutputElements]).unwrap();
        assert_eq!(tree.node(access).output_cols.len(), 2);
        assert_eq!(tree.node(project).output_cols.len(), 1);
    }
}
