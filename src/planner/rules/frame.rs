//! Rewriting the references above a changed subtree.

use std::collections::{BTreeSet, HashMap};

use crate::expr::{ElementSymbol, Expr, GroupSymbol};
use crate::planner::node::{NodeId, Operator, PlanTree};

/// Map every column of `groups` appearing in `columns` to a typed NULL.
pub fn null_mapping(columns: &[Expr], groups: &BTreeSet<GroupSymbol>) -> HashMap<ElementSymbol, Expr> {
    columns
        .iter()
        .flat_map(|c| c.columns())
        .filter(|sym| groups.contains(&sym.group))
        .map(|sym| {
            let null = Expr::null(sym.data_type);
            (sym, null)
        })
        .collect()
}

/// Apply `mapping` to every expression in the ancestors of `start`, up to
/// and including the first Source node (whose symbol map definitions are
/// rewritten; nothing above a Source sees this frame's symbols).
pub fn convert_frame(tree: &mut PlanTree, start: NodeId, mapping: &HashMap<ElementSymbol, Expr>) {
    if mapping.is_empty() {
        return;
    }
    for id in tree.ancestors(start) {
        if convert_node(tree, id, mapping) {
            break;
        }
    }
}

/// Rewrite one node. Returns true when the node closes the frame.
fn convert_node(tree: &mut PlanTree, id: NodeId, mapping: &HashMap<ElementSymbol, Expr>) -> bool {
    let subst = |exprs: &mut Vec<Expr>| {
        for e in exprs.iter_mut() {
            *e = e.substitute(mapping);
        }
    };
    match tree.op_mut(id) {
        Operator::Select(s) => s.criteria = s.criteria.substitute(mapping),
        Operator::Join(j) => {
            subst(&mut j.criteria);
            subst(&mut j.left_keys);
            subst(&mut j.right_keys);
            subst(&mut j.residual);
        }
        Operator::Group(g) => {
            subst(&mut g.group_cols);
            subst(&mut g.aggregates);
        }
        Operator::Sort(s) => {
            for k in s.keys.iter_mut() {
                k.expr = k.expr.substitute(mapping);
            }
        }
        Operator::Project(p) => {
            for item in p.columns.iter_mut() {
                *item = convert_project_item(item, mapping);
            }
        }
        Operator::Source(s) => {
            if let Some(map) = s.symbol_map.as_mut() {
                map.map_values(|v| v.substitute(mapping));
            }
            return true;
        }
        _ => {}
    }
    false
}

/// Substitute into a projection item, keeping its output name.
pub fn convert_project_item(item: &Expr, mapping: &HashMap<ElementSymbol, Expr>) -> Expr {
    let converted = item.substitute(mapping);
    match item {
        Expr::Column(sym) if converted.output_name() != sym.name => Expr::alias(sym.name.clone(), converted),
        _ => converted,
    }
}
