//! Arena-backed plan tree.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. A parent
//! owns its children; the parent link is a plain handle. Every structural
//! mutation goes through [`PlanTree`] so that each node's `groups` set
//! stays current: a node's groups are the groups it introduces plus the
//! groups of its children, except that a Source node is a frame boundary
//! and exposes only its own group.
//!
//! Detached nodes stay in the arena; they are simply unreachable from the
//! root.

use std::collections::BTreeSet;
use std::fmt;

use super::props::*;
use crate::expr::{Expr, GroupSymbol};

/// Handle to a node in a [`PlanTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Access,
    Join,
    Source,
    Select,
    Project,
    Group,
    Sort,
    SetOp,
    DupRemove,
    Null,
    TupleLimit,
}

/// A node's operator and its kind-specific properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Access(AccessProps),
    Join(JoinProps),
    Source(SourceProps),
    Select(SelectProps),
    Project(ProjectProps),
    Group(GroupProps),
    Sort(SortProps),
    SetOp(SetOpProps),
    DupRemove,
    /// Produces no rows.
    Null,
    TupleLimit(LimitProps),
}

impl Operator {
    pub fn kind(&self) -> NodeKind {
        match self {
            Operator::Access(_) => NodeKind::Access,
            Operator::Join(_) => NodeKind::Join,
            Operator::Source(_) => NodeKind::Source,
            Operator::Select(_) => NodeKind::Select,
            Operator::Project(_) => NodeKind::Project,
            Operator::Group(_) => NodeKind::Group,
            Operator::Sort(_) => NodeKind::Sort,
            Operator::SetOp(_) => NodeKind::SetOp,
            Operator::DupRemove => NodeKind::DupRemove,
            Operator::Null => NodeKind::Null,
            Operator::TupleLimit(_) => NodeKind::TupleLimit,
        }
    }
}

/// A node in the plan tree.
#[derive(Debug, Clone)]
pub struct PlanNode {
    op: Operator,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    groups: BTreeSet<GroupSymbol>,
    /// Groups introduced by this node itself (Source and Null nodes).
    local_groups: BTreeSet<GroupSymbol>,
    /// Output columns; authoritative for Source leaves and Null nodes,
    /// otherwise assigned from the children.
    pub output_cols: Vec<Expr>,
    /// Estimated cardinality, once costed.
    pub estimate: Option<f64>,
}

impl PlanNode {
    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn kind(&self) -> NodeKind {
        self.op.kind()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn groups(&self) -> &BTreeSet<GroupSymbol> {
        &self.groups
    }
}

/// A relational plan.
#[derive(Debug, Clone)]
pub struct PlanTree {
    nodes: Vec<PlanNode>,
    root: NodeId,
}

impl Default for PlanTree {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! props_accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, id: NodeId) -> Option<&$ty> {
            match &self.nodes[id.0].op {
                Operator::$variant(p) => Some(p),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, id: NodeId) -> Option<&mut $ty> {
            match &mut self.nodes[id.0].op {
                Operator::$variant(p) => Some(p),
                _ => None,
            }
        }
    };
}

impl PlanTree {
    /// An empty arena. The first node created becomes the root until
    /// [`PlanTree::set_root`] says otherwise.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        if let Some(p) = self.nodes[id.0].parent {
            self.detach_from(p, id);
        }
        self.root = id;
    }

    fn push(&mut self, op: Operator, local_groups: BTreeSet<GroupSymbol>, output_cols: Vec<Expr>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PlanNode {
            op,
            children: Vec::new(),
            parent: None,
            groups: local_groups.clone(),
            local_groups,
            output_cols,
            estimate: None,
        });
        id
    }

    /// Create a detached node.
    pub fn add_node(&mut self, op: Operator) -> NodeId {
        self.push(op, BTreeSet::new(), Vec::new())
    }

    /// Create a detached Source node for `group`.
    pub fn add_source(&mut self, group: GroupSymbol, props: SourceProps, output_cols: Vec<Expr>) -> NodeId {
        let output_cols = match &props.symbol_map {
            Some(map) => map.keys().into_iter().map(Expr::Column).collect(),
            None => output_cols,
        };
        self.push(Operator::Source(props), BTreeSet::from([group]), output_cols)
    }

    /// Create a detached Null node standing in for the given groups and columns.
    pub fn add_null(&mut self, groups: BTreeSet<GroupSymbol>, output_cols: Vec<Expr>) -> NodeId {
        self.push(Operator::Null, groups, output_cols)
    }

    /// Replace the subtree at `id` with a Null node that keeps its groups
    /// and output columns. Returns the new node.
    pub fn replace_with_null(&mut self, id: NodeId) -> NodeId {
        let groups = self.nodes[id.0].groups.clone();
        let cols = self.output_columns(id);
        let null = self.add_null(groups, cols);
        self.replace(id, null);
        null
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0]
    }

    pub fn op(&self, id: NodeId) -> &Operator {
        &self.nodes[id.0].op
    }

    /// Mutable operator properties. Structure and groups are not reachable
    /// from here.
    pub fn op_mut(&mut self, id: NodeId) -> &mut Operator {
        &mut self.nodes[id.0].op
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].op.kind()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id.0].children.get(index).copied()
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.child(id, 0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn groups(&self, id: NodeId) -> &BTreeSet<GroupSymbol> {
        &self.nodes[id.0].groups
    }

    /// The group a Source node introduces.
    pub fn source_group(&self, id: NodeId) -> Option<&GroupSymbol> {
        match self.kind(id) {
            NodeKind::Source => self.nodes[id.0].local_groups.iter().next(),
            _ => None,
        }
    }

    props_accessors!(join, join_mut, Join, JoinProps);
    props_accessors!(source, source_mut, Source, SourceProps);
    props_accessors!(select, select_mut, Select, SelectProps);
    props_accessors!(project, project_mut, Project, ProjectProps);
    props_accessors!(group_props, group_props_mut, Group, GroupProps);
    props_accessors!(sort, sort_mut, Sort, SortProps);
    props_accessors!(set_op, set_op_mut, SetOp, SetOpProps);
    props_accessors!(limit, limit_mut, TupleLimit, LimitProps);
    props_accessors!(access, access_mut, Access, AccessProps);

    // ---------------------------------------------------------------
    // Structural mutation
    // ---------------------------------------------------------------

    fn refresh_groups(&mut self, from: NodeId) {
        let mut current = Some(from);
        while let Some(id) = current {
            let node = &self.nodes[id.0];
            let mut groups = node.local_groups.clone();
            if node.op.kind() != NodeKind::Source {
                for c in &node.children {
                    groups.extend(self.nodes[c.0].groups.iter().cloned());
                }
            }
            self.nodes[id.0].groups = groups;
            current = self.nodes[id.0].parent;
        }
    }

    fn detach_from(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|c| *c != child);
        self.nodes[child.0].parent = None;
        self.refresh_groups(parent);
    }

    /// Append a detached node as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        let len = self.nodes[parent.0].children.len();
        self.insert_child(parent, len, child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        if let Some(p) = self.nodes[child.0].parent {
            self.detach_from(p, child);
        }
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        self.refresh_groups(parent);
    }

    /// Detach `child` from `parent`. Returns false if it was not a child.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.nodes[parent.0].children.contains(&child) {
            return false;
        }
        self.detach_from(parent, child);
        true
    }

    /// Detach a node from wherever it sits.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(p) = self.nodes[id.0].parent {
            self.detach_from(p, id);
        }
    }

    /// Put `new` in the position `old` occupies. `old` becomes detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        if let Some(p) = self.nodes[new.0].parent {
            self.detach_from(p, new);
        }
        match self.nodes[old.0].parent {
            Some(parent) => {
                if let Some(slot) = self.nodes[parent.0].children.iter_mut().find(|c| **c == old) {
                    *slot = new;
                }
                self.nodes[old.0].parent = None;
                self.nodes[new.0].parent = Some(parent);
                self.refresh_groups(parent);
            }
            None => {
                if self.root == old {
                    self.root = new;
                }
            }
        }
    }

    /// Insert the detached, childless node `new` between `node` and its parent.
    pub fn insert_above(&mut self, node: NodeId, new: NodeId) {
        self.replace(node, new);
        self.add_child(new, node);
    }

    /// Remove a unary node, promoting its child into its place. Returns the
    /// promoted child, or `None` if the node does not have exactly one child.
    pub fn splice_out(&mut self, node: NodeId) -> Option<NodeId> {
        if self.nodes[node.0].children.len() != 1 {
            return None;
        }
        let child = self.nodes[node.0].children[0];
        self.nodes[node.0].children.clear();
        self.nodes[child.0].parent = None;
        self.refresh_groups(node);
        self.replace(node, child);
        Some(child)
    }

    /// Move a unary node so that it sits directly above `target`.
    pub fn move_above(&mut self, node: NodeId, target: NodeId) {
        if self.splice_out(node).is_some() {
            self.insert_above(target, node);
        }
    }

    pub fn swap_children(&mut self, node: NodeId) {
        let children = &mut self.nodes[node.0].children;
        if children.len() == 2 {
            children.swap(0, 1);
        }
    }

    /// Deep copy a subtree. The copy is detached.
    pub fn copy_subtree(&mut self, id: NodeId) -> NodeId {
        let src = self.nodes[id.0].clone();
        let copy = self.push(src.op, src.local_groups, src.output_cols);
        self.nodes[copy.0].estimate = src.estimate;
        for c in src.children {
            let cc = self.copy_subtree(c);
            self.add_child(copy, cc);
        }
        copy
    }

    // ---------------------------------------------------------------
    // Traversal
    // ---------------------------------------------------------------

    pub fn preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for c in self.nodes[n.0].children.iter().rev() {
                stack.push(*c);
            }
        }
        out
    }

    pub fn postorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for c in &self.nodes[id.0].children {
            out.extend(self.postorder(*c));
        }
        out.push(id);
        out
    }

    /// Reachable nodes of a kind, top-down.
    pub fn find_all(&self, kind: NodeKind) -> Vec<NodeId> {
        self.preorder(self.root)
            .into_iter()
            .filter(|n| self.kind(*n) == kind)
            .collect()
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes[id.0].parent;
        while let Some(p) = current {
            out.push(p);
            current = self.nodes[p.0].parent;
        }
        out
    }

    /// True if `id` has an ancestor of `kind` before reaching any of `stop_at`.
    pub fn is_beneath(&self, id: NodeId, kind: NodeKind, stop_at: &[NodeKind]) -> bool {
        for a in self.ancestors(id) {
            let k = self.kind(a);
            if k == kind {
                return true;
            }
            if stop_at.contains(&k) {
                return false;
            }
        }
        false
    }

    /// True if `id` is part of the tree hanging off the root.
    pub fn is_reachable(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).last() == Some(&self.root)
    }

    /// Index of `id` among its parent's children.
    pub fn child_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.nodes[id.0].parent?;
        self.nodes[parent.0].children.iter().position(|c| *c == id)
    }

    pub fn len(&self) -> usize {
        self.preorder(self.root).len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Derive the output columns of a node from its operator and children.
    pub fn output_columns(&self, id: NodeId) -> Vec<Expr> {
        let node = &self.nodes[id.0];
        match &node.op {
            Operator::Source(_) if node.children.is_empty() => node.output_cols.clone(),
            Operator::Source(props) => match &props.symbol_map {
                Some(map) => map.keys().into_iter().map(Expr::Column).collect(),
                None => node.output_cols.clone(),
            },
            Operator::Null => node.output_cols.clone(),
            Operator::Project(p) => p.columns.clone(),
            Operator::Group(g) => g.group_cols.iter().chain(g.aggregates.iter()).cloned().collect(),
            Operator::Join(_) => node
                .children
                .iter()
                .flat_map(|c| self.output_columns(*c))
                .collect(),
            Operator::Sort(s) => {
                let mut cols = node
                    .children
                    .first()
                    .map(|c| self.output_columns(*c))
                    .unwrap_or_default();
                for k in &s.keys {
                    let present = cols.iter().any(|c| *c == k.expr || *c.unalias() == k.expr);
                    if !present && k.expr.as_column().is_none() {
                        cols.push(k.expr.clone());
                    }
                }
                cols
            }
            Operator::Access(_)
            | Operator::Select(_)
            | Operator::SetOp(_)
            | Operator::DupRemove
            | Operator::TupleLimit(_) => node
                .children
                .first()
                .map(|c| self.output_columns(*c))
                .unwrap_or_default(),
        }
    }

    // ---------------------------------------------------------------
    // Display
    // ---------------------------------------------------------------

    fn describe(&self, id: NodeId) -> String {
        let list = |exprs: &[Expr]| exprs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ");
        match self.op(id) {
            Operator::Access(a) => format!("Access [{}]", a.model),
            Operator::Join(j) => {
                let mut s = format!("Join {}", j.join_type);
                if let Some(strategy) = j.strategy {
                    s.push_str(&format!(" {}", strategy));
                }
                if !j.criteria.is_empty() {
                    s.push_str(&format!(" ON {}", list(&j.criteria)));
                }
                if !j.left_keys.is_empty() {
                    s.push_str(&format!(" keys=({})=({})", list(&j.left_keys), list(&j.right_keys)));
                }
                if let Some(side) = j.dependent {
                    s.push_str(&format!(" dependent={:?}", side));
                }
                s
            }
            Operator::Source(p) => {
                let mut s = format!(
                    "Source {}",
                    self.source_group(id).map(|g| g.to_string()).unwrap_or_default()
                );
                if !p.correlated.is_empty() {
                    let refs: Vec<String> = p.correlated.iter().map(|g| g.to_string()).collect();
                    s.push_str(&format!(" lateral({})", refs.join(", ")));
                }
                s
            }
            Operator::Select(p) => {
                let mut s = format!("Select {}", p.criteria);
                if p.phantom {
                    s.push_str(" [phantom]");
                }
                if p.copied {
                    s.push_str(" [copied]");
                }
                s
            }
            Operator::Project(p) => match &p.into {
                Some(target) => format!("Project INTO {} [{}]", target, list(&p.columns)),
                None => format!("Project [{}]", list(&p.columns)),
            },
            Operator::Group(g) => format!("Group [{}] [{}]", list(&g.group_cols), list(&g.aggregates)),
            Operator::Sort(s) => {
                let keys: Vec<String> = s
                    .keys
                    .iter()
                    .map(|k| format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" }))
                    .collect();
                format!("Sort [{}]", keys.join(", "))
            }
            Operator::SetOp(p) => format!("{}{}", p.op, if p.all { " ALL" } else { "" }),
            Operator::DupRemove => "DupRemove".to_string(),
            Operator::Null => {
                let groups: Vec<String> = self.groups(id).iter().map(|g| g.to_string()).collect();
                format!("Null {{{}}}", groups.join(", "))
            }
            Operator::TupleLimit(l) => {
                let mut s = "Limit".to_string();
                if let Some(limit) = &l.limit {
                    s.push_str(&format!(" {}", limit));
                }
                if let Some(offset) = &l.offset {
                    s.push_str(&format!(" OFFSET {}", offset));
                }
                s
            }
        }
    }

    fn format_indent(&self, f: &mut fmt::Formatter<'_>, id: NodeId, indent: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(indent), self.describe(id))?;
        for c in self.children(id) {
            self.format_indent(f, *c, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return writeln!(f, "<empty plan>");
        }
        self.format_indent(f, self.root, 0)
    }
}
