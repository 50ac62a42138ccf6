//! Builds the canonical plan tree for a parsed statement.
//!
//! Names are bound against table metadata and in-scope aliases. The shape
//! is always the same, bottom-up: sources and joins for FROM, one Select
//! per WHERE conjunct, Group and a having Select, Project, DupRemove for
//! DISTINCT, then Sort and TupleLimit.

use std::collections::{BTreeSet, HashMap};

use super::error::{PlanError, PlanResult};
use super::node::{NodeId, Operator, PlanTree};
use super::props::*;
use super::symbol_map::SymbolMap;
use crate::expr::{AggregateFunction, CompareOp, DataType, ElementSymbol, Expr, GroupSymbol, Value};
use crate::metadata::Metadata;
use crate::sql::{self, BinaryOperator, JoinKind, LiteralValue, QueryBody, SelectColumn, Statement, TableRef, UnaryOperator};

/// A FROM item visible to expressions.
#[derive(Debug, Clone)]
struct ScopeEntry {
    alias: String,
    group: GroupSymbol,
    columns: Vec<ElementSymbol>,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    entries: Vec<ScopeEntry>,
}

impl Scope {
    fn groups(&self) -> BTreeSet<GroupSymbol> {
        self.entries.iter().map(|e| e.group.clone()).collect()
    }

    fn find_column(&self, table: Option<&str>, name: &str) -> PlanResult<Option<ElementSymbol>> {
        let mut found: Option<ElementSymbol> = None;
        for entry in &self.entries {
            if let Some(t) = table {
                if !entry.alias.eq_ignore_ascii_case(t) {
                    continue;
                }
            }
            if let Some(col) = entry.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)) {
                if found.is_some() {
                    return Err(PlanError::Unresolved(format!("ambiguous column {}", name)));
                }
                found = Some(col.clone());
            }
        }
        Ok(found)
    }
}

/// Converts statements into plan trees.
pub struct PlanBuilder<'a> {
    metadata: &'a dyn Metadata,
    tree: PlanTree,
    group_names: HashMap<String, u32>,
    /// Outer groups referenced while building each enclosing derived table.
    correlation: Vec<BTreeSet<GroupSymbol>>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(metadata: &'a dyn Metadata) -> Self {
        Self {
            metadata,
            tree: PlanTree::new(),
            group_names: HashMap::new(),
            correlation: Vec::new(),
        }
    }

    /// Build the plan for a statement.
    pub fn build(mut self, stmt: &Statement) -> PlanResult<PlanTree> {
        let root = match stmt {
            Statement::Query(query) => self.build_query(query, &[])?,
            Statement::Insert(insert) => self.build_insert(insert)?,
        };
        self.tree.set_root(root);
        log::debug!("built plan:\n{}", self.tree);
        Ok(self.tree)
    }

    fn new_group(&mut self, alias: &str, table: Option<&str>) -> GroupSymbol {
        let count = self.group_names.entry(alias.to_lowercase()).or_insert(0);
        let seq = *count;
        *count += 1;
        let group = match table {
            Some(t) => GroupSymbol::physical(alias, t),
            None => GroupSymbol::new(alias),
        };
        group.with_seq(seq)
    }

    fn above(&mut self, child: NodeId, op: Operator) -> NodeId {
        let node = self.tree.add_node(op);
        self.tree.add_child(node, child);
        node
    }

    fn build_insert(&mut self, insert: &sql::Insert) -> PlanResult<NodeId> {
        let table = self.metadata.table(&insert.table)?.clone();
        let target_cols: Vec<String> = match &insert.columns {
            Some(cols) => {
                for c in cols {
                    if table.get_column(c).is_none() {
                        return Err(PlanError::Unresolved(format!("column {}.{}", table.name, c)));
                    }
                }
                cols.clone()
            }
            None => table.columns.iter().map(|c| c.name.clone()).collect(),
        };
        let source = self.build_query(&insert.source, &[])?;
        let outputs = self.tree.output_columns(source);
        if outputs.len() != target_cols.len() {
            return Err(PlanError::Unresolved(format!(
                "INSERT into {} names {} columns but the query produces {}",
                table.name,
                target_cols.len(),
                outputs.len()
            )));
        }
        let columns = target_cols
            .iter()
            .zip(&outputs)
            .map(|(name, out)| Expr::alias(name.clone(), out.unalias().clone()))
            .collect();
        let target = GroupSymbol::physical(table.name.clone(), table.name.clone());
        Ok(self.above(
            source,
            Operator::Project(ProjectProps {
                columns,
                into: Some(target),
            }),
        ))
    }

    fn build_query(&mut self, query: &sql::Query, outer: &[Scope]) -> PlanResult<NodeId> {
        let (mut node, scope) = self.build_body(&query.body, outer)?;

        if !query.order_by.is_empty() {
            let items = self.tree.output_columns(node);
            let mut keys = Vec::new();
            for item in &query.order_by {
                let expr = self.resolve_order_item(&item.expr, &items, scope.as_ref(), outer)?;
                keys.push(SortKey {
                    expr,
                    ascending: item.ascending,
                });
            }
            node = self.above(node, Operator::Sort(SortProps { keys }));
        }

        if query.limit.is_some() || query.offset.is_some() {
            let empty = Scope::default();
            let limit = query
                .limit
                .as_ref()
                .map(|e| self.resolve(e, &empty, &[]))
                .transpose()?;
            let offset = query
                .offset
                .as_ref()
                .map(|e| self.resolve(e, &empty, &[]))
                .transpose()?;
            let mut props = LimitProps::new(limit, offset);
            props.strict = self.tree.output_columns(node).iter().any(|c| !c.is_deterministic());
            node = self.above(node, Operator::TupleLimit(props));
        }
        Ok(node)
    }

    fn resolve_order_item(
        &mut self,
        expr: &sql::Expr,
        items: &[Expr],
        scope: Option<&Scope>,
        outer: &[Scope],
    ) -> PlanResult<Expr> {
        match expr {
            sql::Expr::Literal(LiteralValue::Integer(n)) => {
                let index = usize::try_from(*n).ok().filter(|i| *i >= 1 && *i <= items.len());
                return index
                    .map(|i| items[i - 1].clone())
                    .ok_or_else(|| PlanError::Unresolved(format!("ORDER BY position {}", n)));
            }
            sql::Expr::Column { table: None, name } => {
                if let Some(item) = items.iter().find(|i| i.output_name().eq_ignore_ascii_case(name)) {
                    return Ok(item.clone());
                }
            }
            _ => {}
        }
        let Some(scope) = scope else {
            return Err(PlanError::Unresolved(
                "ORDER BY on a set operation must name an output column".into(),
            ));
        };
        let resolved = self.resolve(expr, scope, outer)?;
        items
            .iter()
            .find(|i| *i.unalias() == resolved)
            .cloned()
            .ok_or_else(|| PlanError::Unresolved(format!("ORDER BY item {} is not in the select list", resolved)))
    }

    fn build_body(&mut self, body: &QueryBody, outer: &[Scope]) -> PlanResult<(NodeId, Option<Scope>)> {
        match body {
            QueryBody::Select(select) => {
                let (node, scope) = self.build_select(select, outer)?;
                Ok((node, Some(scope)))
            }
            QueryBody::Nested(query) => Ok((self.build_query(query, outer)?, None)),
            QueryBody::SetOperation { op, all, left, right } => {
                let (l, _) = self.build_body(left, outer)?;
                let (r, _) = self.build_body(right, outer)?;
                let (lc, rc) = (self.tree.output_columns(l).len(), self.tree.output_columns(r).len());
                if lc != rc {
                    return Err(PlanError::Unresolved(format!(
                        "set operation branches produce {} and {} columns",
                        lc, rc
                    )));
                }
                let op = match op {
                    sql::SetOperator::Union => SetOperation::Union,
                    sql::SetOperator::Intersect => SetOperation::Intersect,
                    sql::SetOperator::Except => SetOperation::Except,
                };
                let node = self.tree.add_node(Operator::SetOp(SetOpProps { op, all: *all }));
                self.tree.add_child(node, l);
                self.tree.add_child(node, r);
                Ok((node, None))
            }
        }
    }

    fn build_select(&mut self, select: &sql::Select, outer: &[Scope]) -> PlanResult<(NodeId, Scope)> {
        let mut scope = Scope::default();
        let mut node = self.build_from(&select.from, &mut scope, outer)?;

        if let Some(where_clause) = &select.where_clause {
            let criteria = self.resolve(where_clause, &scope, outer)?;
            if criteria.contains_aggregate() {
                return Err(PlanError::Unresolved("aggregate in WHERE clause".into()));
            }
            for conjunct in criteria.conjuncts() {
                node = self.above(node, Operator::Select(SelectProps::new(conjunct)));
            }
        }

        let mut items = Vec::new();
        for column in &select.columns {
            match column {
                SelectColumn::Wildcard => {
                    for entry in &scope.entries {
                        items.extend(entry.columns.iter().cloned().map(Expr::Column));
                    }
                }
                SelectColumn::QualifiedWildcard(alias) => {
                    let entry = scope
                        .entries
                        .iter()
                        .find(|e| e.alias.eq_ignore_ascii_case(alias))
                        .ok_or_else(|| PlanError::Unresolved(format!("table {}", alias)))?;
                    items.extend(entry.columns.iter().cloned().map(Expr::Column));
                }
                SelectColumn::Expr { expr, alias } => {
                    let resolved = self.resolve(expr, &scope, outer)?;
                    items.push(match alias {
                        Some(name) => Expr::alias(name.clone(), resolved),
                        None => resolved,
                    });
                }
            }
        }

        let having = select
            .having
            .as_ref()
            .map(|h| self.resolve(h, &scope, outer))
            .transpose()?;
        let group_cols = select
            .group_by
            .iter()
            .map(|g| self.resolve(g, &scope, outer))
            .collect::<PlanResult<Vec<_>>>()?;
        let grouped = !group_cols.is_empty()
            || items.iter().any(|i| i.contains_aggregate())
            || having.as_ref().is_some_and(|h| h.contains_aggregate());

        if grouped {
            let mut aggregates: Vec<Expr> = Vec::new();
            for e in items.iter().chain(having.iter()) {
                for agg in e.aggregates() {
                    if !aggregates.contains(&agg) {
                        aggregates.push(agg);
                    }
                }
            }
            for item in &items {
                check_grouped(item.unalias(), &group_cols)?;
            }
            node = self.above(
                node,
                Operator::Group(GroupProps {
                    group_cols,
                    aggregates,
                }),
            );
            if let Some(h) = having {
                check_grouped(&h, &self.group_cols_of(node))?;
                let mut props = SelectProps::new(h);
                props.having = true;
                node = self.above(node, Operator::Select(props));
            }
        } else if having.is_some() {
            return Err(PlanError::Unresolved("HAVING without grouping".into()));
        }

        node = self.above(node, Operator::Project(ProjectProps { columns: items, into: None }));
        if select.distinct {
            node = self.above(node, Operator::DupRemove);
        }
        Ok((node, scope))
    }

    fn group_cols_of(&self, node: NodeId) -> Vec<Expr> {
        self.tree.group_props(node).map(|g| g.group_cols.clone()).unwrap_or_default()
    }

    fn build_from(&mut self, from: &[TableRef], scope: &mut Scope, outer: &[Scope]) -> PlanResult<NodeId> {
        let mut node: Option<NodeId> = None;
        for table_ref in from {
            let next = self.build_table_ref(table_ref, scope, outer)?;
            node = Some(match node {
                None => next,
                Some(prev) => self.join(prev, next, JoinType::Cross, vec![]),
            });
        }
        node.ok_or_else(|| PlanError::Unresolved("SELECT without FROM".into()))
    }

    fn join(&mut self, left: NodeId, right: NodeId, join_type: JoinType, criteria: Vec<Expr>) -> NodeId {
        let node = self.tree.add_node(Operator::Join(JoinProps::new(join_type, criteria)));
        self.tree.add_child(node, left);
        self.tree.add_child(node, right);
        node
    }

    fn register(&mut self, scope: &mut Scope, entry: ScopeEntry) -> PlanResult<()> {
        if scope.entries.iter().any(|e| e.alias.eq_ignore_ascii_case(&entry.alias)) {
            return Err(PlanError::Unresolved(format!("duplicate table alias {}", entry.alias)));
        }
        scope.entries.push(entry);
        Ok(())
    }

    fn build_table_ref(&mut self, table_ref: &TableRef, scope: &mut Scope, outer: &[Scope]) -> PlanResult<NodeId> {
        match table_ref {
            TableRef::Table { name, alias } => {
                let metadata = self.metadata;
                let table = metadata.table(name)?;
                let model = table.model.clone();
                let alias = alias.clone().unwrap_or_else(|| table.name.clone());
                let group = self.new_group(&alias, Some(&table.name));
                let columns: Vec<ElementSymbol> = table
                    .columns
                    .iter()
                    .map(|c| ElementSymbol::new(group.clone(), c.name.clone(), c.data_type))
                    .collect();
                let source = self.tree.add_source(
                    group.clone(),
                    SourceProps::physical(),
                    columns.iter().cloned().map(Expr::Column).collect(),
                );
                let access = self.above(source, Operator::Access(AccessProps { model }));
                self.register(scope, ScopeEntry { alias, group, columns })?;
                Ok(access)
            }
            TableRef::Derived { subquery, alias, lateral } => {
                let mut scopes = Vec::new();
                if *lateral {
                    scopes.push(scope.clone());
                }
                scopes.extend(outer.iter().cloned());

                self.correlation.push(BTreeSet::new());
                let built = self.build_query(subquery, &scopes);
                let refs = self.correlation.pop().unwrap_or_default();
                let child = built?;

                let local = scope.groups();
                let correlated: BTreeSet<GroupSymbol> = refs.iter().filter(|g| local.contains(*g)).cloned().collect();
                if let Some(enclosing) = self.correlation.last_mut() {
                    enclosing.extend(refs.into_iter().filter(|g| !local.contains(g)));
                }

                let group = self.new_group(alias, None);
                let map = SymbolMap::create(&group, &self.tree.output_columns(child));
                let columns = map.keys();
                let mut props = SourceProps::virtual_group(map);
                props.correlated = correlated;
                let source = self.tree.add_source(group.clone(), props, vec![]);
                self.tree.add_child(source, child);
                self.register(
                    scope,
                    ScopeEntry {
                        alias: alias.clone(),
                        group,
                        columns,
                    },
                )?;
                Ok(source)
            }
            TableRef::Join { left, right, kind, on } => {
                let l = self.build_table_ref(left, scope, outer)?;
                let r = self.build_table_ref(right, scope, outer)?;
                let criteria = match on {
                    Some(on) => {
                        let resolved = self.resolve(on, scope, outer)?;
                        if resolved.contains_aggregate() {
                            return Err(PlanError::Unresolved("aggregate in join criteria".into()));
                        }
                        resolved.conjuncts()
                    }
                    None => vec![],
                };
                let join_type = match kind {
                    JoinKind::Inner if criteria.is_empty() => JoinType::Cross,
                    JoinKind::Inner => JoinType::Inner,
                    JoinKind::Left => JoinType::LeftOuter,
                    JoinKind::Right => JoinType::RightOuter,
                    JoinKind::Full => JoinType::FullOuter,
                    JoinKind::Cross => JoinType::Cross,
                };
                Ok(self.join(l, r, join_type, criteria))
            }
        }
    }

    fn resolve_column(&mut self, table: Option<&str>, name: &str, scope: &Scope, outer: &[Scope]) -> PlanResult<Expr> {
        if let Some(sym) = scope.find_column(table, name)? {
            return Ok(Expr::Column(sym));
        }
        for s in outer {
            if let Some(sym) = s.find_column(table, name)? {
                if let Some(refs) = self.correlation.last_mut() {
                    refs.insert(sym.group.clone());
                }
                return Ok(Expr::Column(sym));
            }
        }
        Err(PlanError::Unresolved(match table {
            Some(t) => format!("column {}.{}", t, name),
            None => format!("column {}", name),
        }))
    }

    fn resolve(&mut self, expr: &sql::Expr, scope: &Scope, outer: &[Scope]) -> PlanResult<Expr> {
        Ok(match expr {
            sql::Expr::Column { table, name } => self.resolve_column(table.as_deref(), name, scope, outer)?,
            sql::Expr::Literal(lit) => Expr::constant(literal(lit)),
            sql::Expr::Parameter(index) => Expr::Parameter {
                index: *index,
                data_type: DataType::Null,
            },
            sql::Expr::Nested(inner) => self.resolve(inner, scope, outer)?,
            sql::Expr::BinaryOp { left, op, right } => {
                let l = self.resolve(left, scope, outer)?;
                let r = self.resolve(right, scope, outer)?;
                match op {
                    BinaryOperator::And => Expr::and(vec![l, r]),
                    BinaryOperator::Or => Expr::or(vec![l, r]),
                    BinaryOperator::Eq => Expr::compare(l, CompareOp::Eq, r),
                    BinaryOperator::NotEq => Expr::compare(l, CompareOp::NotEq, r),
                    BinaryOperator::Lt => Expr::compare(l, CompareOp::Lt, r),
                    BinaryOperator::LtEq => Expr::compare(l, CompareOp::LtEq, r),
                    BinaryOperator::Gt => Expr::compare(l, CompareOp::Gt, r),
                    BinaryOperator::GtEq => Expr::compare(l, CompareOp::GtEq, r),
                    arithmetic => {
                        let name = arithmetic
                            .function_name()
                            .ok_or_else(|| PlanError::Internal(format!("operator {:?}", arithmetic)))?;
                        Expr::function(name, vec![l, r])
                    }
                }
            }
            sql::Expr::UnaryOp { op, expr } => {
                let e = self.resolve(expr, scope, outer)?;
                match op {
                    UnaryOperator::Plus => e,
                    UnaryOperator::Not => Expr::Not(Box::new(e)),
                    UnaryOperator::Minus => match e.as_constant() {
                        Some(Value::Integer(v)) => Expr::int(-v),
                        Some(Value::Float(v)) => Expr::constant(Value::Float(-v)),
                        _ => Expr::function("-", vec![Expr::int(0), e]),
                    },
                }
            }
            sql::Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(self.resolve(expr, scope, outer)?),
                negated: *negated,
            },
            sql::Expr::InList { expr, list, negated } => Expr::InList {
                expr: Box::new(self.resolve(expr, scope, outer)?),
                list: list
                    .iter()
                    .map(|e| self.resolve(e, scope, outer))
                    .collect::<PlanResult<Vec<_>>>()?,
                negated: *negated,
            },
            sql::Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let e = self.resolve(expr, scope, outer)?;
                let range = Expr::and(vec![
                    Expr::compare(e.clone(), CompareOp::GtEq, self.resolve(low, scope, outer)?),
                    Expr::compare(e, CompareOp::LtEq, self.resolve(high, scope, outer)?),
                ]);
                if *negated {
                    Expr::Not(Box::new(range))
                } else {
                    range
                }
            }
            sql::Expr::Function { name, args, distinct } => {
                let resolved = args
                    .iter()
                    .map(|a| self.resolve(a, scope, outer))
                    .collect::<PlanResult<Vec<_>>>()?;
                match AggregateFunction::from_name(name) {
                    Some(function) => {
                        if resolved.iter().any(|a| a.contains_aggregate()) {
                            return Err(PlanError::Unresolved(format!("nested aggregate in {}", name)));
                        }
                        Expr::Aggregate {
                            function,
                            arg: resolved.into_iter().next().map(Box::new),
                            distinct: *distinct,
                        }
                    }
                    None => Expr::function(name.to_lowercase(), resolved),
                }
            }
        })
    }
}

fn literal(lit: &LiteralValue) -> Value {
    match lit {
        LiteralValue::Null => Value::Null,
        LiteralValue::Boolean(b) => Value::Boolean(*b),
        LiteralValue::Integer(i) => Value::Integer(*i),
        LiteralValue::Float(f) => Value::Float(*f),
        LiteralValue::String(s) => Value::String(s.clone()),
    }
}

/// Every column outside an aggregate must be a grouping expression.
fn check_grouped(expr: &Expr, group_cols: &[Expr]) -> PlanResult<()> {
    if group_cols.contains(expr) {
        return Ok(());
    }
    match expr {
        Expr::Aggregate { .. } => Ok(()),
        Expr::Column(sym) => Err(PlanError::Unresolved(format!(
            "column {} must appear in GROUP BY or an aggregate",
            sym
        ))),
        other => other.children().into_iter().try_for_each(|c| check_grouped(c, group_cols)),
    }
}
