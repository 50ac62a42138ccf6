//! Test fixtures and a reference interpreter for plan trees.
//!
//! The interpreter executes any plan, before or after optimization, over
//! in-memory rows. Rows are positional and aligned with the expressions a
//! node produces; parents find a value either by structural match against
//! those expressions or by evaluating over them.

use std::collections::HashMap;

use crate::expr::eval::{eval_aggregate, evaluate, truth};
use crate::expr::{ConstantSimplifier, EvalError, EvalResult, Expr, TriBool, Value};
use crate::metadata::{InMemoryCatalog, SourceCapabilities, TableDef};
use crate::planner::rules::{Rule, RuleStack};
use crate::planner::{
    AliasGenerator, NodeId, NodeKind, Operator, PlanBuilder, PlanResult, PlanTree, PlannerConfig, RuleContext,
    SetOperation,
};
use crate::expr::DataType::{Integer, String as Text};
use crate::planner::props::JoinType;
use crate::sql::{Parser, Statement};

/// Models and tables used across the planner tests.
pub(crate) fn fixture_catalog() -> InMemoryCatalog {
    let shared = SourceCapabilities {
        connector: Some("pg-main".into()),
        ..SourceCapabilities::full()
    };
    let api = SourceCapabilities {
        supports_criteria: true,
        requires_criteria: true,
        ..SourceCapabilities::default()
    };
    let ordered = SourceCapabilities {
        supports_criteria: true,
        supports_order_by: true,
        ..SourceCapabilities::default()
    };
    let limited = SourceCapabilities {
        supports_row_limit: true,
        ..SourceCapabilities::default()
    };
    InMemoryCatalog::new()
        .with_model("pg", shared.clone())
        .with_model("pg_replica", shared)
        .with_model("files", SourceCapabilities::default())
        .with_model("api", api)
        .with_model("ordered", ordered)
        .with_model("limited", limited)
        .with_table(
            TableDef::new("orders", "pg")
                .column("id", Integer)
                .column("customer_id", Integer)
                .column("amount", Integer)
                .column("status", Text)
                .key(&["id"])
                .cardinality(10_000.0),
        )
        .with_table(
            TableDef::new("customers", "pg")
                .column("id", Integer)
                .column("name", Text)
                .column("region", Text)
                .key(&["id"])
                .function_index("upper", "name")
                .cardinality(100.0),
        )
        .with_table(
            TableDef::new("items", "files")
                .column("id", Integer)
                .column("order_id", Integer)
                .column("qty", Integer)
                .cardinality(50_000.0),
        )
        .with_table(
            TableDef::new("lookup", "api")
                .column("code", Integer)
                .column("label", Text)
                .access_pattern(&["code"])
                .make_dependent()
                .cardinality(1_000.0),
        )
        .with_table(TableDef::new("audit", "api").column("id", Integer).column("note", Text))
        .with_table(
            TableDef::new("events", "ordered")
                .column("id", Integer)
                .column("kind", Text)
                .cardinality(5_000.0),
        )
        .with_table(
            TableDef::new("feed", "limited")
                .column("id", Integer)
                .column("payload", Text),
        )
        .with_table(TableDef::new("archive", "pg").column("id", Integer).column("amount", Integer))
        .with_table(TableDef::new("t1", "pg").column("a", Integer).column("b", Integer).cardinality(100.0))
        .with_table(TableDef::new("t2", "files").column("a", Integer).column("b", Integer).cardinality(100.0))
        .with_table(TableDef::new("t3", "pg_replica").column("a", Integer).column("b", Integer))
}

pub(crate) fn parse(sql: &str) -> Statement {
    Parser::parse(sql).unwrap_or_else(|e| panic!("failed to parse {}: {}", sql, e))
}

/// Canonical plan for `sql` over the fixture catalog.
pub(crate) fn build(sql: &str) -> PlanTree {
    let catalog = fixture_catalog();
    PlanBuilder::new(&catalog)
        .build(&parse(sql))
        .unwrap_or_else(|e| panic!("failed to build {}: {}", sql, e))
}

/// Run `rules` (first listed runs first) and every follow-up they schedule.
/// Returns the rules executed.
pub(crate) fn apply_rules(tree: &mut PlanTree, rules: &[Rule]) -> PlanResult<Vec<Rule>> {
    apply_rules_with(tree, rules, &PlannerConfig::default())
}

pub(crate) fn apply_rules_with(tree: &mut PlanTree, rules: &[Rule], config: &PlannerConfig) -> PlanResult<Vec<Rule>> {
    let catalog = fixture_catalog();
    let mut ctx = RuleContext::new(&catalog, &catalog, &ConstantSimplifier, config);
    ctx.aliases = AliasGenerator::for_plan(tree);
    let mut stack = RuleStack::new();
    for rule in rules {
        stack.add_last(*rule);
    }
    let mut executed = Vec::new();
    while let Some(rule) = stack.pop() {
        rule.implementation().execute(tree, &mut stack, &mut ctx)?;
        executed.push(rule);
        assert!(executed.len() < 1_000, "rules did not converge");
    }
    Ok(executed)
}

pub(crate) fn count(tree: &PlanTree, kind: NodeKind) -> usize {
    tree.find_all(kind).len()
}

// ---------------------------------------------------------------
// Reference interpreter
// ---------------------------------------------------------------

/// Rows of each physical table, in catalog column order.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestData {
    tables: HashMap<String, Vec<Vec<Value>>>,
}

impl TestData {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_table(mut self, name: &str, rows: Vec<Vec<Value>>) -> Self {
        self.tables.insert(name.to_lowercase(), rows);
        self
    }

    /// Small integer rows for the generic test tables.
    pub(crate) fn ints(mut self, name: &str, rows: &[(Option<i64>, Option<i64>)]) -> Self {
        let to_value = |v: &Option<i64>| v.map(Value::Integer).unwrap_or(Value::Null);
        self.tables.insert(
            name.to_lowercase(),
            rows.iter().map(|(a, b)| vec![to_value(a), to_value(b)]).collect(),
        );
        self
    }
}

/// Rows produced by a plan.
#[derive(Debug, Clone)]
pub(crate) struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Rows in a canonical order, for bag comparison.
    pub(crate) fn sorted(&self) -> Vec<Vec<Value>> {
        let mut rows = self.rows.clone();
        rows.sort();
        rows
    }
}

struct Rows {
    cols: Vec<Expr>,
    rows: Vec<Vec<Value>>,
}

type Bindings = Vec<(Expr, Value)>;

pub(crate) fn execute(tree: &PlanTree, data: &TestData) -> EvalResult<ResultSet> {
    let out = exec(tree, tree.root(), data, &Vec::new())?;
    Ok(ResultSet {
        columns: out.cols.iter().map(|c| c.output_name()).collect(),
        rows: out.rows,
    })
}

fn eval_row(expr: &Expr, cols: &[Expr], row: &[Value], outer: &Bindings) -> EvalResult<Value> {
    let lookup = |e: &Expr| -> Option<Value> {
        cols.iter()
            .position(|c| c == e || c.unalias() == e)
            .map(|i| row[i].clone())
            .or_else(|| outer.iter().find(|(c, _)| c == e).map(|(_, v)| v.clone()))
    };
    evaluate(expr, &lookup)
}

fn accepts(criteria: &Expr, cols: &[Expr], row: &[Value], outer: &Bindings) -> EvalResult<bool> {
    Ok(truth(&eval_row(criteria, cols, row, outer)?)? == TriBool::True)
}

fn has_correlated_source(tree: &PlanTree, id: NodeId) -> bool {
    tree.preorder(id)
        .into_iter()
        .any(|n| tree.source(n).is_some_and(|s| !s.correlated.is_empty()))
}

fn dedup(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut out: Vec<Vec<Value>> = Vec::new();
    for r in rows {
        if !out.contains(&r) {
            out.push(r);
        }
    }
    out
}

fn limit_value(expr: &Option<Expr>) -> EvalResult<Option<usize>> {
    match expr {
        None => Ok(None),
        Some(e) => {
            let v = evaluate(e, &|_| None)?;
            let n = v.as_i64().ok_or_else(|| EvalError::Unsupported(format!("row limit {}", v)))?;
            Ok(Some(n.max(0) as usize))
        }
    }
}

fn exec(tree: &PlanTree, id: NodeId, data: &TestData, outer: &Bindings) -> EvalResult<Rows> {
    let child = |i: usize| -> EvalResult<Rows> {
        let c = tree
            .child(id, i)
            .ok_or_else(|| EvalError::Unsupported(format!("node {} is missing child {}", id, i)))?;
        exec(tree, c, data, outer)
    };

    match tree.op(id) {
        Operator::Source(props) => {
            if tree.children(id).is_empty() {
                let table = tree
                    .source_group(id)
                    .and_then(|g| g.definition.clone())
                    .unwrap_or_default();
                let rows = data.tables.get(&table.to_lowercase()).cloned().unwrap_or_default();
                return Ok(Rows {
                    cols: tree.node(id).output_cols.clone(),
                    rows,
                });
            }
            let input = child(0)?;
            let map = props
                .symbol_map
                .clone()
                .ok_or_else(|| EvalError::Unsupported("source with children but no symbol map".into()))?;
            let mut rows = Vec::new();
            for row in &input.rows {
                rows.push(
                    map.values()
                        .iter()
                        .map(|v| eval_row(v, &input.cols, row, outer))
                        .collect::<EvalResult<Vec<_>>>()?,
                );
            }
            Ok(Rows {
                cols: map.keys().into_iter().map(Expr::Column).collect(),
                rows,
            })
        }
        Operator::Access(_) => child(0),
        Operator::Null => Ok(Rows {
            cols: tree.node(id).output_cols.clone(),
            rows: Vec::new(),
        }),
        Operator::Select(props) => {
            let input = child(0)?;
            let mut rows = Vec::new();
            for row in input.rows {
                if accepts(&props.criteria, &input.cols, &row, outer)? {
                    rows.push(row);
                }
            }
            Ok(Rows { cols: input.cols, rows })
        }
        Operator::Project(props) => {
            let input = child(0)?;
            let mut rows = Vec::new();
            for row in &input.rows {
                rows.push(
                    props
                        .columns
                        .iter()
                        .map(|c| eval_row(c, &input.cols, row, outer))
                        .collect::<EvalResult<Vec<_>>>()?,
                );
            }
            Ok(Rows {
                cols: props.columns.clone(),
                rows,
            })
        }
        Operator::Group(props) => {
            let input = child(0)?;
            let mut groups: Vec<(Vec<Value>, Vec<Vec<Value>>)> = Vec::new();
            for row in input.rows {
                let key = props
                    .group_cols
                    .iter()
                    .map(|g| eval_row(g, &input.cols, &row, outer))
                    .collect::<EvalResult<Vec<_>>>()?;
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
            if groups.is_empty() && props.group_cols.is_empty() {
                groups.push((Vec::new(), Vec::new()));
            }
            let mut rows = Vec::new();
            for (key, members) in groups {
                let mut out = key;
                for agg in &props.aggregates {
                    let Expr::Aggregate { function, arg, distinct } = agg else {
                        return Err(EvalError::Unsupported(format!("not an aggregate: {}", agg)));
                    };
                    let mut values = Vec::new();
                    for m in &members {
                        values.push(match arg {
                            Some(a) => eval_row(a, &input.cols, m, outer)?,
                            None => Value::Boolean(true),
                        });
                    }
                    if *distinct {
                        values = dedup(values.into_iter().map(|v| vec![v]).collect())
                            .into_iter()
                            .flatten()
                            .collect();
                    }
                    out.push(eval_aggregate(*function, &values, arg.is_none())?);
                }
                rows.push(out);
            }
            Ok(Rows {
                cols: props.group_cols.iter().chain(props.aggregates.iter()).cloned().collect(),
                rows,
            })
        }
        Operator::Sort(props) => {
            let input = child(0)?;
            let mut keyed = Vec::new();
            for row in input.rows {
                let key = props
                    .keys
                    .iter()
                    .map(|k| eval_row(&k.expr, &input.cols, &row, outer))
                    .collect::<EvalResult<Vec<_>>>()?;
                keyed.push((key, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, k) in props.keys.iter().enumerate() {
                    let ord = a[i].cmp(&b[i]);
                    let ord = if k.ascending { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            Ok(Rows {
                cols: input.cols,
                rows: keyed.into_iter().map(|(_, r)| r).collect(),
            })
        }
        Operator::DupRemove => {
            let input = child(0)?;
            Ok(Rows {
                cols: input.cols,
                rows: dedup(input.rows),
            })
        }
        Operator::TupleLimit(props) => {
            let input = child(0)?;
            let offset = limit_value(&props.offset)?.unwrap_or(0);
            let limit = limit_value(&props.limit)?;
            let rows = input
                .rows
                .into_iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            Ok(Rows { cols: input.cols, rows })
        }
        Operator::SetOp(props) => {
            let left = child(0)?;
            let right = child(1)?;
            let rows = match props.op {
                SetOperation::Union => {
                    let all: Vec<Vec<Value>> = left.rows.into_iter().chain(right.rows).collect();
                    if props.all {
                        all
                    } else {
                        dedup(all)
                    }
                }
                SetOperation::Intersect => {
                    let mut remaining = right.rows;
                    let mut out = Vec::new();
                    for r in left.rows {
                        if let Some(pos) = remaining.iter().position(|x| *x == r) {
                            if props.all {
                                remaining.remove(pos);
                            }
                            out.push(r);
                        }
                    }
                    if props.all {
                        out
                    } else {
                        dedup(out)
                    }
                }
                SetOperation::Except => {
                    let mut remaining = right.rows;
                    let mut out = Vec::new();
                    for r in left.rows {
                        match remaining.iter().position(|x| *x == r) {
                            Some(pos) if props.all => {
                                remaining.remove(pos);
                            }
                            Some(_) => {}
                            None => out.push(r),
                        }
                    }
                    if props.all {
                        out
                    } else {
                        dedup(out)
                    }
                }
            };
            Ok(Rows { cols: left.cols, rows })
        }
        Operator::Join(props) => exec_join(tree, id, props.join_type, &props.criteria, data, outer),
    }
}

fn exec_join(
    tree: &PlanTree,
    id: NodeId,
    join_type: JoinType,
    criteria: &[Expr],
    data: &TestData,
    outer: &Bindings,
) -> EvalResult<Rows> {
    let (Some(l), Some(r)) = (tree.child(id, 0), tree.child(id, 1)) else {
        return Err(EvalError::Unsupported(format!("join {} needs two children", id)));
    };
    let left = exec(tree, l, data, outer)?;
    let correlated = has_correlated_source(tree, r);
    let shared_right = if correlated { None } else { Some(exec(tree, r, data, outer)?) };
    let right_cols = match &shared_right {
        Some(rows) => rows.cols.clone(),
        None => tree.output_columns(r),
    };
    let cols: Vec<Expr> = left.cols.iter().chain(right_cols.iter()).cloned().collect();
    let condition = Expr::and(criteria.to_vec());

    let mut rows = Vec::new();
    let mut right_matched: Vec<bool> = shared_right
        .as_ref()
        .map(|rr| vec![false; rr.rows.len()])
        .unwrap_or_default();
    for lrow in &left.rows {
        let per_row;
        let right = match &shared_right {
            Some(rr) => rr,
            None => {
                let mut bindings: Bindings = left.cols.iter().cloned().zip(lrow.iter().cloned()).collect();
                bindings.extend(outer.iter().cloned());
                per_row = exec(tree, r, data, &bindings)?;
                &per_row
            }
        };
        let mut matched = false;
        for (i, rrow) in right.rows.iter().enumerate() {
            let combined: Vec<Value> = lrow.iter().chain(rrow.iter()).cloned().collect();
            if accepts(&condition, &cols, &combined, outer)? {
                matched = true;
                if let Some(m) = right_matched.get_mut(i) {
                    *m = true;
                }
                rows.push(combined);
            }
        }
        if !matched && matches!(join_type, JoinType::LeftOuter | JoinType::FullOuter) {
            rows.push(lrow.iter().cloned().chain(right_cols.iter().map(|_| Value::Null)).collect());
        }
    }
    if matches!(join_type, JoinType::RightOuter | JoinType::FullOuter) {
        if let Some(rr) = &shared_right {
            for (i, rrow) in rr.rows.iter().enumerate() {
                if !right_matched[i] {
                    rows.push(left.cols.iter().map(|_| Value::Null).chain(rrow.iter().cloned()).collect());
                }
            }
        }
    }
    Ok(Rows { cols, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_runs_join() {
        let tree = build("SELECT t1.a, t2.b FROM t1 LEFT OUTER JOIN t2 ON t1.a = t2.a");
        let data = TestData::new()
            .ints("t1", &[(Some(1), Some(1)), (Some(2), None)])
            .ints("t2", &[(Some(1), Some(10))]);
        let result = execute(&tree, &data).unwrap();
        assert_eq!(result.columns, vec!["a", "b"]);
        assert_eq!(
            result.sorted(),
            vec![
                vec![Value::Integer(1), Value::Integer(10)],
                vec![Value::Integer(2), Value::Null]
            ]
        );
    }

    #[test]
    fn test_interpreter_global_aggregate_on_empty_input() {
        let tree = build("SELECT COUNT(*) FROM t1");
        let result = execute(&tree, &TestData::new()).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Integer(0)]]);
    }
}
