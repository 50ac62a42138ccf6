//! SQL parser implementation.
//!
//! Converts SQL strings to our internal AST using sqlparser.

use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::ast::*;
use super::error::{ParseError, ParseResult};

/// SQL parser for fedplan.
pub struct Parser;

impl Parser {
    /// Parse a SQL string into a statement.
    pub fn parse(sql: &str) -> ParseResult<Statement> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(ParseError::EmptyQuery);
        }

        let dialect = GenericDialect {};
        let statements = SqlParser::parse_sql(&dialect, sql)?;

        if statements.is_empty() {
            return Err(ParseError::EmptyQuery);
        }
        if statements.len() > 1 {
            return Err(ParseError::MultipleStatements(statements.len()));
        }

        Converter::default().convert_statement(&statements[0])
    }
}

/// Conversion state; numbers `?` placeholders in order of appearance.
#[derive(Default)]
struct Converter {
    next_param: usize,
}

impl Converter {
    fn convert_statement(&mut self, stmt: &sp::Statement) -> ParseResult<Statement> {
        match stmt {
            sp::Statement::Query(query) => Ok(Statement::Query(self.convert_query(query)?)),
            sp::Statement::Insert(insert) => self.convert_insert(insert),
            other => Err(ParseError::UnsupportedStatement(format!("{:?}", other))),
        }
    }

    fn convert_query(&mut self, query: &sp::Query) -> ParseResult<Query> {
        if query.with.is_some() {
            return Err(ParseError::UnsupportedStatement("WITH clause".into()));
        }
        let body = self.convert_set_expr(&query.body)?;

        // ORDER BY
        let order_by = match &query.order_by {
            Some(ob) => self.extract_order_by_exprs(ob)?,
            None => vec![],
        };

        // LIMIT
        let limit = query.limit.as_ref().map(|l| self.convert_expr(l)).transpose()?;

        // OFFSET
        let offset = query
            .offset
            .as_ref()
            .map(|o| self.convert_expr(&o.value))
            .transpose()?;

        Ok(Query {
            body,
            order_by,
            limit,
            offset,
        })
    }

    fn convert_set_expr(&mut self, body: &sp::SetExpr) -> ParseResult<QueryBody> {
        match body {
            sp::SetExpr::Select(select) => Ok(QueryBody::Select(Box::new(self.convert_select(select)?))),
            sp::SetExpr::Query(query) => Ok(QueryBody::Nested(Box::new(self.convert_query(query)?))),
            sp::SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let op = match op {
                    sp::SetOperator::Union => SetOperator::Union,
                    sp::SetOperator::Intersect => SetOperator::Intersect,
                    sp::SetOperator::Except => SetOperator::Except,
                    other => {
                        return Err(ParseError::UnsupportedStatement(format!(
                            "set operator {:?}",
                            other
                        )))
                    }
                };
                let all = match set_quantifier {
                    sp::SetQuantifier::All => true,
                    sp::SetQuantifier::Distinct | sp::SetQuantifier::None => false,
                    other => {
                        return Err(ParseError::UnsupportedStatement(format!(
                            "set quantifier {:?}",
                            other
                        )))
                    }
                };
                Ok(QueryBody::SetOperation {
                    op,
                    all,
                    left: Box::new(self.convert_set_expr(left)?),
                    right: Box::new(self.convert_set_expr(right)?),
                })
            }
            other => Err(ParseError::UnsupportedStatement(format!(
                "Unsupported query type: {:?}",
                other
            ))),
        }
    }

    fn convert_select(&mut self, select: &sp::Select) -> ParseResult<Select> {
        let distinct = match &select.distinct {
            None => false,
            Some(sp::Distinct::Distinct) => true,
            Some(other) => {
                return Err(ParseError::UnsupportedStatement(format!("{:?}", other)));
            }
        };

        // FROM clause
        let from = select
            .from
            .iter()
            .map(|t| self.convert_table_with_joins(t))
            .collect::<ParseResult<Vec<_>>>()?;

        // SELECT columns
        let columns = self.convert_projection(&select.projection)?;

        // WHERE clause
        let where_clause = select
            .selection
            .as_ref()
            .map(|e| self.convert_expr(e))
            .transpose()?;

        let group_by = match &select.group_by {
            sp::GroupByExpr::Expressions(exprs, _) => exprs
                .iter()
                .map(|e| self.convert_expr(e))
                .collect::<ParseResult<Vec<_>>>()?,
            sp::GroupByExpr::All(_) => {
                return Err(ParseError::UnsupportedExpression("GROUP BY ALL".into()));
            }
        };

        let having = select.having.as_ref().map(|e| self.convert_expr(e)).transpose()?;

        Ok(Select {
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
        })
    }

    fn convert_table_with_joins(&mut self, table: &sp::TableWithJoins) -> ParseResult<TableRef> {
        let mut current = self.convert_table_factor(&table.relation)?;
        for join in &table.joins {
            let right = self.convert_table_factor(&join.relation)?;
            let (kind, constraint) = match &join.join_operator {
                sp::JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
                sp::JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
                sp::JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
                sp::JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
                other => {
                    return Err(ParseError::UnsupportedStatement(format!(
                        "join operator {:?}",
                        other
                    )))
                }
            };
            let on = match constraint {
                Some(sp::JoinConstraint::On(expr)) => Some(self.convert_expr(expr)?),
                Some(sp::JoinConstraint::None) | None => None,
                Some(other) => {
                    return Err(ParseError::UnsupportedStatement(format!(
                        "join constraint {:?}",
                        other
                    )))
                }
            };
            let kind = if kind == JoinKind::Inner && on.is_none() {
                JoinKind::Cross
            } else {
                kind
            };
            current = TableRef::Join {
                left: Box::new(current),
                right: Box::new(right),
                kind,
                on,
            };
        }
        Ok(current)
    }

    fn convert_table_factor(&mut self, factor: &sp::TableFactor) -> ParseResult<TableRef> {
        match factor {
            sp::TableFactor::Table { name, alias, .. } => Ok(TableRef::Table {
                name: extract_table_name(name)?,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            }),
            sp::TableFactor::Derived {
                lateral,
                subquery,
                alias,
                ..
            } => {
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .ok_or(ParseError::MissingAlias)?;
                Ok(TableRef::Derived {
                    subquery: Box::new(self.convert_query(subquery)?),
                    alias,
                    lateral: *lateral,
                })
            }
            sp::TableFactor::NestedJoin {
                table_with_joins,
                alias: None,
                ..
            } => self.convert_table_with_joins(table_with_joins),
            other => Err(ParseError::UnsupportedStatement(format!(
                "Unsupported FROM clause: {:?}",
                other
            ))),
        }
    }

    fn convert_projection(&mut self, items: &[sp::SelectItem]) -> ParseResult<Vec<SelectColumn>> {
        items
            .iter()
            .map(|item| match item {
                sp::SelectItem::Wildcard(_) => Ok(SelectColumn::Wildcard),
                sp::SelectItem::UnnamedExpr(expr) => Ok(SelectColumn::Expr {
                    expr: self.convert_expr(expr)?,
                    alias: None,
                }),
                sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectColumn::Expr {
                    expr: self.convert_expr(expr)?,
                    alias: Some(alias.value.clone()),
                }),
                sp::SelectItem::QualifiedWildcard(name, _) => {
                    let text = name.to_string();
                    let text = text.trim_end_matches(".*");
                    let table = text.rsplit('.').next().unwrap_or(text).to_string();
                    Ok(SelectColumn::QualifiedWildcard(table))
                }
            })
            .collect()
    }

    fn extract_order_by_exprs(&mut self, ob: &sp::OrderBy) -> ParseResult<Vec<OrderBy>> {
        match &ob.kind {
            sp::OrderByKind::All(_) => Err(ParseError::UnsupportedExpression("ORDER BY ALL".into())),
            sp::OrderByKind::Expressions(exprs) => exprs
                .iter()
                .map(|e| {
                    Ok(OrderBy {
                        expr: self.convert_expr(&e.expr)?,
                        ascending: e.options.asc.unwrap_or(true),
                    })
                })
                .collect(),
        }
    }

    fn convert_insert(&mut self, insert: &sp::Insert) -> ParseResult<Statement> {
        let table = match &insert.table {
            sp::TableObject::TableName(name) => extract_table_name(name)?,
            sp::TableObject::TableFunction(_) => {
                return Err(ParseError::UnsupportedStatement("table function not supported".into()))
            }
        };

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.iter().map(|c| c.value.clone()).collect())
        };

        let source = match insert.source.as_deref() {
            Some(query) if !matches!(query.body.as_ref(), sp::SetExpr::Values(_)) => {
                self.convert_query(query)?
            }
            _ => {
                return Err(ParseError::UnsupportedStatement(
                    "only INSERT ... SELECT is supported".into(),
                ))
            }
        };

        Ok(Statement::Insert(Insert {
            table,
            columns,
            source: Box::new(source),
        }))
    }

    fn convert_expr(&mut self, expr: &sp::Expr) -> ParseResult<Expr> {
        match expr {
            sp::Expr::Identifier(id) => Ok(Expr::column(id.value.clone())),

            sp::Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [table, column] => Ok(Expr::Column {
                    table: Some(table.value.clone()),
                    name: column.value.clone(),
                }),
                _ => Err(ParseError::InvalidIdentifier(
                    parts.iter().map(|p| p.value.as_str()).collect::<Vec<_>>().join("."),
                )),
            },

            sp::Expr::Value(v) => self.convert_value(v),

            sp::Expr::BinaryOp { left, op, right } => {
                let l = self.convert_expr(left)?;
                let r = self.convert_expr(right)?;
                let o = convert_binary_op(op)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(l),
                    op: o,
                    right: Box::new(r),
                })
            }

            sp::Expr::UnaryOp { op, expr } => {
                let e = self.convert_expr(expr)?;
                let o = convert_unary_op(op)?;
                Ok(Expr::UnaryOp {
                    op: o,
                    expr: Box::new(e),
                })
            }

            sp::Expr::IsNull(e) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(e)?),
                negated: false,
            }),

            sp::Expr::IsNotNull(e) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(e)?),
                negated: true,
            }),

            sp::Expr::InList { expr, list, negated } => {
                let e = self.convert_expr(expr)?;
                let items = list
                    .iter()
                    .map(|i| self.convert_expr(i))
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(Expr::InList {
                    expr: Box::new(e),
                    list: items,
                    negated: *negated,
                })
            }

            sp::Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Ok(Expr::Between {
                expr: Box::new(self.convert_expr(expr)?),
                low: Box::new(self.convert_expr(low)?),
                high: Box::new(self.convert_expr(high)?),
                negated: *negated,
            }),

            sp::Expr::Function(f) => {
                let name = f.name.to_string().to_lowercase();
                let (args, distinct) = match &f.args {
                    sp::FunctionArguments::List(list) => {
                        let distinct = matches!(
                            list.duplicate_treatment,
                            Some(sp::DuplicateTreatment::Distinct)
                        );
                        let mut args = Vec::new();
                        for arg in &list.args {
                            match arg {
                                sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => {
                                    args.push(self.convert_expr(e)?)
                                }
                                sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => {}
                                other => {
                                    return Err(ParseError::UnsupportedExpression(format!(
                                        "function argument {:?}",
                                        other
                                    )))
                                }
                            }
                        }
                        (args, distinct)
                    }
                    _ => (vec![], false),
                };
                Ok(Expr::Function { name, args, distinct })
            }

            sp::Expr::Nested(inner) => Ok(Expr::Nested(Box::new(self.convert_expr(inner)?))),

            other => Err(ParseError::UnsupportedExpression(format!("{:?}", other))),
        }
    }

    fn convert_value(&mut self, v: &sp::ValueWithSpan) -> ParseResult<Expr> {
        let lit = match &v.value {
            sp::Value::Null => LiteralValue::Null,
            sp::Value::Boolean(b) => LiteralValue::Boolean(*b),
            sp::Value::Number(s, _) => {
                if let Ok(i) = s.parse::<i64>() {
                    LiteralValue::Integer(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    LiteralValue::Float(f)
                } else {
                    return Err(ParseError::UnsupportedExpression(format!("Invalid number: {}", s)));
                }
            }
            sp::Value::SingleQuotedString(s) => LiteralValue::String(s.clone()),
            sp::Value::DoubleQuotedString(s) => LiteralValue::String(s.clone()),
            sp::Value::Placeholder(p) => return self.convert_placeholder(p),
            other => {
                return Err(ParseError::UnsupportedExpression(format!(
                    "Unsupported value: {:?}",
                    other
                )))
            }
        };
        Ok(Expr::Literal(lit))
    }

    fn convert_placeholder(&mut self, p: &str) -> ParseResult<Expr> {
        let index = match p.strip_prefix('$') {
            Some(n) => n
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(|n| n - 1)
                .ok_or_else(|| ParseError::InvalidParameter(p.to_string()))?,
            None => {
                let i = self.next_param;
                self.next_param += 1;
                i
            }
        };
        Ok(Expr::Parameter(index))
    }
}

fn convert_binary_op(op: &sp::BinaryOperator) -> ParseResult<BinaryOperator> {
    match op {
        sp::BinaryOperator::Eq => Ok(BinaryOperator::Eq),
        sp::BinaryOperator::NotEq => Ok(BinaryOperator::NotEq),
        sp::BinaryOperator::Lt => Ok(BinaryOperator::Lt),
        sp::BinaryOperator::LtEq => Ok(BinaryOperator::LtEq),
        sp::BinaryOperator::Gt => Ok(BinaryOperator::Gt),
        sp::BinaryOperator::GtEq => Ok(BinaryOperator::GtEq),
        sp::BinaryOperator::And => Ok(BinaryOperator::And),
        sp::BinaryOperator::Or => Ok(BinaryOperator::Or),
        sp::BinaryOperator::Plus => Ok(BinaryOperator::Plus),
        sp::BinaryOperator::Minus => Ok(BinaryOperator::Minus),
        sp::BinaryOperator::Multiply => Ok(BinaryOperator::Multiply),
        sp::BinaryOperator::Divide => Ok(BinaryOperator::Divide),
        sp::BinaryOperator::Modulo => Ok(BinaryOperator::Modulo),
        sp::BinaryOperator::StringConcat => Ok(BinaryOperator::Concat),
        other => Err(ParseError::UnsupportedExpression(format!(
            "Unsupported operator: {:?}",
            other
        ))),
    }
}

fn convert_unary_op(op: &sp::UnaryOperator) -> ParseResult<UnaryOperator> {
    match op {
        sp::UnaryOperator::Not => Ok(UnaryOperator::Not),
        sp::UnaryOperator::Minus => Ok(UnaryOperator::Minus),
        sp::UnaryOperator::Plus => Ok(UnaryOperator::Plus),
        other => Err(ParseError::UnsupportedExpression(format!(
            "Unsupported unary operator: {:?}",
            other
        ))),
    }
}

fn extract_table_name(name: &sp::ObjectName) -> ParseResult<String> {
    // Tables are cataloged by bare name; a model prefix such as `pg.orders` is dropped.
    name.0
        .last()
        .map(|i| i.as_ident().map(|id| id.value.clone()).unwrap_or_else(|| i.to_string()))
        .ok_or_else(|| ParseError::InvalidIdentifier("empty table name".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_query(sql: &str) -> Query {
        match Parser::parse(sql).unwrap() {
            Statement::Query(q) => q,
            other => panic!("Expected Query, got {:?}", other),
        }
    }

    fn parse_select(sql: &str) -> Select {
        match parse_query(sql).body {
            QueryBody::Select(s) => *s,
            other => panic!("Expected Select, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_outer_join_to_union_view() {
        let s = parse_select(
            "SELECT * FROM pg.orders o LEFT OUTER JOIN \
             (SELECT id FROM customers UNION ALL SELECT id FROM archive) c ON o.customer_id = c.id",
        );
        assert!(matches!(&s.columns[..], [SelectColumn::Wildcard]));
        let [TableRef::Join { left, right, kind: JoinKind::Left, on: Some(_) }] = &s.from[..] else {
            panic!("expected one outer join, got {:?}", s.from);
        };
        assert!(matches!(&**left, TableRef::Table { name, alias: Some(a) } if name == "orders" && a == "o"));
        let TableRef::Derived { subquery, alias, lateral: false } = &**right else {
            panic!("expected a derived table, got {:?}", right);
        };
        assert_eq!(alias, "c");
        assert!(matches!(
            subquery.body,
            QueryBody::SetOperation { op: SetOperator::Union, all: true, .. }
        ));
    }

    #[test]
    fn test_parse_qualified_columns() {
        let s = parse_select("SELECT u.id, name AS n FROM users u");
        assert!(matches!(
            &s.columns[0],
            SelectColumn::Expr { expr: Expr::Column { table: Some(t), name }, alias: None }
                if t == "u" && name == "id"
        ));
        assert!(matches!(&s.columns[1], SelectColumn::Expr { alias: Some(a), .. } if a == "n"));
        assert!(matches!(&s.from[0], TableRef::Table { alias: Some(a), .. } if a == "u"));
    }

    #[test]
    fn test_parse_joins() {
        let s = parse_select(
            "SELECT * FROM a LEFT OUTER JOIN b ON a.id = b.id INNER JOIN c ON b.id = c.id",
        );
        match &s.from[0] {
            TableRef::Join { left, kind, on, .. } => {
                assert_eq!(*kind, JoinKind::Inner);
                assert!(on.is_some());
                assert!(matches!(left.as_ref(), TableRef::Join { kind: JoinKind::Left, .. }));
            }
            other => panic!("Expected Join, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_comma_join() {
        let s = parse_select("SELECT * FROM a, b WHERE a.id = b.id");
        assert_eq!(s.from.len(), 2);
    }

    #[test]
    fn test_parse_derived_lateral() {
        let s = parse_select("SELECT * FROM a, LATERAL (SELECT b.x FROM b WHERE b.id = a.id) v");
        assert!(matches!(&s.from[1], TableRef::Derived { lateral: true, alias, .. } if alias == "v"));
    }

    #[test]
    fn test_parse_union_all() {
        let q = parse_query("SELECT x FROM a UNION ALL SELECT y FROM b ORDER BY x LIMIT 3");
        assert!(matches!(
            q.body,
            QueryBody::SetOperation { op: SetOperator::Union, all: true, .. }
        ));
        assert_eq!(q.order_by.len(), 1);
        assert_eq!(q.limit, Some(Expr::Literal(LiteralValue::Integer(3))));
    }

    #[test]
    fn test_parse_group_by_having() {
        let s = parse_select("SELECT k, COUNT(*) FROM t GROUP BY k HAVING COUNT(*) > 1");
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
        assert!(matches!(
            &s.columns[1],
            SelectColumn::Expr { expr: Expr::Function { name, args, .. }, .. } if name == "count" && args.is_empty()
        ));
    }

    #[test]
    fn test_parse_limit_placeholders() {
        let q = parse_query("SELECT * FROM t LIMIT ? OFFSET ?");
        assert_eq!(q.limit, Some(Expr::Parameter(0)));
        assert_eq!(q.offset, Some(Expr::Parameter(1)));
    }

    #[test]
    fn test_parse_insert_select() {
        match Parser::parse("INSERT INTO t (a, b) SELECT x, y FROM s").unwrap() {
            Statement::Insert(i) => {
                assert_eq!(i.table, "t");
                assert_eq!(i.columns, Some(vec!["a".into(), "b".into()]));
            }
            other => panic!("Expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn test_insert_values_rejected() {
        assert!(matches!(
            Parser::parse("INSERT INTO t VALUES (1)"),
            Err(ParseError::UnsupportedStatement(_))
        ));
    }

    #[test]
    fn test_parse_between() {
        let s = parse_select("SELECT * FROM users WHERE age BETWEEN 18 AND 65");
        assert!(matches!(s.where_clause, Some(Expr::Between { negated: false, .. })));
    }

    #[test]
    fn test_empty_query() {
        assert!(matches!(Parser::parse("").unwrap_err(), ParseError::EmptyQuery));
        assert!(matches!(Parser::parse("   ").unwrap_err(), ParseError::EmptyQuery));
        assert!(matches!(
            Parser::parse("SELECT 1; SELECT 2").unwrap_err(),
            ParseError::MultipleStatements(2)
        ));
    }

    #[test]
    fn test_parameter_numbering_starts_at_one() {
        assert_eq!(
            Parser::parse("SELECT a FROM t1 WHERE a = $0").unwrap_err(),
            ParseError::InvalidParameter("$0".into())
        );
    }
}
