//! Value-level evaluation with SQL NULL semantics.

use std::cmp::Ordering;

use super::error::{EvalError, EvalResult};
use super::{AggregateFunction, CompareOp, Expr, TriBool, Value};

/// Compare two values. `None` when either side is NULL.
pub fn compare_values(left: &Value, right: &Value) -> EvalResult<Option<Ordering>> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::Integer(a), Value::Integer(b)) => Ok(Some(a.cmp(b))),
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Some(a.cmp(b))),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Some(x.total_cmp(&y))),
            _ => Err(EvalError::TypeMismatch {
                expected: a.data_type().to_string(),
                actual: b.data_type().to_string(),
            }),
        },
    }
}

pub fn eval_compare(left: &Value, op: CompareOp, right: &Value) -> EvalResult<TriBool> {
    let ord = match compare_values(left, right)? {
        Some(o) => o,
        None => return Ok(TriBool::Unknown),
    };
    let b = match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::NotEq => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::LtEq => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::GtEq => ord != Ordering::Less,
    };
    Ok(TriBool::from(b))
}

/// `value [NOT] IN (list)` under three-valued logic.
pub fn eval_in_list(value: &Value, list: &[Value], negated: bool) -> EvalResult<TriBool> {
    if value.is_null() {
        return Ok(TriBool::Unknown);
    }
    let mut result = TriBool::False;
    for item in list {
        result = result.or(eval_compare(value, CompareOp::Eq, item)?);
        if result == TriBool::True {
            break;
        }
    }
    Ok(if negated { result.not() } else { result })
}

/// Evaluate a scalar function over constant arguments.
pub fn eval_function(name: &str, args: &[Value]) -> EvalResult<Value> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(EvalError::Arity {
                name: name.to_string(),
                count: args.len(),
            })
        }
    };
    match name {
        "+" | "-" | "*" | "/" | "%" => {
            arity(2)?;
            eval_arithmetic(name, &args[0], &args[1])
        }
        "least" | "greatest" => {
            if args.is_empty() {
                return Err(EvalError::Arity {
                    name: name.to_string(),
                    count: 0,
                });
            }
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let mut best = args[0].clone();
            for v in &args[1..] {
                let ord = compare_values(v, &best)?;
                let better = match name {
                    "least" => ord == Some(Ordering::Less),
                    _ => ord == Some(Ordering::Greater),
                };
                if better {
                    best = v.clone();
                }
            }
            Ok(best)
        }
        "coalesce" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        "abs" => {
            arity(1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Integer(i) => Ok(Value::Integer(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(type_mismatch("numeric", other)),
            }
        }
        "upper" | "lower" | "length" => {
            arity(1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::String(s) => Ok(match name {
                    "upper" => Value::String(s.to_uppercase()),
                    "lower" => Value::String(s.to_lowercase()),
                    _ => Value::Integer(s.chars().count() as i64),
                }),
                other => Err(type_mismatch("string", other)),
            }
        }
        "concat" | "||" => {
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let mut out = String::new();
            for v in args {
                match v {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn type_mismatch(expected: &str, actual: &Value) -> EvalError {
    EvalError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.data_type().to_string(),
    }
}

fn eval_arithmetic(op: &str, left: &Value, right: &Value) -> EvalResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let (a, b) = (*a, *b);
        return match op {
            "+" => Ok(Value::Integer(a.saturating_add(b))),
            "-" => Ok(Value::Integer(a.saturating_sub(b))),
            "*" => Ok(Value::Integer(a.saturating_mul(b))),
            _ if b == 0 => Err(EvalError::DivisionByZero),
            "/" => Ok(Value::Integer(a / b)),
            _ => Ok(Value::Integer(a % b)),
        };
    }
    let a = left.as_f64().ok_or_else(|| type_mismatch("numeric", left))?;
    let b = right.as_f64().ok_or_else(|| type_mismatch("numeric", right))?;
    match op {
        "+" => Ok(Value::Float(a + b)),
        "-" => Ok(Value::Float(a - b)),
        "*" => Ok(Value::Float(a * b)),
        _ if b == 0.0 => Err(EvalError::DivisionByZero),
        "/" => Ok(Value::Float(a / b)),
        _ => Ok(Value::Float(a % b)),
    }
}

/// Evaluate an expression, asking `lookup` first for any sub-expression
/// that is already materialized (columns, aggregates, projected items).
pub fn evaluate(expr: &Expr, lookup: &dyn Fn(&Expr) -> Option<Value>) -> EvalResult<Value> {
    if let Some(v) = lookup(expr) {
        return Ok(v);
    }
    match expr {
        Expr::Column(sym) => Err(EvalError::UnboundColumn(sym.to_string())),
        Expr::Constant { value, .. } => Ok(value.clone()),
        Expr::Parameter { index, .. } => Err(EvalError::Unsupported(format!("unbound parameter ${}", index + 1))),
        Expr::Alias { expr, .. } => evaluate(expr, lookup),
        Expr::Compare { left, op, right } => {
            let l = evaluate(left, lookup)?;
            let r = evaluate(right, lookup)?;
            Ok(eval_compare(&l, *op, &r)?.to_value())
        }
        Expr::IsNull { expr, negated } => {
            let v = evaluate(expr, lookup)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        Expr::InList { expr, list, negated } => {
            let v = evaluate(expr, lookup)?;
            let items = list
                .iter()
                .map(|e| evaluate(e, lookup))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(eval_in_list(&v, &items, *negated)?.to_value())
        }
        // A runtime filter never removes rows that could join.
        Expr::DependentIn { .. } => Ok(Value::Boolean(true)),
        Expr::And(parts) => {
            let mut acc = TriBool::True;
            for p in parts {
                acc = acc.and(truth(&evaluate(p, lookup)?)?);
                if acc == TriBool::False {
                    break;
                }
            }
            Ok(acc.to_value())
        }
        Expr::Or(parts) => {
            let mut acc = TriBool::False;
            for p in parts {
                acc = acc.or(truth(&evaluate(p, lookup)?)?);
                if acc == TriBool::True {
                    break;
                }
            }
            Ok(acc.to_value())
        }
        Expr::Not(e) => Ok(truth(&evaluate(e, lookup)?)?.not().to_value()),
        Expr::Function { name, args } => {
            let values = args
                .iter()
                .map(|e| evaluate(e, lookup))
                .collect::<EvalResult<Vec<_>>>()?;
            eval_function(name, &values)
        }
        Expr::Aggregate { .. } => Err(EvalError::Unsupported(format!("aggregate outside grouping: {}", expr))),
    }
}

/// Interpret a value as a truth value.
pub fn truth(value: &Value) -> EvalResult<TriBool> {
    TriBool::from_value(value).ok_or_else(|| type_mismatch("boolean", value))
}

/// Fold an aggregate over a column of values.
pub fn eval_aggregate(function: AggregateFunction, values: &[Value], count_star: bool) -> EvalResult<Value> {
    let non_null: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    match function {
        AggregateFunction::Count => Ok(Value::Integer(if count_star {
            values.len() as i64
        } else {
            non_null.len() as i64
        })),
        AggregateFunction::Sum | AggregateFunction::Avg => {
            if non_null.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = Value::Integer(0);
            for v in &non_null {
                sum = eval_arithmetic("+", &sum, v)?;
            }
            if function == AggregateFunction::Sum {
                return Ok(sum);
            }
            let total = sum.as_f64().ok_or_else(|| type_mismatch("numeric", &sum))?;
            Ok(Value::Float(total / non_null.len() as f64))
        }
        AggregateFunction::Min | AggregateFunction::Max => {
            let mut best: Option<&Value> = None;
            for v in non_null {
                best = match best {
                    None => Some(v),
                    Some(b) => {
                        let ord = compare_values(v, b)?;
                        let replace = match function {
                            AggregateFunction::Min => ord == Some(Ordering::Less),
                            _ => ord == Some(Ordering::Greater),
                        };
                        if replace {
                            Some(v)
                        } else {
                            Some(b)
                        }
                    }
                };
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_null_is_unknown() {
        assert_eq!(
            eval_compare(&Value::Null, CompareOp::Eq, &Value::Integer(1)).unwrap(),
            TriBool::Unknown
        );
        assert_eq!(
            eval_compare(&Value::Integer(1), CompareOp::Lt, &Value::Float(1.5)).unwrap(),
            TriBool::True
        );
    }

    #[test]
    fn test_compare_type_mismatch() {
        assert!(matches!(
            eval_compare(&Value::from("a"), CompareOp::Eq, &Value::Integer(1)),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_in_list_with_null_item() {
        let list = vec![Value::Integer(1), Value::Null];
        assert_eq!(eval_in_list(&Value::Integer(1), &list, false).unwrap(), TriBool::True);
        assert_eq!(eval_in_list(&Value::Integer(2), &list, false).unwrap(), TriBool::Unknown);
        assert_eq!(eval_in_list(&Value::Integer(2), &list, true).unwrap(), TriBool::Unknown);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            eval_function("+", &[Value::Integer(2), Value::Integer(3)]).unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            eval_function("-", &[Value::Integer(2), Value::Null]).unwrap(),
            Value::Null
        );
        assert_eq!(
            eval_function("/", &[Value::Integer(1), Value::Integer(0)]),
            Err(EvalError::DivisionByZero)
        );
        assert_eq!(
            eval_function("least", &[Value::Integer(7), Value::Integer(3)]).unwrap(),
            Value::Integer(3)
        );
    }

    #[test]
    fn test_aggregates() {
        let vals = vec![Value::Integer(3), Value::Null, Value::Integer(1)];
        assert_eq!(eval_aggregate(AggregateFunction::Count, &vals, true).unwrap(), Value::Integer(3));
        assert_eq!(eval_aggregate(AggregateFunction::Count, &vals, false).unwrap(), Value::Integer(2));
        assert_eq!(eval_aggregate(AggregateFunction::Sum, &vals, false).unwrap(), Value::Integer(4));
        assert_eq!(eval_aggregate(AggregateFunction::Min, &vals, false).unwrap(), Value::Integer(1));
        assert_eq!(eval_aggregate(AggregateFunction::Max, &[], false).unwrap(), Value::Null);
    }
}
