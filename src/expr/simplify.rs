//! Constant folding under three-valued logic.

use super::error::EvalResult;
use super::eval::{eval_compare, eval_function, eval_in_list};
use super::{Expr, TriBool, Value};

/// Deterministic constant folding of expressions and criteria.
///
/// A result that is not a constant means "could not be decided"; an `Err`
/// means evaluation itself failed (type mismatch, division by zero).
pub trait ExprSimplifier: Send + Sync {
    /// Fold a value expression.
    fn simplify_expr(&self, expr: &Expr) -> EvalResult<Expr>;

    /// Fold a criteria. Outside of a NOT, UNKNOWN conjuncts and disjuncts
    /// may be treated as FALSE since both reject the row.
    fn simplify_criteria(&self, expr: &Expr) -> EvalResult<Expr>;
}

/// The default folding simplifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantSimplifier;

impl ExprSimplifier for ConstantSimplifier {
    fn simplify_expr(&self, expr: &Expr) -> EvalResult<Expr> {
        fold(expr, false)
    }

    fn simplify_criteria(&self, expr: &Expr) -> EvalResult<Expr> {
        fold(expr, true)
    }
}

fn fold(expr: &Expr, predicate: bool) -> EvalResult<Expr> {
    match expr {
        Expr::Column(_)
        | Expr::Constant { .. }
        | Expr::Parameter { .. }
        | Expr::DependentIn { .. }
        | Expr::Aggregate { .. } => Ok(expr.clone()),

        Expr::Alias { name, expr } => Ok(Expr::alias(name.clone(), fold(expr, false)?)),

        Expr::Compare { left, op, right } => {
            let l = fold(left, false)?;
            let r = fold(right, false)?;
            match (l.as_constant(), r.as_constant()) {
                (Some(a), Some(b)) => Ok(Expr::from_tri(eval_compare(a, *op, b)?)),
                (Some(Value::Null), None) | (None, Some(Value::Null)) => Ok(Expr::unknown()),
                _ => Ok(Expr::compare(l, *op, r)),
            }
        }

        Expr::IsNull { expr, negated } => {
            let e = fold(expr, false)?;
            match e.as_constant() {
                Some(v) => Ok(Expr::boolean(v.is_null() != *negated)),
                None => Ok(Expr::IsNull {
                    expr: Box::new(e),
                    negated: *negated,
                }),
            }
        }

        Expr::InList { expr, list, negated } => {
            let e = fold(expr, false)?;
            let items = list.iter().map(|i| fold(i, false)).collect::<EvalResult<Vec<_>>>()?;
            if e.as_constant().is_some_and(Value::is_null) {
                return Ok(Expr::unknown());
            }
            let values: Option<Vec<Value>> = items.iter().map(|i| i.as_constant().cloned()).collect();
            match (e.as_constant(), values) {
                (Some(v), Some(vals)) => Ok(Expr::from_tri(eval_in_list(v, &vals, *negated)?)),
                _ => Ok(Expr::InList {
                    expr: Box::new(e),
                    list: items,
                    negated: *negated,
                }),
            }
        }

        Expr::Not(inner) => {
            let e = fold(inner, false)?;
            match e.as_tri() {
                Some(t) => Ok(Expr::from_tri(t.not())),
                None => Ok(Expr::Not(Box::new(e))),
            }
        }

        Expr::And(parts) => {
            let mut rest = Vec::new();
            let mut unknown = false;
            for p in parts {
                let f = fold(p, predicate)?;
                match f.as_tri() {
                    Some(TriBool::True) => {}
                    Some(TriBool::False) => return Ok(Expr::boolean(false)),
                    Some(TriBool::Unknown) if predicate => return Ok(Expr::boolean(false)),
                    Some(TriBool::Unknown) => unknown = true,
                    None => rest.push(f),
                }
            }
            if unknown {
                if rest.is_empty() {
                    return Ok(Expr::unknown());
                }
                rest.push(Expr::unknown());
            }
            Ok(Expr::and(rest))
        }

        Expr::Or(parts) => {
            let mut rest = Vec::new();
            let mut unknown = false;
            for p in parts {
                let f = fold(p, predicate)?;
                match f.as_tri() {
                    Some(TriBool::True) => return Ok(Expr::boolean(true)),
                    Some(TriBool::False) => {}
                    Some(TriBool::Unknown) if predicate => {}
                    Some(TriBool::Unknown) => unknown = true,
                    None => rest.push(f),
                }
            }
            if unknown {
                if rest.is_empty() {
                    return Ok(Expr::unknown());
                }
                rest.push(Expr::unknown());
            }
            Ok(Expr::or(rest))
        }

        Expr::Function { name, args } => {
            let folded = args.iter().map(|a| fold(a, false)).collect::<EvalResult<Vec<_>>>()?;
            let values: Option<Vec<Value>> = folded.iter().map(|a| a.as_constant().cloned()).collect();
            let candidate = Expr::function(name.clone(), folded);
            match values {
                Some(vals) if candidate.is_deterministic() => {
                    let data_type = candidate.data_type();
                    let value = eval_function(name, &vals)?;
                    Ok(if value.is_null() {
                        Expr::null(data_type)
                    } else {
                        Expr::constant(value)
                    })
                }
                _ => Ok(candidate),
            }
        }
    }
}
