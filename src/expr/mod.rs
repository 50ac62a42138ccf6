//! Resolved expressions and criteria.
//!
//! Every column in an [`Expr`] is bound to an [`ElementSymbol`], so the
//! optimizer can reason about which groups a predicate touches.

mod error;
pub mod eval;
mod simplify;
mod symbol;
mod value;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub use error::{EvalError, EvalResult};
pub use simplify::{ConstantSimplifier, ExprSimplifier};
pub use symbol::{ElementSymbol, GroupSymbol};
pub use value::{DataType, TriBool, Value};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// The operator with its operands swapped (`a < b` is `b > a`).
    pub fn flip(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::NotEq => CompareOp::NotEq,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
        }
    }
}

/// A resolved expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Column(ElementSymbol),
    Constant { value: Value, data_type: DataType },
    /// A bind parameter; `index` is zero based.
    Parameter { index: usize, data_type: DataType },
    /// A named projection item.
    Alias { name: String, expr: Box<Expr> },
    Compare { left: Box<Expr>, op: CompareOp, right: Box<Expr> },
    IsNull { expr: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    /// Runtime semi-join filter fed by the other side of a dependent join.
    DependentIn { expr: Box<Expr>, source: String },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Function { name: String, args: Vec<Expr> },
    Aggregate { function: AggregateFunction, arg: Option<Box<Expr>>, distinct: bool },
}

const NONDETERMINISTIC: &[&str] = &["rand", "random", "now", "uuid"];

impl Expr {
    pub fn column(symbol: ElementSymbol) -> Expr {
        Expr::Column(symbol)
    }

    pub fn constant(value: Value) -> Expr {
        let data_type = value.data_type();
        Expr::Constant { value, data_type }
    }

    pub fn int(v: i64) -> Expr {
        Expr::constant(Value::Integer(v))
    }

    pub fn string(v: impl Into<String>) -> Expr {
        Expr::constant(Value::String(v.into()))
    }

    pub fn boolean(v: bool) -> Expr {
        Expr::constant(Value::Boolean(v))
    }

    /// A NULL constant carrying the given type.
    pub fn null(data_type: DataType) -> Expr {
        Expr::Constant {
            value: Value::Null,
            data_type,
        }
    }

    /// The UNKNOWN truth value.
    pub fn unknown() -> Expr {
        Expr::null(DataType::Boolean)
    }

    pub fn from_tri(t: TriBool) -> Expr {
        match t {
            TriBool::True => Expr::boolean(true),
            TriBool::False => Expr::boolean(false),
            TriBool::Unknown => Expr::unknown(),
        }
    }

    pub fn alias(name: impl Into<String>, expr: Expr) -> Expr {
        Expr::Alias {
            name: name.into(),
            expr: Box::new(expr),
        }
    }

    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Expr {
        Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::compare(left, CompareOp::Eq, right)
    }

    pub fn is_null(expr: Expr) -> Expr {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// Conjunction of `parts`, flattening nested ANDs. An empty list is TRUE.
    pub fn and(parts: Vec<Expr>) -> Expr {
        let mut flat = Vec::new();
        for p in parts {
            match p {
                Expr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Expr::boolean(true),
            1 => flat.remove(0),
            _ => Expr::And(flat),
        }
    }

    /// Disjunction of `parts`, flattening nested ORs. An empty list is FALSE.
    pub fn or(parts: Vec<Expr>) -> Expr {
        let mut flat = Vec::new();
        for p in parts {
            match p {
                Expr::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Expr::boolean(false),
            1 => flat.remove(0),
            _ => Expr::Or(flat),
        }
    }

    /// Split a criteria into its top-level conjuncts.
    pub fn conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::And(parts) => parts.iter().flat_map(|p| p.conjuncts()).collect(),
            other => vec![other.clone()],
        }
    }

    /// Strip a projection alias.
    pub fn unalias(&self) -> &Expr {
        match self {
            Expr::Alias { expr, .. } => expr.unalias(),
            other => other,
        }
    }

    /// Name this expression is known by when projected.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Alias { name, .. } => name.clone(),
            Expr::Column(sym) => sym.name.clone(),
            Expr::Aggregate { function, .. } => function.to_string().to_lowercase(),
            Expr::Function { name, .. } => name.clone(),
            _ => "expr".to_string(),
        }
    }

    pub fn as_column(&self) -> Option<&ElementSymbol> {
        match self.unalias() {
            Expr::Column(sym) => Some(sym),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self.unalias() {
            Expr::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Truth value of a boolean constant.
    pub fn as_tri(&self) -> Option<TriBool> {
        self.as_constant().and_then(TriBool::from_value)
    }

    pub fn is_true(&self) -> bool {
        self.as_tri() == Some(TriBool::True)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Column(sym) => sym.data_type,
            Expr::Constant { data_type, .. } | Expr::Parameter { data_type, .. } => *data_type,
            Expr::Alias { expr, .. } => expr.data_type(),
            Expr::Compare { .. }
            | Expr::IsNull { .. }
            | Expr::InList { .. }
            | Expr::DependentIn { .. }
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::Not(_) => DataType::Boolean,
            Expr::Function { name, args } => match name.as_str() {
                "upper" | "lower" | "concat" | "||" => DataType::String,
                "length" => DataType::Integer,
                _ => {
                    let types: Vec<DataType> = args.iter().map(|a| a.data_type()).collect();
                    if types.contains(&DataType::Float) {
                        DataType::Float
                    } else {
                        types
                            .into_iter()
                            .find(|t| *t != DataType::Null)
                            .unwrap_or(DataType::Null)
                    }
                }
            },
            Expr::Aggregate { function, arg, .. } => match function {
                AggregateFunction::Count => DataType::Integer,
                AggregateFunction::Avg => DataType::Float,
                _ => arg.as_ref().map(|a| a.data_type()).unwrap_or(DataType::Null),
            },
        }
    }

    /// Direct sub-expressions.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Constant { .. } | Expr::Parameter { .. } => vec![],
            Expr::Alias { expr, .. } | Expr::IsNull { expr, .. } | Expr::DependentIn { expr, .. } => {
                vec![&**expr]
            }
            Expr::Not(e) => vec![&**e],
            Expr::Compare { left, right, .. } => vec![&**left, &**right],
            Expr::InList { expr, list, .. } => {
                let mut v: Vec<&Expr> = vec![&**expr];
                v.extend(list.iter());
                v
            }
            Expr::And(parts) | Expr::Or(parts) => parts.iter().collect(),
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
        }
    }

    fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        for c in self.children() {
            c.visit(f);
        }
    }

    /// Every column referenced.
    pub fn columns(&self) -> Vec<ElementSymbol> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Column(sym) = e {
                out.push(sym.clone());
            }
        });
        out
    }

    /// Groups referenced by this expression.
    pub fn groups(&self) -> BTreeSet<GroupSymbol> {
        self.columns().into_iter().map(|c| c.group).collect()
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// Collect distinct aggregate sub-expressions in first-seen order.
    pub fn aggregates(&self) -> Vec<Expr> {
        let mut out: Vec<Expr> = Vec::new();
        self.visit(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) && !out.contains(e) {
                out.push(e.clone());
            }
        });
        out
    }

    pub fn is_deterministic(&self) -> bool {
        let mut det = true;
        self.visit(&mut |e| {
            if let Expr::Function { name, .. } = e {
                if NONDETERMINISTIC.contains(&name.as_str()) {
                    det = false;
                }
            }
        });
        det
    }

    /// True when the expression can be folded without row context.
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.visit(&mut |e| {
            if matches!(
                e,
                Expr::Column(_)
                    | Expr::Parameter { .. }
                    | Expr::Aggregate { .. }
                    | Expr::DependentIn { .. }
            ) {
                constant = false;
            }
        });
        constant && self.is_deterministic()
    }

    /// Rebuild the expression bottom-up, letting `f` replace any node first.
    pub fn transform(&self, f: &dyn Fn(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        fn bx(e: &Expr, f: &dyn Fn(&Expr) -> Option<Expr>) -> Box<Expr> {
            Box::new(e.transform(f))
        }
        match self {
            Expr::Column(_) | Expr::Constant { .. } | Expr::Parameter { .. } => self.clone(),
            Expr::Alias { name, expr } => Expr::Alias {
                name: name.clone(),
                expr: bx(expr, f),
            },
            Expr::Compare { left, op, right } => Expr::Compare {
                left: bx(left, f),
                op: *op,
                right: bx(right, f),
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: bx(expr, f),
                negated: *negated,
            },
            Expr::InList { expr, list, negated } => Expr::InList {
                expr: bx(expr, f),
                list: list.iter().map(|e| e.transform(f)).collect(),
                negated: *negated,
            },
            Expr::DependentIn { expr, source } => Expr::DependentIn {
                expr: bx(expr, f),
                source: source.clone(),
            },
            Expr::And(parts) => Expr::And(parts.iter().map(|e| e.transform(f)).collect()),
            Expr::Or(parts) => Expr::Or(parts.iter().map(|e| e.transform(f)).collect()),
            Expr::Not(e) => Expr::Not(bx(e, f)),
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|e| e.transform(f)).collect(),
            },
            Expr::Aggregate { function, arg, distinct } => Expr::Aggregate {
                function: *function,
                arg: arg.as_ref().map(|a| bx(a, f)),
                distinct: *distinct,
            },
        }
    }

    /// Replace mapped columns.
    pub fn substitute(&self, map: &HashMap<ElementSymbol, Expr>) -> Expr {
        self.transform(&|e| match e {
            Expr::Column(sym) => map.get(sym).cloned(),
            _ => None,
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |parts: &[Expr], sep: &str| {
            parts
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Expr::Column(sym) => write!(f, "{}", sym),
            Expr::Constant { value, .. } => write!(f, "{}", value),
            Expr::Parameter { index, .. } => write!(f, "${}", index + 1),
            Expr::Alias { name, expr } => write!(f, "{} AS {}", expr, name),
            Expr::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::InList { expr, list, negated } => write!(
                f,
                "{} {}IN ({})",
                expr,
                if *negated { "NOT " } else { "" },
                join(list, ", ")
            ),
            Expr::DependentIn { expr, source } => write!(f, "{} IN <dependent {}>", expr, source),
            Expr::And(parts) => write!(f, "({})", join(parts, " AND ")),
            Expr::Or(parts) => write!(f, "({})", join(parts, " OR ")),
            Expr::Not(e) => write!(f, "NOT ({})", e),
            Expr::Function { name, args } => match name.as_str() {
                "+" | "-" | "*" | "/" | "%" | "||" if args.len() == 2 => {
                    write!(f, "({} {} {})", args[0], name, args[1])
                }
                _ => write!(f, "{}({})", name, join(args, ", ")),
            },
            Expr::Aggregate { function, arg, distinct } => match arg {
                Some(a) => write!(f, "{}({}{})", function, if *distinct { "DISTINCT " } else { "" }, a),
                None => write!(f, "{}(*)", function),
            },
        }
    }
}
