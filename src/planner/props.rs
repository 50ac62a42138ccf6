//! Per-operator node properties.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::symbol_map::SymbolMap;
use crate::expr::{ElementSymbol, Expr, GroupSymbol, Value};

/// Join types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Cross,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinType {
    pub fn is_outer(&self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::RightOuter | JoinType::FullOuter)
    }

    /// The equivalent type once the children are swapped.
    pub fn reversed(&self) -> JoinType {
        match self {
            JoinType::LeftOuter => JoinType::RightOuter,
            JoinType::RightOuter => JoinType::LeftOuter,
            other => *other,
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "INNER",
            JoinType::Cross => "CROSS",
            JoinType::LeftOuter => "LEFT OUTER",
            JoinType::RightOuter => "RIGHT OUTER",
            JoinType::FullOuter => "FULL OUTER",
        };
        write!(f, "{}", s)
    }
}

/// Physical join algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinStrategy {
    NestedLoop,
    Merge,
    /// Merge join where at least one side is consumed unsorted.
    EnhancedSort,
    /// The right side is re-evaluated per left row.
    NestedTable,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinStrategy::NestedLoop => "NESTED LOOP",
            JoinStrategy::Merge => "MERGE",
            JoinStrategy::EnhancedSort => "ENHANCED SORT",
            JoinStrategy::NestedTable => "NESTED TABLE",
        };
        write!(f, "{}", s)
    }
}

/// How a merge join side arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOption {
    /// A local sort node was inserted.
    Sort,
    /// The source returns rows already ordered.
    AlreadySorted,
    /// The side is read unsorted and indexed at runtime.
    NotSorted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(&self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn other(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Join properties.
///
/// `criteria` always holds the full ON conjunct list. The strategy rules
/// classify it into ordered key pairs and residual criteria without
/// removing anything from it.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinProps {
    pub join_type: JoinType,
    pub strategy: Option<JoinStrategy>,
    pub criteria: Vec<Expr>,
    pub left_keys: Vec<Expr>,
    pub right_keys: Vec<Expr>,
    pub residual: Vec<Expr>,
    pub sort_left: Option<SortOption>,
    pub sort_right: Option<SortOption>,
    pub left_distinct: bool,
    pub right_distinct: bool,
    /// Side fed by a dependent (semi-join) filter.
    pub dependent: Option<Side>,
}

impl JoinProps {
    pub fn new(join_type: JoinType, criteria: Vec<Expr>) -> Self {
        Self {
            join_type,
            strategy: None,
            criteria,
            left_keys: Vec::new(),
            right_keys: Vec::new(),
            residual: Vec::new(),
            sort_left: None,
            sort_right: None,
            left_distinct: false,
            right_distinct: false,
            dependent: None,
        }
    }

    /// Mirror all side-specific properties after the children were swapped.
    pub fn swap_sides(&mut self) {
        self.join_type = self.join_type.reversed();
        std::mem::swap(&mut self.left_keys, &mut self.right_keys);
        std::mem::swap(&mut self.sort_left, &mut self.sort_right);
        std::mem::swap(&mut self.left_distinct, &mut self.right_distinct);
        self.dependent = self.dependent.map(|s| s.other());
    }

    pub fn keys(&self, side: Side) -> &[Expr] {
        match side {
            Side::Left => &self.left_keys,
            Side::Right => &self.right_keys,
        }
    }

    pub fn set_sort(&mut self, side: Side, option: SortOption) {
        match side {
            Side::Left => self.sort_left = Some(option),
            Side::Right => self.sort_right = Some(option),
        }
    }

    pub fn set_distinct(&mut self, side: Side) {
        match side {
            Side::Left => self.left_distinct = true,
            Side::Right => self.right_distinct = true,
        }
    }
}

/// Pushdown boundary to a source model.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessProps {
    pub model: String,
}

/// Known partitioning of a union view: for each partitioned column, the
/// set of values each branch can produce, in branch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionInfo {
    pub columns: BTreeMap<ElementSymbol, Vec<BTreeSet<Value>>>,
}

impl PartitionInfo {
    pub fn get(&self, column: &ElementSymbol) -> Option<&Vec<BTreeSet<Value>>> {
        self.columns.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Properties of a group's source node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceProps {
    /// Definition of a virtual group's columns; `None` for physical tables.
    pub symbol_map: Option<SymbolMap>,
    /// Outer groups a lateral view references.
    pub correlated: BTreeSet<GroupSymbol>,
    pub partition: Option<PartitionInfo>,
}

impl SourceProps {
    pub fn physical() -> Self {
        Self::default()
    }

    pub fn virtual_group(symbol_map: SymbolMap) -> Self {
        Self {
            symbol_map: Some(symbol_map),
            ..Self::default()
        }
    }
}

/// Filter properties.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectProps {
    pub criteria: Expr,
    /// Left behind after a criteria was distributed into every branch of a
    /// set operation.
    pub phantom: bool,
    /// Derived by transitive copying rather than written by the user.
    pub copied: bool,
    /// A filter over aggregate results.
    pub having: bool,
}

impl SelectProps {
    pub fn new(criteria: Expr) -> Self {
        Self {
            criteria,
            phantom: false,
            copied: false,
            having: false,
        }
    }
}

/// Projection properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectProps {
    pub columns: Vec<Expr>,
    /// Target group of an INSERT ... SELECT.
    pub into: Option<GroupSymbol>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupProps {
    pub group_cols: Vec<Expr>,
    pub aggregates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortProps {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperation {
    Union,
    Intersect,
    Except,
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetOperation::Union => "UNION",
            SetOperation::Intersect => "INTERSECT",
            SetOperation::Except => "EXCEPT",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOpProps {
    pub op: SetOperation,
    pub all: bool,
}

/// Row limit properties. Either bound may be a non-literal expression.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitProps {
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    /// Row count matters to something below; the limit must not move.
    pub strict: bool,
}

impl LimitProps {
    pub fn new(limit: Option<Expr>, offset: Option<Expr>) -> Self {
        Self {
            limit,
            offset,
            strict: false,
        }
    }
}
