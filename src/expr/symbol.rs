//! Group and element symbols.

use std::fmt;

use super::value::DataType;

/// A named relation in scope: a physical table or a virtual (inline view) group.
///
/// Two symbols with the same name but different `seq` are distinct groups;
/// `seq` is bumped when a subtree is re-aliased during decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupSymbol {
    pub name: String,
    /// Underlying table name for physical groups, `None` for virtual groups.
    pub definition: Option<String>,
    pub seq: u32,
}

impl GroupSymbol {
    /// Create a virtual group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: None,
            seq: 0,
        }
    }

    /// Create a group backed by a physical table.
    pub fn physical(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: Some(table.into()),
            seq: 0,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.definition.is_none()
    }

    /// Same group under a new alias sequence number.
    pub fn with_seq(&self, seq: u32) -> Self {
        Self {
            seq,
            ..self.clone()
        }
    }
}

impl fmt::Display for GroupSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seq == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}_{}", self.name, self.seq)
        }
    }
}

/// A column reference bound to its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementSymbol {
    pub group: GroupSymbol,
    pub name: String,
    pub data_type: DataType,
}

impl ElementSymbol {
    pub fn new(group: GroupSymbol, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            group,
            name: name.into(),
            data_type,
        }
    }

    /// The same column rebound to another group.
    pub fn with_group(&self, group: GroupSymbol) -> Self {
        Self {
            group,
            ..self.clone()
        }
    }
}

impl fmt::Display for ElementSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}
