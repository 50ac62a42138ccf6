//! Virtual group symbol maps.

use std::collections::HashMap;

use crate::expr::{ElementSymbol, Expr, GroupSymbol};

/// Ordered map from a virtual group's columns to the expressions that
/// define them beneath the group's source node. Keys are unique and keep
/// the positional order of the defining projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolMap {
    entries: Vec<(ElementSymbol, Expr)>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map for `group` over a projection, de-duplicating names.
    pub fn create(group: &GroupSymbol, columns: &[Expr]) -> Self {
        let mut map = SymbolMap::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for col in columns {
            let base = col.output_name();
            let count = seen.entry(base.to_lowercase()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{}_{}", base, count)
            };
            *count += 1;
            let key = ElementSymbol::new(group.clone(), name, col.data_type());
            map.entries.push((key, col.unalias().clone()));
        }
        map
    }

    /// Insert or replace the definition of `key`.
    pub fn insert(&mut self, key: ElementSymbol, expr: Expr) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = expr,
            None => self.entries.push((key, expr)),
        }
    }

    pub fn get(&self, key: &ElementSymbol) -> Option<&Expr> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> Vec<ElementSymbol> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Expr> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ElementSymbol, Expr)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of `key` in the defining projection.
    pub fn position(&self, key: &ElementSymbol) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Substitution from keys to their definitions.
    pub fn as_substitution(&self) -> HashMap<ElementSymbol, Expr> {
        self.entries.iter().cloned().collect()
    }

    /// Rewrite every definition.
    pub fn map_values(&mut self, f: impl Fn(&Expr) -> Expr) {
        for entry in &mut self.entries {
            entry.1 = f(&entry.1);
        }
    }

    /// Replace definitions positionally.
    pub fn set_values(&mut self, values: &[Expr]) {
        for (entry, v) in self.entries.iter_mut().zip(values) {
            entry.1 = v.unalias().clone();
        }
    }

    /// The same keys rebound to `group`, defined by `values` positionally.
    pub fn rebind(&self, group: &GroupSymbol, values: &[Expr]) -> SymbolMap {
        SymbolMap {
            entries: self
                .entries
                .iter()
                .zip(values)
                .map(|((k, _), v)| (k.with_group(group.clone()), v.unalias().clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DataType;

    #[test]
    fn test_create_deduplicates_names() {
        let a = GroupSymbol::physical("a", "a");
        let b = GroupSymbol::physical("b", "b");
        let cols = vec![
            Expr::column(ElementSymbol::new(a, "id", DataType::Integer)),
            Expr::column(ElementSymbol::new(b, "id", DataType::Integer)),
            Expr::alias("total", Expr::int(1)),
        ];
        let v = GroupSymbol::new("v");
        let map = SymbolMap::create(&v, &cols);
        let names: Vec<String> = map.keys().into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["id", "id_1", "total"]);
        assert_eq!(map.values()[2], Expr::int(1));
    }

    #[test]
    fn test_insert_replaces() {
        let v = GroupSymbol::new("v");
        let key = ElementSymbol::new(v, "x", DataType::Integer);
        let mut map = SymbolMap::new();
        map.insert(key.clone(), Expr::int(1));
        map.insert(key.clone(), Expr::int(2));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&key), Some(&Expr::int(2)));
    }
}
