//! An in-memory catalog loadable from JSON.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{MetadataError, MetadataResult};
use super::{CapabilitiesFinder, Metadata};
use crate::expr::DataType;

/// Column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// A unique index over `function(column)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIndex {
    pub function: String,
    pub column: String,
}

/// Physical table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub name: String,
    pub model: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_patterns: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<f64>,
    #[serde(default)]
    pub make_dependent: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_indexes: Vec<FunctionIndex>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            columns: Vec::new(),
            keys: Vec::new(),
            access_patterns: Vec::new(),
            cardinality: None,
            make_dependent: false,
            function_indexes: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            data_type,
            nullable: true,
        });
        self
    }

    pub fn key(mut self, columns: &[&str]) -> Self {
        self.keys.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn access_pattern(mut self, columns: &[&str]) -> Self {
        self.access_patterns.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn cardinality(mut self, rows: f64) -> Self {
        self.cardinality = Some(rows);
        self
    }

    pub fn make_dependent(mut self) -> Self {
        self.make_dependent = true;
        self
    }

    pub fn function_index(mut self, function: impl Into<String>, column: impl Into<String>) -> Self {
        self.function_indexes.push(FunctionIndex {
            function: function.into(),
            column: column.into(),
        });
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn validate(&self) -> MetadataResult<()> {
        let referenced = self
            .keys
            .iter()
            .chain(self.access_patterns.iter())
            .flatten()
            .chain(self.function_indexes.iter().map(|f| &f.column));
        for col in referenced {
            if self.get_column(col).is_none() {
                return Err(MetadataError::ColumnNotFound {
                    table: self.name.clone(),
                    column: col.clone(),
                });
            }
        }
        Ok(())
    }
}

/// What a source model can evaluate itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCapabilities {
    pub supports_criteria: bool,
    pub supports_order_by: bool,
    pub supports_row_limit: bool,
    pub supports_row_offset: bool,
    pub supports_set_operations: bool,
    /// The source rejects queries without criteria.
    pub requires_criteria: bool,
    /// Connector identity; models sharing one can be pushed down together.
    pub connector: Option<String>,
}

impl SourceCapabilities {
    /// A source that accepts every pushdown.
    pub fn full() -> Self {
        Self {
            supports_criteria: true,
            supports_order_by: true,
            supports_row_limit: true,
            supports_row_offset: true,
            supports_set_operations: true,
            requires_criteria: false,
            connector: None,
        }
    }
}

/// Tables and models held in memory.
///
/// ```json
/// {
///   "models": { "pg": { "supports_criteria": true } },
///   "tables": { "orders": { "model": "pg", "columns": [{"name": "id", "type": "integer"}] } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    #[serde(default)]
    models: BTreeMap<String, SourceCapabilities>,
    #[serde(default)]
    tables: BTreeMap<String, TableDef>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: impl Into<String>, caps: SourceCapabilities) -> Self {
        self.models.insert(name.into().to_lowercase(), caps);
        self
    }

    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.insert(table.name.to_lowercase(), table);
        self
    }

    pub fn from_json(json: &str) -> MetadataResult<Self> {
        let raw: InMemoryCatalog = serde_json::from_str(json)?;
        let mut catalog = InMemoryCatalog::new();
        for (name, caps) in raw.models {
            catalog = catalog.with_model(name, caps);
        }
        for (name, mut table) in raw.tables {
            if table.name.is_empty() {
                table.name = name;
            }
            table.validate()?;
            if !catalog.models.contains_key(&table.model.to_lowercase()) {
                return Err(MetadataError::ModelNotFound(table.model.clone()));
            }
            catalog = catalog.with_table(table);
        }
        log::debug!(
            "loaded catalog with {} models and {} tables",
            catalog.models.len(),
            catalog.tables.len()
        );
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.values().map(|t| t.name.as_str()).collect()
    }
}

impl Metadata for InMemoryCatalog {
    fn table(&self, name: &str) -> MetadataResult<&TableDef> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| MetadataError::TableNotFound(name.to_string()))
    }
}

impl CapabilitiesFinder for InMemoryCatalog {
    fn capabilities(&self, model: &str) -> MetadataResult<&SourceCapabilities> {
        self.models
            .get(&model.to_lowercase())
            .ok_or_else(|| MetadataError::ModelNotFound(model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "models": {
            "pg": { "supports_criteria": true, "supports_row_limit": true, "connector": "c1" },
            "pg2": { "connector": "c1" },
            "files": {}
        },
        "tables": {
            "Orders": {
                "model": "pg",
                "columns": [
                    {"name": "id", "type": "integer", "nullable": false},
                    {"name": "customer", "type": "string"}
                ],
                "keys": [["id"]],
                "cardinality": 5000
            }
        }
    }"#;

    #[test]
    fn test_from_json() {
        let cat = InMemoryCatalog::from_json(CATALOG).unwrap();
        let t = cat.table("orders").unwrap();
        assert_eq!(t.name, "Orders");
        assert_eq!(t.columns.len(), 2);
        assert!(!t.columns[0].nullable);
        assert!(t.columns[1].nullable);
        assert_eq!(cat.unique_keys("ORDERS").unwrap(), vec![vec!["id".to_string()]]);
        assert_eq!(cat.cardinality("orders").unwrap(), Some(5000.0));
        assert!(cat.supports_criteria("pg").unwrap());
        assert!(!cat.supports_order_by("pg").unwrap());
        assert!(cat.same_connector("pg", "pg2").unwrap());
        assert!(!cat.same_connector("pg", "files").unwrap());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let json = r#"{"tables": {"t": {"model": "nope", "columns": []}}}"#;
        assert!(matches!(
            InMemoryCatalog::from_json(json),
            Err(MetadataError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_key_column_must_exist() {
        let json = r#"{"models": {"m": {}}, "tables": {"t": {"model": "m", "columns": [], "keys": [["id"]]}}}"#;
        assert!(matches!(
            InMemoryCatalog::from_json(json),
            Err(MetadataError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_table() {
        let cat = InMemoryCatalog::new();
        assert!(matches!(cat.table("x"), Err(MetadataError::TableNotFound(_))));
    }
}
