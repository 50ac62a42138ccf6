//! Source metadata and connector capabilities consumed by the optimizer.

mod catalog;
mod error;

pub use catalog::{ColumnDef, FunctionIndex, InMemoryCatalog, SourceCapabilities, TableDef};
pub use error::{MetadataError, MetadataResult};

/// Read-only table metadata.
pub trait Metadata: Send + Sync {
    /// Look up a physical table by name (case-insensitive).
    fn table(&self, name: &str) -> MetadataResult<&TableDef>;

    /// Unique keys of a table as lists of column names.
    fn unique_keys(&self, table: &str) -> MetadataResult<Vec<Vec<String>>> {
        Ok(self.table(table)?.keys.clone())
    }

    /// Column sets of which at least one must be bound by criteria.
    fn access_patterns(&self, table: &str) -> MetadataResult<Vec<Vec<String>>> {
        Ok(self.table(table)?.access_patterns.clone())
    }

    fn cardinality(&self, table: &str) -> MetadataResult<Option<f64>> {
        Ok(self.table(table)?.cardinality)
    }

    /// Name of the source model (connector binding) a table lives in.
    fn model_of(&self, table: &str) -> MetadataResult<String> {
        Ok(self.table(table)?.model.clone())
    }

    /// Hint that joins against this table should be made dependent.
    fn make_dependent(&self, table: &str) -> MetadataResult<bool> {
        Ok(self.table(table)?.make_dependent)
    }

    /// Unique function-based indexes of a table.
    fn function_indexes(&self, table: &str) -> MetadataResult<Vec<FunctionIndex>> {
        Ok(self.table(table)?.function_indexes.clone())
    }
}

/// Per-model pushdown capabilities.
pub trait CapabilitiesFinder: Send + Sync {
    fn capabilities(&self, model: &str) -> MetadataResult<&SourceCapabilities>;

    fn supports_criteria(&self, model: &str) -> MetadataResult<bool> {
        Ok(self.capabilities(model)?.supports_criteria)
    }

    fn supports_order_by(&self, model: &str) -> MetadataResult<bool> {
        Ok(self.capabilities(model)?.supports_order_by)
    }

    fn supports_row_limit(&self, model: &str) -> MetadataResult<bool> {
        Ok(self.capabilities(model)?.supports_row_limit)
    }

    fn supports_row_offset(&self, model: &str) -> MetadataResult<bool> {
        Ok(self.capabilities(model)?.supports_row_offset)
    }

    fn supports_set_operations(&self, model: &str) -> MetadataResult<bool> {
        Ok(self.capabilities(model)?.supports_set_operations)
    }

    fn requires_criteria(&self, model: &str) -> MetadataResult<bool> {
        Ok(self.capabilities(model)?.requires_criteria)
    }

    /// True when both models are served by the same connector instance.
    fn same_connector(&self, a: &str, b: &str) -> MetadataResult<bool> {
        if a.eq_ignore_ascii_case(b) {
            return Ok(true);
        }
        let ca = self.capabilities(a)?.connector.as_deref();
        let cb = self.capabilities(b)?.connector.as_deref();
        Ok(matches!((ca, cb), (Some(x), Some(y)) if x == y))
    }
}
