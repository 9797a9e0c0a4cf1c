//! Result rows and column metadata.

use std::sync::Arc;

use ase_types::AseValue;
use tds5_protocol::token::FormatColumn;

/// Metadata for a result set column.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Display label, equals `name` unless the query aliased it.
    pub label: String,
    /// Zero-based position in the result set.
    pub index: usize,
    /// Wire type name (e.g. `INT4`, `VARCHAR`).
    pub type_name: String,
    /// Whether the column allows NULL.
    pub nullable: bool,
    /// Maximum length for variable types.
    pub max_length: Option<u32>,
    /// Precision for numeric/decimal columns.
    pub precision: Option<u8>,
    /// Scale for numeric/decimal columns.
    pub scale: Option<u8>,
}

impl Column {
    /// Build column metadata from a wire format column.
    #[must_use]
    pub fn from_format(col: &FormatColumn, index: usize) -> Self {
        Self {
            name: col.name.clone(),
            label: col.label.clone(),
            index,
            type_name: format!("{:?}", col.wire_type).to_uppercase(),
            nullable: col.null_allowed(),
            max_length: col.length,
            precision: col.precision,
            scale: col.scale,
        }
    }
}

/// A single result row with decoded values.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<Column>>,
    values: Vec<AseValue>,
}

impl Row {
    /// Create a row from shared column metadata and decoded values.
    #[must_use]
    pub fn new(columns: Arc<Vec<Column>>, values: Vec<AseValue>) -> Self {
        Self { columns, values }
    }

    /// Column metadata for this row.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AseValue> {
        self.values.get(index)
    }

    /// Get a value by column name, falling back to the query alias when no
    /// base name matches.
    #[must_use]
    pub fn get_named(&self, name: &str) -> Option<&AseValue> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| self.columns.iter().position(|c| c.label == name))?;
        self.values.get(index)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[AseValue] {
        &self.values
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<AseValue> {
        self.values
    }
}
