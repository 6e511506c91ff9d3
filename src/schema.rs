// 📐 Shape Layer - Column model for the clean store
// The merged batch, the clean store snapshot and the validation harness all
// describe a table the same way: an ordered list of named, typed columns.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

// ============================================================================
// COLUMN TYPE
// ============================================================================

/// Storage class of a column, following SQLite's type affinity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Numeric,
    Blob,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Blob => "BLOB",
        }
    }

    /// Map a declared SQLite column type to its affinity.
    ///
    /// Rules (sqlite.org/datatype3.html §3.1), applied in order:
    /// INT → Integer, CHAR/CLOB/TEXT → Text, BLOB or empty → Blob,
    /// REAL/FLOA/DOUB → Real, anything else → Numeric.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();

        if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            ColumnType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Numeric
        }
    }

    /// Storage class of a concrete value; `None` for NULL.
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Real(_) => Some(ColumnType::Real),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Blob(_) => Some(ColumnType::Blob),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// COLUMN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Column {
            name: name.to_string(),
            column_type,
        }
    }
}

// ============================================================================
// MERGED SCHEMA
// ============================================================================

/// Column layout of a merged student record, in storage order.
pub const MERGED_COLUMNS: [(&str, ColumnType); 20] = [
    ("uuid", ColumnType::Text),
    ("name", ColumnType::Text),
    ("dob", ColumnType::Text),
    ("sex", ColumnType::Text),
    ("job_id", ColumnType::Real),
    ("num_course_taken", ColumnType::Real),
    ("current_career_path_id", ColumnType::Real),
    ("time_spent_hrs", ColumnType::Real),
    ("age", ColumnType::Integer),
    ("age_group", ColumnType::Integer),
    ("email", ColumnType::Text),
    ("street", ColumnType::Text),
    ("city", ColumnType::Text),
    ("state", ColumnType::Text),
    ("zipcode", ColumnType::Text),
    ("career_path_id", ColumnType::Integer),
    ("career_path_name", ColumnType::Text),
    ("hours_to_complete", ColumnType::Integer),
    ("job_category", ColumnType::Text),
    ("avg_salary", ColumnType::Real),
];

/// Declared schema of the merged batch.
pub fn merged_schema() -> Vec<Column> {
    MERGED_COLUMNS
        .iter()
        .map(|(name, column_type)| Column::new(name, *column_type))
        .collect()
}

pub fn merged_column_names() -> Vec<&'static str> {
    MERGED_COLUMNS.iter().map(|(name, _)| *name).collect()
}

/// Infer each column's type from the data: the storage class of the first
/// non-null value wins, an all-null column keeps its declared type.
pub fn infer_column_types(declared: &[Column], rows: &[Vec<Value>]) -> Vec<Column> {
    declared
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let inferred = rows
                .iter()
                .filter_map(|row| row.get(idx))
                .find_map(ColumnType::of_value)
                .unwrap_or(column.column_type);

            Column {
                name: column.name.clone(),
                column_type: inferred,
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
