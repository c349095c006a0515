//! Result sets exchanged with query backends and returned to callers

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Semantic column type of a result set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Integral numbers
    Integer,

    /// Non-integral numbers
    Float,

    /// Anything else, and the fallback when rows disagree
    #[default]
    String,

    /// `true` / `false` values
    Boolean,

    /// Dates and timestamps
    #[serde(alias = "date")]
    Datetime,
}

impl ColumnType {
    /// Get the type as its wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column in a result set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Semantic type; `null` on the wire reads as string
    #[serde(rename = "type", default, deserialize_with = "nullable_type")]
    pub column_type: ColumnType,
}

impl Column {
    /// Create a new column
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

fn nullable_type<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ColumnType, D::Error> {
    Ok(Option::<ColumnType>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

/// A row maps column names to values
pub type Row = BTreeMap<String, Value>;

/// Columns plus rows, the unit every backend produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Ordered column list
    pub columns: Vec<Column>,

    /// Ordered rows
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create a result set from columns and rows
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a result set from positional rows
    ///
    /// Each row must hold one value per column, in column order.
    pub fn from_values(columns: Vec<Column>, values: Vec<Vec<Value>>) -> Self {
        let rows = values
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| c.name.clone())
                    .zip(row)
                    .collect::<Row>()
            })
            .collect();

        Self { columns, rows }
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Values of one row in column order, missing cells read as null
    pub fn row_values<'a>(&'a self, row: &'a Row) -> impl Iterator<Item = &'a Value> + 'a {
        static NULL: Value = Value::Null;
        self.columns
            .iter()
            .map(move |c| row.get(&c.name).unwrap_or(&NULL))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
