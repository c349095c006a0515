//! Column type inference for result sets produced by the ephemeral store
//!
//! Every value gets a guess. A column keeps the guess of its first row while
//! later rows agree and degrades to string on the first disagreement.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use reql_core::{ColumnType, Value};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Classify a single value
pub fn guess_type(value: &Value) -> ColumnType {
    match value {
        Value::Null => ColumnType::String,
        Value::Integer(_) => ColumnType::Integer,
        Value::Float(_) => ColumnType::Float,
        Value::Boolean(_) => ColumnType::Boolean,
        Value::Text(text) => guess_text_type(text),
    }
}

fn guess_text_type(text: &str) -> ColumnType {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ColumnType::String;
    }

    if trimmed.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }

    if trimmed.bytes().any(|b| b.is_ascii_digit())
        && trimmed.parse::<f64>().map(f64::is_finite).unwrap_or(false)
    {
        return ColumnType::Float;
    }

    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return ColumnType::Boolean;
    }

    if is_datetime(trimmed) {
        return ColumnType::Datetime;
    }

    ColumnType::String
}

/// Whether the text reads as a date, a time or a timestamp
pub fn is_datetime(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || DateTime::parse_from_rfc2822(text).is_ok()
        || DATETIME_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
        || DATE_FORMATS
            .iter()
            .any(|format| NaiveDate::parse_from_str(text, format).is_ok())
        || TIME_FORMATS
            .iter()
            .any(|format| NaiveTime::parse_from_str(text, format).is_ok())
}

/// Running per-column classification
#[derive(Debug, Clone)]
pub struct TypeInference {
    types: Vec<Option<ColumnType>>,
}

impl TypeInference {
    /// Start inference for `width` columns
    pub fn new(width: usize) -> Self {
        Self {
            types: vec![None; width],
        }
    }

    /// Fold one row of positional values into the classification
    pub fn observe<'a>(&mut self, row: impl IntoIterator<Item = &'a Value>) {
        for (slot, value) in self.types.iter_mut().zip(row) {
            let guess = guess_type(value);
            *slot = match *slot {
                None => Some(guess),
                Some(current) if current == guess => Some(current),
                Some(_) => Some(ColumnType::String),
            };
        }
    }

    /// Final types; columns without rows read as string
    pub fn finish(self) -> Vec<ColumnType> {
        self.types.into_iter().map(Option::unwrap_or_default).collect()
    }
}

/// Infer the type of every column from positional rows
pub fn infer_column_types(width: usize, rows: &[Vec<Value>]) -> Vec<ColumnType> {
    let mut inference = TypeInference::new(width);
    for row in rows {
        inference.observe(row);
    }
    inference.finish()
}
