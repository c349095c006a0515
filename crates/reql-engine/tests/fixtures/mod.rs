//! Test fixtures for federation integration tests
//!
//! Saved queries and the result sets their backends return. The shapes
//! mirror what a results cache typically holds: mixed column types, nulls
//! and dates serialized as text.

#![allow(dead_code)]

use reql_core::{Column, ColumnType, DataSourceKind, DataSourceRef, ResolvedQuery, ResultSet, Value};

/// Organization every fixture query belongs to
pub const ORG: u64 = 1;

/// A data source executed by the backend
pub fn warehouse() -> DataSourceRef {
    DataSourceRef::new(1, "warehouse", DataSourceKind::External)
}

/// A data source whose queries are federated statements themselves
pub fn federated() -> DataSourceRef {
    DataSourceRef::new(2, "reql", DataSourceKind::Reql)
}

/// A saved query on the warehouse
pub fn external(id: u64, text: &str) -> ResolvedQuery {
    ResolvedQuery::new(id, ORG, text, warehouse())
}

/// A saved federated query
pub fn reql(id: u64, text: &str) -> ResolvedQuery {
    ResolvedQuery::new(id, ORG, text, federated())
}

/// Users table result
///
/// - id, name, active flag, signup date as text
pub fn users_result() -> ResultSet {
    ResultSet::from_values(
        vec![
            Column::new("id", ColumnType::Integer),
            Column::new("name", ColumnType::String),
            Column::new("active", ColumnType::Boolean),
            Column::new("signed_up", ColumnType::Datetime),
        ],
        vec![
            vec![1.into(), "ada".into(), true.into(), "2023-01-05".into()],
            vec![2.into(), "grace".into(), false.into(), "2023-02-11".into()],
            vec![3.into(), "linus".into(), true.into(), "2023-03-20".into()],
        ],
    )
}

/// Orders table result
///
/// - id, owning user, order total
pub fn orders_result() -> ResultSet {
    ResultSet::from_values(
        vec![
            Column::new("id", ColumnType::Integer),
            Column::new("user_id", ColumnType::Integer),
            Column::new("total", ColumnType::Float),
        ],
        vec![
            vec![10.into(), 1.into(), 25.5.into()],
            vec![11.into(), 1.into(), 4.5.into()],
            vec![12.into(), 3.into(), 100.0.into()],
            vec![13.into(), 2.into(), 7.25.into()],
        ],
    )
}

/// Single integer column `n`
pub fn numbers(values: &[i64]) -> ResultSet {
    ResultSet::from_values(
        vec![Column::new("n", ColumnType::Integer)],
        values.iter().map(|v| vec![Value::Integer(*v)]).collect(),
    )
}

/// Text columns whose contents look like other types
pub fn stringly_result() -> ResultSet {
    ResultSet::from_values(
        vec![
            Column::new("counts", ColumnType::String),
            Column::new("mixed", ColumnType::String),
            Column::new("flags", ColumnType::String),
        ],
        vec![
            vec!["3".into(), "3".into(), "true".into()],
            vec!["4".into(), "abc".into(), "false".into()],
        ],
    )
}

/// Wide text rows, roughly 400KB in total
pub fn large_result() -> ResultSet {
    ResultSet::from_values(
        vec![Column::new("payload", ColumnType::String)],
        (0..2000)
            .map(|i| vec![Value::from(format!("{:0>200}", i))])
            .collect(),
    )
}
