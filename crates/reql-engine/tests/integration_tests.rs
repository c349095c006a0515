//! Integration tests for the federation engine
//!
//! Every test drives `Federation::run` against a `MockBackend`, so no real
//! query store is needed.
//!
//! ```bash
//! cargo test -p reql-engine --test integration_tests
//! ```

mod fixtures;

use fixtures::*;
use pretty_assertions::assert_eq;
use reql_core::{Column, ColumnType, Config, DiagnosticCode, Position, Principal, ResultSet, Value};
use reql_engine::{BackendCall, BackendError, ExecutionOutcome, Federation, FederationError, MockBackend};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Helper Functions
// =============================================================================

fn principal() -> Principal {
    Principal::new(100, ORG)
}

fn federation(backend: &MockBackend, config: &Config) -> Federation {
    Federation::new(config, Arc::new(backend.clone())).unwrap()
}

async fn run(backend: &MockBackend, text: &str) -> Result<ExecutionOutcome, FederationError> {
    federation(backend, &Config::default()).run(text, &principal()).await
}

/// Backend holding the users and orders queries as ids 1 and 2
async fn shop_backend() -> MockBackend {
    let backend = MockBackend::new();
    backend.add_query(external(1, "SELECT * FROM users")).await;
    backend.add_query(external(2, "SELECT * FROM orders")).await;
    backend.add_result(1, users_result()).await;
    backend.add_result(2, orders_result()).await;
    backend
}

// =============================================================================
// Materialization and Execution
// =============================================================================

#[tokio::test]
async fn test_join_across_referenced_queries() {
    let backend = shop_backend().await;
    let text = "SELECT u.name, sum(o.total) AS spent, count(*) AS orders\n\
                FROM query_1 u\n\
                JOIN query_2 o ON o.user_id = u.id\n\
                WHERE u.active\n\
                GROUP BY u.name\n\
                ORDER BY u.name";

    let result = run(&backend, text).await.unwrap().into_result().unwrap();

    assert_eq!(result.column_names(), vec!["name", "spent", "orders"]);
    let types: Vec<ColumnType> = result.columns.iter().map(|c| c.column_type).collect();
    assert_eq!(types, vec![ColumnType::String, ColumnType::Float, ColumnType::Integer]);

    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["name"], Value::from("ada"));
    assert_eq!(result.rows[0]["spent"], Value::Float(30.0));
    assert_eq!(result.rows[0]["orders"], Value::Integer(2));
    assert_eq!(result.rows[1]["name"], Value::from("linus"));
}

#[tokio::test]
async fn test_quoted_reference_materializes_under_its_name() {
    let backend = shop_backend().await;
    let result = run(&backend, "SELECT count(*) AS n FROM \"query_1\"")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.rows[0]["n"], Value::Integer(3));
}

#[tokio::test]
async fn test_text_columns_are_typed_by_content() {
    let backend = MockBackend::new();
    backend.add_query(external(30, "SELECT * FROM raw")).await;
    backend.add_result(30, stringly_result()).await;

    let result = run(&backend, "SELECT counts, mixed, flags FROM query_30")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let types: Vec<ColumnType> = result.columns.iter().map(|c| c.column_type).collect();
    assert_eq!(types, vec![ColumnType::Integer, ColumnType::String, ColumnType::Boolean]);
}

#[tokio::test]
async fn test_dates_survive_materialization() {
    let backend = shop_backend().await;
    let result = run(&backend, "SELECT signed_up FROM query_1 ORDER BY id")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.columns[0].column_type, ColumnType::Datetime);
    assert_eq!(result.rows[0]["signed_up"], Value::from("2023-01-05"));
}

#[tokio::test]
async fn test_statement_without_columns_returns_no_data() {
    let backend = MockBackend::new();

    let outcome = run(&backend, "-- nothing to run").await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::NoData);
    assert_eq!(
        outcome.message(),
        Some("Query completed but it returned no data.")
    );

    assert_eq!(run(&backend, ";").await.unwrap(), ExecutionOutcome::NoData);
}

#[tokio::test]
async fn test_syntax_error_reports_position() {
    let backend = MockBackend::new();
    let error = run(&backend, "SELECT a\nFROM WHERE").await.unwrap_err();

    let diagnostic = error.to_diagnostic();
    assert_eq!(diagnostic.code, DiagnosticCode::ReqlSyntaxError);
    let location = diagnostic.location.unwrap();
    assert_eq!((location.line, location.column), (2, 6));
    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn test_multiple_statements_are_rejected() {
    let backend = shop_backend().await;
    let error = run(&backend, "SELECT 1 AS a; SELECT * FROM query_1").await.unwrap_err();

    assert!(matches!(
        error,
        FederationError::MultipleStatements { count: 2, position } if position == Position::new(1, 16)
    ));
    let diagnostic = error.to_diagnostic();
    assert_eq!(diagnostic.code, DiagnosticCode::ReqlMultipleStatements);
    assert!(backend.calls().await.is_empty());

    // a trailing separator is still a single statement
    let result = run(&backend, "SELECT 1 AS a;").await.unwrap().into_result().unwrap();
    assert_eq!(result.rows[0]["a"], Value::Integer(1));
}

#[tokio::test]
async fn test_in_table_reference_is_materialized() {
    let backend = shop_backend().await;
    backend.add_query(external(5, "SELECT n FROM picks")).await;
    backend.add_result(5, numbers(&[1, 3])).await;

    let result = run(&backend, "SELECT name FROM query_1 WHERE id IN query_5 ORDER BY name")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let names: Vec<&Value> = result.rows.iter().map(|row| &row["name"]).collect();
    assert_eq!(names, vec![&Value::from("ada"), &Value::from("linus")]);
}

#[tokio::test]
async fn test_numbers_in_a_text_column_compare_as_numbers() {
    let backend = MockBackend::new();
    backend.add_query(external(31, "SELECT * FROM loose")).await;
    backend
        .add_result(
            31,
            ResultSet::from_values(
                vec![Column::new("n", ColumnType::String)],
                vec![vec![9.into()], vec![10.into()]],
            ),
        )
        .await;

    let result = run(&backend, "SELECT max(n) AS m FROM query_31")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.rows[0]["m"], Value::Integer(10));
}

// =============================================================================
// Cache and Refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_reference_wins_and_executes_once() {
    let backend = MockBackend::new();
    let query = external(7, "SELECT n FROM numbers");
    backend.add_query(query.clone()).await;
    backend.add_result(7, numbers(&[1, 2])).await;
    backend.add_cached(&query, numbers(&[99])).await;

    let text = "SELECT a.n FROM query_7 a JOIN query_7_refresh b ON a.n = b.n ORDER BY a.n";
    let result = run(&backend, text).await.unwrap().into_result().unwrap();

    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["n"], Value::Integer(1));
    assert_eq!(backend.execute_count(7).await, 1);
    assert_eq!(backend.resolve_count(7).await, 1);
    assert!(!backend
        .calls()
        .await
        .iter()
        .any(|call| matches!(call, BackendCall::CachedResult { .. })));
}

#[tokio::test]
async fn test_cached_result_is_reused() {
    let backend = MockBackend::new();
    let query = external(7, "SELECT n FROM numbers");
    backend.add_query(query.clone()).await;
    backend.add_result(7, numbers(&[1, 2])).await;
    backend.add_cached(&query, numbers(&[99])).await;

    let mut config = Config::default();
    config.cache.max_age = Some(60);

    let result = federation(&backend, &config)
        .run("SELECT n FROM query_7", &principal())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.rows[0]["n"], Value::Integer(99));
    assert_eq!(
        backend.calls().await,
        vec![
            BackendCall::Resolve(7),
            BackendCall::CachedResult {
                id: 7,
                max_age: Some(Duration::from_secs(60))
            },
        ]
    );
}

#[tokio::test]
async fn test_cache_miss_executes() {
    let backend = MockBackend::new();
    backend.add_query(external(7, "SELECT n FROM numbers")).await;
    backend.add_result(7, numbers(&[5])).await;

    let result = run(&backend, "SELECT n FROM query_7 WHERE n IN (SELECT n FROM query_7)")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.rows[0]["n"], Value::Integer(5));
    assert_eq!(backend.resolve_count(7).await, 1);
    assert_eq!(backend.execute_count(7).await, 1);
}

// =============================================================================
// Resolution Failures
// =============================================================================

#[tokio::test]
async fn test_missing_query() {
    let backend = MockBackend::new();
    let error = run(&backend, "SELECT * FROM query_99").await.unwrap_err();

    assert_eq!(error.to_string(), "Query id 99 not found. (at line 1 column 15)");
    assert_eq!(error.code(), DiagnosticCode::ReqlPermissionDenied);
}

#[tokio::test]
async fn test_query_of_another_organization_is_not_found() {
    let backend = MockBackend::new();
    let mut foreign = external(50, "SELECT 1");
    foreign.org_id = ORG + 1;
    backend.add_query(foreign).await;

    let error = run(&backend, "SELECT * FROM query_50").await.unwrap_err();
    assert!(matches!(
        error,
        FederationError::Permission { id: 50, .. }
    ));
    assert_eq!(backend.execute_count(50).await, 0);
}

#[tokio::test]
async fn test_denied_data_source() {
    let backend = MockBackend::new();
    backend.add_query(external(51, "SELECT * FROM payroll")).await;
    backend.deny(51).await;

    let error = run(&backend, "SELECT *\n  FROM query_51").await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "You are not allowed to execute queries on warehouse data source (used for query id 51). (at line 2 column 8)"
    );
}

#[tokio::test]
async fn test_failed_execution_aborts_everything() {
    let backend = shop_backend().await;
    backend.add_query(external(3, "SELECT * FROM slow")).await;
    backend
        .add_error(3, BackendError::ExecutionFailed("warehouse timeout".to_string()))
        .await;

    let error = run(&backend, "SELECT *\nFROM query_1, query_3")
        .await
        .unwrap_err();

    match &error {
        FederationError::Execution { id, position, .. } => {
            assert_eq!(*id, 3);
            assert_eq!(*position, Position::new(2, 15));
        }
        other => panic!("expected an execution error, got {:?}", other),
    }
    assert_eq!(
        error.to_string(),
        "Failed loading results for query id 3 (at line 2 column 15). Execution failed: warehouse timeout"
    );
}

// =============================================================================
// Resource Limits
// =============================================================================

#[tokio::test]
async fn test_memory_limit_is_enforced() {
    let backend = MockBackend::new();
    backend.add_query(external(40, "SELECT * FROM events")).await;
    backend.add_result(40, large_result()).await;

    let mut config = Config::default();
    config.engine.memory_limit = Some(16 * 1024);

    let error = federation(&backend, &config)
        .run("SELECT count(*) FROM query_40", &principal())
        .await
        .unwrap_err();

    match error {
        FederationError::ResourceLimit {
            limit_bytes,
            attempted_bytes,
            table,
        } => {
            assert_eq!(limit_bytes, 16 * 1024);
            assert!(attempted_bytes > limit_bytes);
            assert_eq!(table.as_deref(), Some("query_40"));
        }
        other => panic!("expected a resource limit error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_memory_limit_leaves_room_for_small_results() {
    let backend = shop_backend().await;
    let mut config = Config::default();
    config.engine.memory_limit = Some(1024 * 1024);

    let outcome = federation(&backend, &config)
        .run("SELECT count(*) AS n FROM query_2", &principal())
        .await
        .unwrap();
    assert_eq!(outcome.into_result().unwrap().rows[0]["n"], Value::Integer(4));
}

// =============================================================================
// Nested Federation and Cycles
// =============================================================================

#[tokio::test]
async fn test_nested_federated_query() {
    let backend = shop_backend().await;
    backend
        .add_query(reql(20, "SELECT id, name FROM query_1 WHERE active"))
        .await;

    let result = run(&backend, "SELECT count(*) AS n FROM query_20")
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.rows[0]["n"], Value::Integer(2));
    assert_eq!(backend.execute_count(20).await, 0);
    assert_eq!(backend.execute_count(1).await, 1);
}

#[tokio::test]
async fn test_direct_self_reference() {
    let backend = MockBackend::new();
    backend.add_query(reql(5, "SELECT * FROM query_5")).await;

    let error = run(&backend, "SELECT * FROM query_5").await.unwrap_err();
    assert!(matches!(error, FederationError::Cycle { id: 5, .. }));
    assert_eq!(error.code(), DiagnosticCode::ReqlCycleDetected);
}

#[tokio::test]
async fn test_transitive_self_reference() {
    let backend = MockBackend::new();
    backend.add_query(reql(10, "SELECT * FROM query_11")).await;
    backend.add_query(reql(11, "SELECT * FROM query_12")).await;
    backend.add_query(reql(12, "SELECT * FROM query_10")).await;

    let error = run(&backend, "SELECT * FROM query_10").await.unwrap_err();
    assert!(matches!(error, FederationError::Cycle { id: 10, .. }));
}

#[tokio::test]
async fn test_shared_dependency_is_not_a_cycle() {
    let backend = shop_backend().await;
    backend.add_query(reql(21, "SELECT id FROM query_1")).await;
    backend.add_query(reql(22, "SELECT id FROM query_1")).await;

    let result = run(&backend, "SELECT count(*) AS n FROM query_21 a JOIN query_22 b ON a.id = b.id")
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(result.rows[0]["n"], Value::Integer(3));
}

#[tokio::test]
async fn test_nested_failure_is_reported_against_the_outer_reference() {
    let backend = MockBackend::new();
    backend.add_query(reql(21, "SELECT * FROM query_3")).await;
    backend.add_query(external(3, "SELECT * FROM slow")).await;
    backend
        .add_error(3, BackendError::ExecutionFailed("boom".to_string()))
        .await;

    let error = run(&backend, "SELECT * FROM query_21").await.unwrap_err();
    match error {
        FederationError::Execution { id, cause, .. } => {
            assert_eq!(id, 21);
            assert!(cause.contains("query id 3"));
        }
        other => panic!("expected an execution error, got {:?}", other),
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_while_backend_executes() {
    let backend = MockBackend::new().with_latency(10_000);
    backend.add_query(external(1, "SELECT * FROM users")).await;
    backend.add_result(1, users_result()).await;

    let federation = federation(&backend, &Config::default());
    let token = federation.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let start = Instant::now();
    let outcome = federation.run("SELECT * FROM query_1", &principal()).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Cancelled);
    assert_eq!(outcome.message(), Some("Query cancelled by user."));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancel_interrupts_the_final_statement() {
    let backend = MockBackend::new();
    let federation = federation(&backend, &Config::default());
    let token = federation.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let text = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c";
    let outcome = federation.run(text, &principal()).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let backend = shop_backend().await;
    let federation = federation(&backend, &Config::default());
    federation.cancellation_token().cancel();

    let outcome = federation.run("SELECT * FROM query_1", &principal()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Cancelled);
    assert_eq!(backend.execute_count(1).await, 0);
}
