//! Mock query backend for testing
//!
//! This backend serves saved queries and their results from memory.
//! It's useful for:
//! - Unit testing the federation engine without a query store
//! - Checking which collaborator calls an execution made
//! - Simulating permission failures and failing executions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reql_engine::{MockBackend, QueryBackend};
//! use reql_core::{Column, ColumnType, DataSourceKind, DataSourceRef, ResolvedQuery, ResultSet};
//!
//! let backend = MockBackend::new();
//! let warehouse = DataSourceRef::new(1, "warehouse", DataSourceKind::External);
//!
//! backend.add_query(ResolvedQuery::new(7, 1, "SELECT id FROM users", warehouse)).await;
//! backend.add_result(7, ResultSet::from_values(
//!     vec![Column::new("id", ColumnType::Integer)],
//!     vec![vec![1.into()], vec![2.into()]],
//! )).await;
//!
//! // Later: how many times did query 7 actually run?
//! assert_eq!(backend.execute_count(7).await, 1);
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Resolution is refused for query 7
//! backend.deny(7).await;
//!
//! // Execution of query 8 fails
//! backend.add_error(8, BackendError::ExecutionFailed("timeout".into())).await;
//!
//! // Every call takes 100ms
//! let backend = MockBackend::new().with_latency(100);
//! ```

use crate::backend::{BackendError, QueryBackend};
use reql_core::{Principal, ResolvedQuery, ResultSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A collaborator call recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Resolve(u64),
    CachedResult { id: u64, max_age: Option<Duration> },
    Execute(u64),
}

/// Mock query backend for testing
///
/// Queries, results and failures live in shared maps, so clones observe
/// the same state and the same call log.
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockBackend::new()
///     .with_latency(50)   // 50ms per call
///     .with_name("Staging");
/// ```
pub struct MockBackend {
    /// Saved queries by id
    queries: Arc<RwLock<HashMap<u64, ResolvedQuery>>>,

    /// Fresh execution results by query id
    results: Arc<RwLock<HashMap<u64, ResultSet>>>,

    /// Cached results by query text hash
    cached: Arc<RwLock<HashMap<String, ResultSet>>>,

    /// Execution failures by query id
    errors: Arc<RwLock<HashMap<u64, BackendError>>>,

    /// Queries the principal may not run
    denied: Arc<RwLock<HashSet<u64>>>,

    /// Every call in order
    calls: Arc<RwLock<Vec<BackendCall>>>,

    /// Simulated latency per call (milliseconds)
    latency_ms: u64,

    /// Backend name for reporting
    backend_name: &'static str,
}

impl MockBackend {
    /// Create an empty mock backend
    pub fn new() -> Self {
        Self {
            queries: Arc::new(RwLock::new(HashMap::new())),
            results: Arc::new(RwLock::new(HashMap::new())),
            cached: Arc::new(RwLock::new(HashMap::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            denied: Arc::new(RwLock::new(HashSet::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            latency_ms: 0,
            backend_name: "Mock",
        }
    }

    /// Delay every call
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set the backend name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.backend_name = name;
        self
    }

    /// Register a saved query
    pub async fn add_query(&self, query: ResolvedQuery) {
        self.queries.write().await.insert(query.id, query);
    }

    /// Set the result execution of a query returns
    pub async fn add_result(&self, id: u64, result: ResultSet) {
        self.results.write().await.insert(id, result);
    }

    /// Store a cached result for the text of `query`
    pub async fn add_cached(&self, query: &ResolvedQuery, result: ResultSet) {
        self.cached.write().await.insert(query.query_hash(), result);
    }

    /// Make execution of a query fail
    pub async fn add_error(&self, id: u64, error: BackendError) {
        self.errors.write().await.insert(id, error);
    }

    /// Refuse access to a query
    pub async fn deny(&self, id: u64) {
        self.denied.write().await.insert(id);
    }

    /// All recorded calls in order
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.calls.read().await.clone()
    }

    /// Number of times a query was executed
    pub async fn execute_count(&self, id: u64) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| **call == BackendCall::Execute(id))
            .count()
    }

    /// Number of times a query was resolved
    pub async fn resolve_count(&self, id: u64) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| **call == BackendCall::Resolve(id))
            .count()
    }

    /// Forget the call log
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn record(&self, call: BackendCall) {
        self.calls.write().await.push(call);
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockBackend {
    fn clone(&self) -> Self {
        Self {
            queries: Arc::clone(&self.queries),
            results: Arc::clone(&self.results),
            cached: Arc::clone(&self.cached),
            errors: Arc::clone(&self.errors),
            denied: Arc::clone(&self.denied),
            calls: Arc::clone(&self.calls),
            latency_ms: self.latency_ms,
            backend_name: self.backend_name,
        }
    }
}

#[async_trait::async_trait]
impl QueryBackend for MockBackend {
    fn name(&self) -> &'static str {
        self.backend_name
    }

    async fn resolve(&self, id: u64, principal: &Principal) -> Result<ResolvedQuery, BackendError> {
        self.record(BackendCall::Resolve(id)).await;
        self.simulate_latency().await;

        let query = self
            .queries
            .read()
            .await
            .get(&id)
            .filter(|q| q.org_id == principal.org_id)
            .cloned()
            .ok_or(BackendError::NotFound(id))?;

        if self.denied.read().await.contains(&id) {
            return Err(BackendError::AccessDenied {
                id,
                data_source: query.data_source.name,
            });
        }

        Ok(query)
    }

    async fn cached_result(
        &self,
        query: &ResolvedQuery,
        max_age: Option<Duration>,
    ) -> Result<Option<ResultSet>, BackendError> {
        self.record(BackendCall::CachedResult { id: query.id, max_age }).await;
        self.simulate_latency().await;

        Ok(self.cached.read().await.get(&query.query_hash()).cloned())
    }

    async fn execute(&self, query: &ResolvedQuery, _principal: &Principal) -> Result<ResultSet, BackendError> {
        self.record(BackendCall::Execute(query.id)).await;
        self.simulate_latency().await;

        if let Some(error) = self.errors.read().await.get(&query.id) {
            return Err(error.clone());
        }

        self.results
            .read()
            .await
            .get(&query.id)
            .cloned()
            .ok_or_else(|| BackendError::ExecutionFailed(format!("no result configured for query {}", query.id)))
    }
}
