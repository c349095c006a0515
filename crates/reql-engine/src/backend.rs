//! Query backend trait for resolving and running referenced queries

use reql_core::{Principal, ResolvedQuery, ResultSet};
use std::time::Duration;

/// Errors a backend reports while resolving or running a query
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Query id {0} not found")]
    NotFound(u64),

    #[error("Access denied to data source {data_source} (query id {id})")]
    AccessDenied { id: u64, data_source: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Collaborator the federation engine resolves `query_<id>` references through
#[async_trait::async_trait]
pub trait QueryBackend: Send + Sync {
    /// Get the backend name (e.g., "Directory", "Mock")
    fn name(&self) -> &'static str;

    /// Look up a saved query on behalf of `principal`
    ///
    /// Fails with [`BackendError::NotFound`] when the query does not exist or
    /// belongs to another organization, and with [`BackendError::AccessDenied`]
    /// when the principal may not run queries on its data source.
    async fn resolve(&self, id: u64, principal: &Principal) -> Result<ResolvedQuery, BackendError>;

    /// Latest stored result for the query text, no older than `max_age`
    ///
    /// `None` accepts results of any age.
    async fn cached_result(
        &self,
        query: &ResolvedQuery,
        max_age: Option<Duration>,
    ) -> Result<Option<ResultSet>, BackendError>;

    /// Run a query on its own data source
    ///
    /// Only called for queries whose data source is not federated; those are
    /// executed by the engine itself.
    async fn execute(&self, query: &ResolvedQuery, principal: &Principal) -> Result<ResultSet, BackendError>;
}
