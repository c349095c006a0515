//! Federation orchestrator
//!
//! Runs a statement that references other saved queries as tables:
//!
//! 1. Parse the statement, render verbatim blocks and extract references
//! 2. Plan resolution, one entry per referenced query id
//! 3. Resolve each query, then reuse a cached result or execute it
//! 4. Materialize every result into a private in-memory database
//! 5. Run the statement there and infer the output column types
//!
//! Queries whose data source is itself federated are executed recursively,
//! each level with its own ephemeral store. The ids being executed on the
//! current chain are tracked so that a query reaching itself again fails
//! instead of recursing forever.

use crate::backend::{BackendError, QueryBackend};
use crate::ephemeral::{unique_column_names, EphemeralStore, StatementOutput, StoreError};
use crate::error::FederationError;
use crate::inference::infer_column_types;
use crate::plan::{PlannedQuery, ResolutionPlan};
use reql_core::{
    Column, Config, Diagnostic, DiagnosticCode, Position, Principal, QueryReference, ResolvedQuery,
    ResultSet, Severity,
};
use reql_sql::{extract_references, pass_verbatim, render, ReqlParser};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const NO_DATA_MESSAGE: &str = "Query completed but it returned no data.";
const CANCELLED_MESSAGE: &str = "Query cancelled by user.";

/// How a top-level execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The statement produced columns
    Completed(ResultSet),

    /// The statement ran but has no result columns
    NoData,

    /// The cancellation token fired before the statement finished
    Cancelled,
}

impl ExecutionOutcome {
    /// User-facing message for outcomes without a result
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Completed(_) => None,
            Self::NoData => Some(NO_DATA_MESSAGE),
            Self::Cancelled => Some(CANCELLED_MESSAGE),
        }
    }

    pub fn into_result(self) -> Option<ResultSet> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// Diagnostic for outcomes without a result
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        match self {
            Self::Completed(_) => None,
            Self::NoData => Some(Diagnostic::new(
                DiagnosticCode::ReqlNoData,
                Severity::Warn,
                NO_DATA_MESSAGE,
            )),
            Self::Cancelled => Some(Diagnostic::new(
                DiagnosticCode::ReqlCancelled,
                Severity::Info,
                CANCELLED_MESSAGE,
            )),
        }
    }
}

/// Why an execution stopped early
enum Abort {
    Cancelled,
    Failed(FederationError),
}

impl From<FederationError> for Abort {
    fn from(error: FederationError) -> Self {
        Abort::Failed(error)
    }
}

impl From<StoreError> for Abort {
    fn from(error: StoreError) -> Self {
        Abort::Failed(error.into())
    }
}

impl From<tokio::task::JoinError> for Abort {
    fn from(error: tokio::task::JoinError) -> Self {
        Abort::Failed(error.into())
    }
}

/// A statement ready to run
struct Prepared {
    /// Text with verbatim blocks replaced by their contents
    text: String,
    references: Vec<QueryReference>,
    /// Only separators and comments
    empty: bool,
}

type StatementFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<ResultSet>, Abort>> + Send + 'a>>;

/// Executes federated statements against a query backend
pub struct Federation {
    parser: Arc<ReqlParser>,
    backend: Arc<dyn QueryBackend>,
    memory_limit: Option<u64>,
    max_age: Option<Duration>,
    cancel: CancellationToken,
}

impl Federation {
    /// Build the parser described by `config` and attach the backend
    pub fn new(config: &Config, backend: Arc<dyn QueryBackend>) -> Result<Self, FederationError> {
        let parser = ReqlParser::from_config(config)?;
        Ok(Self::with_parser(Arc::new(parser), config, backend))
    }

    /// Share an already built parser
    pub fn with_parser(parser: Arc<ReqlParser>, config: &Config, backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            parser,
            backend,
            memory_limit: config.engine.memory_limit,
            max_age: config.cache.max_age(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels executions of this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Statement used to check that the engine works at all
    pub fn noop_query() -> &'static str {
        "SELECT 1"
    }

    pub fn parser(&self) -> &ReqlParser {
        &self.parser
    }

    /// References of a statement, in document order
    pub fn references(&self, text: &str) -> Result<Vec<QueryReference>, FederationError> {
        let tree = self.parser.parse(text)?;
        Ok(extract_references(&tree))
    }

    /// Run a top-level statement on behalf of `principal`
    pub async fn run(&self, text: &str, principal: &Principal) -> Result<ExecutionOutcome, FederationError> {
        let mut in_progress = HashSet::new();
        match self.execute_statement(text, principal, &mut in_progress).await {
            Ok(Some(result)) => Ok(ExecutionOutcome::Completed(result)),
            Ok(None) => Ok(ExecutionOutcome::NoData),
            Err(Abort::Cancelled) => {
                info!("Execution cancelled");
                Ok(ExecutionOutcome::Cancelled)
            }
            Err(Abort::Failed(error)) => Err(error),
        }
    }

    /// Parse, render and extract; the tree never outlives this call
    fn prepare(&self, text: &str) -> Result<Prepared, FederationError> {
        let tree = self.parser.parse(text)?;

        let count = tree.child_nodes().count();
        if let Some(second) = tree.child_nodes().nth(1) {
            let position = second
                .first_token()
                .map(|token| token.position())
                .unwrap_or_else(|| Position::new(1, 1));
            return Err(FederationError::MultipleStatements { count, position });
        }

        let prepared = Prepared {
            text: render(text, &tree, pass_verbatim)?,
            references: extract_references(&tree),
            empty: tree.child_nodes().next().is_none(),
        };
        Ok(prepared)
    }

    fn execute_statement<'a>(
        &'a self,
        text: &'a str,
        principal: &'a Principal,
        in_progress: &'a mut HashSet<u64>,
    ) -> StatementFuture<'a> {
        Box::pin(async move {
            let prepared = self.prepare(text)?;
            if prepared.empty {
                return Ok(None);
            }

            let plan = ResolutionPlan::new(&prepared.references);
            debug!("Resolving {} referenced queries", plan.len());

            let store = Arc::new(Mutex::new(EphemeralStore::open(self.memory_limit)?));
            let outcome = self
                .populate_and_query(&store, prepared.text, &plan, principal, in_progress)
                .await;
            teardown(store);
            outcome
        })
    }

    async fn populate_and_query(
        &self,
        store: &Arc<Mutex<EphemeralStore>>,
        rendered: String,
        plan: &ResolutionPlan,
        principal: &Principal,
        in_progress: &mut HashSet<u64>,
    ) -> Result<Option<ResultSet>, Abort> {
        for planned in plan {
            if self.cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }

            let result = Arc::new(self.load(planned, principal, in_progress).await?);
            let names = planned.names.clone();
            let target = Arc::clone(store);
            tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
                let mut store = target.blocking_lock();
                for name in &names {
                    store.materialize(name, &result)?;
                }
                Ok(())
            })
            .await??;
        }

        self.query(store, rendered).await
    }

    /// Run the final statement, interrupting it on cancellation
    async fn query(&self, store: &Arc<Mutex<EphemeralStore>>, rendered: String) -> Result<Option<ResultSet>, Abort> {
        let interrupt = store.lock().await.interrupt_handle();
        let target = Arc::clone(store);
        let token = self.cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            if token.is_cancelled() {
                return Err(StoreError::Interrupted);
            }
            let store = target.blocking_lock();
            store.execute(&rendered)
        });

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                interrupt.interrupt();
                return Err(Abort::Cancelled);
            }
            joined = task => joined?,
        };

        match output {
            Ok(StatementOutput::Rows { columns, rows }) => {
                let types = infer_column_types(columns.len(), &rows);
                let columns = unique_column_names(columns.iter().map(String::as_str))
                    .into_iter()
                    .zip(types)
                    .map(|(name, column_type)| Column::new(name, column_type))
                    .collect();
                Ok(Some(ResultSet::from_values(columns, rows)))
            }
            Ok(StatementOutput::NoData) => Ok(None),
            Err(StoreError::Interrupted) if self.cancel.is_cancelled() => Err(Abort::Cancelled),
            Err(error) => Err(error.into()),
        }
    }

    /// Resolve one planned query and obtain its result
    async fn load(
        &self,
        planned: &PlannedQuery,
        principal: &Principal,
        in_progress: &mut HashSet<u64>,
    ) -> Result<ResultSet, Abort> {
        let query = self.resolve(planned, principal).await?;

        if query.data_source.is_federated() && in_progress.contains(&query.id) {
            return Err(FederationError::Cycle {
                id: query.id,
                position: planned.position,
            }
            .into());
        }

        if !planned.refresh {
            let cached = self
                .cancellable(self.backend.cached_result(&query, self.max_age))
                .await?
                .map_err(|e| execution_failed(planned, e))?;
            if let Some(result) = cached {
                info!("Using cached results for query {}", query.id);
                return Ok(result);
            }
        }

        info!("Running query {} to get new results", query.id);
        if query.data_source.is_federated() {
            self.execute_federated(&query, planned, principal, in_progress).await
        } else {
            self.cancellable(self.backend.execute(&query, principal))
                .await?
                .map_err(|e| execution_failed(planned, e).into())
        }
    }

    async fn resolve(&self, planned: &PlannedQuery, principal: &Principal) -> Result<ResolvedQuery, Abort> {
        let resolved = self.cancellable(self.backend.resolve(planned.id, principal)).await?;

        match resolved {
            Ok(query) if query.org_id == principal.org_id => Ok(query),
            Ok(_) | Err(BackendError::NotFound(_)) => {
                Err(FederationError::not_found(planned.id, planned.position).into())
            }
            Err(BackendError::AccessDenied { data_source, .. }) => {
                Err(FederationError::access_denied(planned.id, &data_source, planned.position).into())
            }
            Err(error) => Err(execution_failed(planned, error).into()),
        }
    }

    async fn execute_federated(
        &self,
        query: &ResolvedQuery,
        planned: &PlannedQuery,
        principal: &Principal,
        in_progress: &mut HashSet<u64>,
    ) -> Result<ResultSet, Abort> {
        in_progress.insert(query.id);
        let outcome = self.execute_statement(&query.text, principal, in_progress).await;
        in_progress.remove(&query.id);

        match outcome {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(FederationError::Execution {
                id: query.id,
                position: planned.position,
                cause: NO_DATA_MESSAGE.to_string(),
            }
            .into()),
            Err(Abort::Failed(
                error @ (FederationError::Cycle { .. } | FederationError::ResourceLimit { .. }),
            )) => Err(error.into()),
            Err(Abort::Failed(error)) => Err(FederationError::Execution {
                id: query.id,
                position: planned.position,
                cause: error.to_string(),
            }
            .into()),
            Err(Abort::Cancelled) => Err(Abort::Cancelled),
        }
    }

    /// Race a collaborator call against cancellation
    async fn cancellable<T>(&self, call: impl Future<Output = T>) -> Result<T, Abort> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Abort::Cancelled),
            value = call => Ok(value),
        }
    }
}

fn execution_failed(planned: &PlannedQuery, error: BackendError) -> FederationError {
    FederationError::Execution {
        id: planned.id,
        position: planned.position,
        cause: error.to_string(),
    }
}

/// Close the store if no worker still holds it; dropping it closes it otherwise
fn teardown(store: Arc<Mutex<EphemeralStore>>) {
    match Arc::try_unwrap(store) {
        Ok(store) => {
            if let Err(error) = store.into_inner().close() {
                warn!("Failed to close ephemeral store: {}", error);
            }
        }
        Err(_) => debug!("Ephemeral store still busy, closing on drop"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use reql_core::{ColumnType, Value};

    fn federation(backend: &MockBackend) -> Federation {
        Federation::new(&Config::default(), Arc::new(backend.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_statement_without_references() {
        let backend = MockBackend::new();
        let outcome = federation(&backend)
            .run(Federation::noop_query(), &Principal::new(1, 1))
            .await
            .unwrap();

        let result = outcome.into_result().unwrap();
        assert_eq!(result.columns, vec![Column::new("1", ColumnType::Integer)]);
        assert_eq!(result.rows[0]["1"], Value::Integer(1));
        assert!(backend.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_verbatim_blocks_reach_the_engine() {
        let backend = MockBackend::new();
        let outcome = federation(&backend)
            .run("SELECT [= 40 + 2 =] AS answer", &Principal::new(1, 1))
            .await
            .unwrap();

        let result = outcome.into_result().unwrap();
        assert_eq!(result.rows[0]["answer"], Value::Integer(42));
    }

    #[tokio::test]
    async fn test_expression_blocks_are_rejected() {
        let backend = MockBackend::new();
        let error = federation(&backend)
            .run("SELECT [: now() :] AS t", &Principal::new(1, 1))
            .await
            .unwrap_err();

        assert_eq!(error.code(), DiagnosticCode::ReqlUnexpandedBlock);
    }

    #[tokio::test]
    async fn test_duplicate_output_columns_are_renamed() {
        let backend = MockBackend::new();
        let outcome = federation(&backend)
            .run("SELECT 1 AS id, 'x' AS id", &Principal::new(1, 1))
            .await
            .unwrap();

        let result = outcome.into_result().unwrap();
        assert_eq!(result.column_names(), vec!["id", "id1"]);
        assert_eq!(result.rows[0]["id1"], Value::from("x"));
    }

    #[tokio::test]
    async fn test_folded_blocks_are_rejected() {
        let backend = MockBackend::new();
        let error = federation(&backend)
            .run("SELECT * FROM t WHERE [< active >]", &Principal::new(1, 1))
            .await
            .unwrap_err();

        match error {
            FederationError::UnexpandedBlock(block) => {
                assert_eq!(block.kind, reql_sql::BlockKind::Folded);
                assert_eq!(block.position, reql_core::Position::new(1, 23));
            }
            other => panic!("expected an unexpanded block, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            ExecutionOutcome::NoData.message(),
            Some("Query completed but it returned no data.")
        );
        assert_eq!(ExecutionOutcome::Cancelled.message(), Some("Query cancelled by user."));
        assert_eq!(
            ExecutionOutcome::Cancelled.to_diagnostic().map(|d| d.code),
            Some(DiagnosticCode::ReqlCancelled)
        );
        assert!(ExecutionOutcome::Completed(ResultSet::default()).message().is_none());
    }
}
