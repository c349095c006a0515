//! Federation failures and their diagnostics

use crate::ephemeral::StoreError;
use reql_core::{Diagnostic, DiagnosticCode, Location, Position, Severity};
use reql_sql::{GrammarError, ParseError, UnexpandedBlock};
use thiserror::Error;

/// Every way a federated execution can fail
///
/// Cancellation is not an error; it is reported as an outcome.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Grammar error: {0}")]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    UnexpandedBlock(#[from] UnexpandedBlock),

    #[error("Only one statement can be run at a time, found {count} (second at {position}).")]
    MultipleStatements { count: usize, position: Position },

    /// The referenced query is missing, foreign or not runnable by the principal
    #[error("{message}")]
    Permission {
        id: u64,
        position: Position,
        message: String,
    },

    /// The referenced query could not produce a result
    #[error("Failed loading results for query id {id} (at {position}). {cause}")]
    Execution {
        id: u64,
        position: Position,
        cause: String,
    },

    #[error("Memory limit of {limit_bytes} bytes exceeded ({attempted_bytes} bytes needed)")]
    ResourceLimit {
        limit_bytes: u64,
        attempted_bytes: u64,
        table: Option<String>,
    },

    /// The query is already being executed further up the reference chain
    #[error("Query id {id} references itself (at {position}).")]
    Cycle { id: u64, position: Position },

    #[error("Ephemeral store error: {0}")]
    Store(StoreError),

    #[error("Worker task failed: {0}")]
    Runtime(String),
}

impl From<StoreError> for FederationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ResourceLimit {
                limit_bytes,
                attempted_bytes,
                table,
            } => FederationError::ResourceLimit {
                limit_bytes,
                attempted_bytes,
                table,
            },
            other => FederationError::Store(other),
        }
    }
}

impl From<tokio::task::JoinError> for FederationError {
    fn from(error: tokio::task::JoinError) -> Self {
        FederationError::Runtime(error.to_string())
    }
}

impl FederationError {
    pub(crate) fn not_found(id: u64, position: Position) -> Self {
        FederationError::Permission {
            id,
            position,
            message: format!("Query id {} not found. (at {})", id, position),
        }
    }

    pub(crate) fn access_denied(id: u64, data_source: &str, position: Position) -> Self {
        FederationError::Permission {
            id,
            position,
            message: format!(
                "You are not allowed to execute queries on {} data source (used for query id {}). (at {})",
                data_source, id, position
            ),
        }
    }

    /// Stable diagnostic code for this failure
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::Grammar(_) => DiagnosticCode::ReqlGrammarError,
            Self::Parse(_) => DiagnosticCode::ReqlSyntaxError,
            Self::UnexpandedBlock(_) => DiagnosticCode::ReqlUnexpandedBlock,
            Self::MultipleStatements { .. } => DiagnosticCode::ReqlMultipleStatements,
            Self::Permission { .. } => DiagnosticCode::ReqlPermissionDenied,
            Self::Execution { .. } | Self::Runtime(_) => DiagnosticCode::ReqlExecutionFailed,
            Self::ResourceLimit { .. } => DiagnosticCode::ReqlResourceLimit,
            Self::Cycle { .. } => DiagnosticCode::ReqlCycleDetected,
            Self::Store(_) => DiagnosticCode::ReqlStoreError,
        }
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        if let Self::Parse(error) = self {
            return error.to_diagnostic();
        }

        let mut diagnostic = Diagnostic::new(self.code(), Severity::Error, self.to_string());

        match self {
            Self::Permission { id, position, .. }
            | Self::Execution { id, position, .. }
            | Self::Cycle { id, position } => {
                diagnostic = diagnostic
                    .with_query(*id)
                    .with_location(Location::new(position.line, position.column));
            }
            Self::UnexpandedBlock(block) => {
                diagnostic = diagnostic
                    .with_location(Location::new(block.position.line, block.position.column))
                    .with_hint("Expand expression and folded blocks before execution");
            }
            Self::MultipleStatements { position, .. } => {
                diagnostic = diagnostic
                    .with_location(Location::new(position.line, position.column))
                    .with_hint("Submit each statement separately");
            }
            Self::ResourceLimit { table, .. } => {
                let hint = match table {
                    Some(table) => format!("Raise engine.memory_limit or reduce the rows of {}", table),
                    None => "Raise engine.memory_limit".to_string(),
                };
                diagnostic = diagnostic.with_hint(hint);
            }
            _ => {}
        }

        diagnostic
    }
}
