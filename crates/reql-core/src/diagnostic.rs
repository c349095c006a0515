//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Parsing (1xxx)
    /// The statement does not match the grammar
    ReqlSyntaxError,

    /// A grammar definition could not be loaded
    ReqlGrammarError,

    /// An expression or folded block reached execution without being expanded
    ReqlUnexpandedBlock,

    /// More than one statement was submitted for execution
    ReqlMultipleStatements,

    // Federation (2xxx)
    /// A referenced query does not exist or is not accessible
    ReqlPermissionDenied,

    /// A referenced query failed to execute
    ReqlExecutionFailed,

    /// A query references itself, directly or transitively
    ReqlCycleDetected,

    // Ephemeral store (3xxx)
    /// The configured memory limit was exceeded while materializing results
    ReqlResourceLimit,

    /// The embedded engine reported an error
    ReqlStoreError,

    // Outcomes (9xxx)
    /// The statement completed without producing columns
    ReqlNoData,

    /// The execution was cancelled by the caller
    ReqlCancelled,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReqlSyntaxError => "REQL_SYNTAX_ERROR",
            Self::ReqlGrammarError => "REQL_GRAMMAR_ERROR",
            Self::ReqlUnexpandedBlock => "REQL_UNEXPANDED_BLOCK",
            Self::ReqlMultipleStatements => "REQL_MULTIPLE_STATEMENTS",
            Self::ReqlPermissionDenied => "REQL_PERMISSION_DENIED",
            Self::ReqlExecutionFailed => "REQL_EXECUTION_FAILED",
            Self::ReqlCycleDetected => "REQL_CYCLE_DETECTED",
            Self::ReqlResourceLimit => "REQL_RESOURCE_LIMIT",
            Self::ReqlStoreError => "REQL_STORE_ERROR",
            Self::ReqlNoData => "REQL_NO_DATA",
            Self::ReqlCancelled => "REQL_CANCELLED",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - the query ran but the outcome needs attention
    Warn,

    /// Error - the query could not run
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location inside a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File the statement was read from, if any
    pub file: Option<String>,

    /// Line number (1-indexed)
    pub line: usize,

    /// Column number (1-indexed)
    pub column: usize,
}

impl Location {
    /// Create a location inside an anonymous statement
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            file: None,
            line,
            column,
        }
    }

    /// Attach the file the statement came from
    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "line {} column {}", self.line, self.column),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Query id the diagnostic refers to, for federation failures
    pub query_id: Option<u64>,

    /// Suggested remedy
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            query_id: None,
            hint: None,
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the query id
    pub fn with_query(mut self, query_id: u64) -> Self {
        self.query_id = Some(query_id);
        self
    }

    /// Set a remedy hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
