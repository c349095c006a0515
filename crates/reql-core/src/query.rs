//! Federation references and the saved queries they resolve to

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 1-based position inside statement text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {} column {}", self.line, self.column)
    }
}

/// A `query_<id>` table reference found in a statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryReference {
    /// Identifier as written, after unquoting
    pub name: String,

    /// Numeric id of the referenced query
    pub id: u64,

    /// Whether the name carries the `_refresh` suffix
    pub refresh: bool,

    /// Line of the identifier token
    pub line: usize,

    /// Column of the identifier token
    pub column: usize,
}

impl QueryReference {
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

/// Who is running a query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: u64,
    pub org_id: u64,
}

impl Principal {
    pub fn new(user_id: u64, org_id: u64) -> Self {
        Self { user_id, org_id }
    }
}

/// How the data source of a saved query executes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    /// The query is itself written in the federated dialect
    Reql,

    /// The query runs on a backend-owned engine
    External,
}

/// Data source a saved query belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceRef {
    pub id: u64,
    pub name: String,
    pub kind: DataSourceKind,
}

impl DataSourceRef {
    pub fn new(id: u64, name: impl Into<String>, kind: DataSourceKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    pub fn is_federated(&self) -> bool {
        self.kind == DataSourceKind::Reql
    }
}

/// A saved query the acting principal is allowed to run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedQuery {
    /// Query id
    pub id: u64,

    /// Organization that owns the query
    pub org_id: u64,

    /// Query text
    pub text: String,

    /// Data source the query runs on
    pub data_source: DataSourceRef,
}

impl ResolvedQuery {
    pub fn new(id: u64, org_id: u64, text: impl Into<String>, data_source: DataSourceRef) -> Self {
        Self {
            id,
            org_id,
            text: text.into(),
            data_source,
        }
    }

    /// Hex SHA-256 of the query text, the key cached results are stored under
    pub fn query_hash(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }
}
