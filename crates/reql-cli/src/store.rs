//! Directory-backed query store
//!
//! Every `*.json` file below the store root defines one saved query:
//!
//! ```json
//! {
//!   "id": 7,
//!   "org_id": 1,
//!   "query": "SELECT * FROM users",
//!   "data_source": { "id": 1, "name": "warehouse", "kind": "external" },
//!   "result": { "columns": [...], "rows": [...] },
//!   "cached": { "retrieved_at": "2024-05-01T12:00:00Z", "data": { ... } },
//!   "allowed_users": [1, 2]
//! }
//! ```
//!
//! `external` queries are "executed" by returning `result`. `reql` queries
//! are run by the federation engine. `cached` is served for non-refresh
//! references while it is younger than the configured maximum age.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reql_core::{DataSourceRef, Principal, ResolvedQuery, ResultSet};
use reql_engine::{BackendError, QueryBackend};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// A saved query file
#[derive(Debug, Clone, Deserialize)]
pub struct SavedQuery {
    pub id: u64,

    #[serde(default = "default_org")]
    pub org_id: u64,

    pub query: String,

    pub data_source: DataSourceRef,

    /// What executing the query returns
    #[serde(default)]
    pub result: Option<ResultSet>,

    /// A previously retrieved result
    #[serde(default)]
    pub cached: Option<CachedResult>,

    /// Users allowed to run the query; everyone when absent
    #[serde(default)]
    pub allowed_users: Option<Vec<u64>>,
}

/// A stored result with its retrieval time
#[derive(Debug, Clone, Deserialize)]
pub struct CachedResult {
    pub retrieved_at: DateTime<Utc>,
    pub data: ResultSet,
}

fn default_org() -> u64 {
    1
}

impl SavedQuery {
    fn resolved(&self) -> ResolvedQuery {
        ResolvedQuery::new(self.id, self.org_id, self.query.clone(), self.data_source.clone())
    }
}

/// Saved queries loaded from a directory tree
pub struct DirectoryBackend {
    queries: HashMap<u64, SavedQuery>,

    /// Cached results by query text hash
    cache: HashMap<String, CachedResult>,
}

impl DirectoryBackend {
    /// Load every query file below `root`
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            anyhow::bail!("Query store {} is not a directory", root.display());
        }

        let mut queries = HashMap::new();
        let mut sources: HashMap<u64, PathBuf> = HashMap::new();
        let mut cache = HashMap::new();

        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let saved: SavedQuery = serde_json::from_str(&content)
                .with_context(|| format!("Invalid saved query in {}", path.display()))?;

            if let Some(previous) = sources.insert(saved.id, path.to_path_buf()) {
                anyhow::bail!(
                    "Query id {} is defined twice: {} and {}",
                    saved.id,
                    previous.display(),
                    path.display()
                );
            }

            if let Some(cached) = &saved.cached {
                cache.insert(saved.resolved().query_hash(), cached.clone());
            }
            queries.insert(saved.id, saved);
        }

        tracing::debug!("Loaded {} saved queries from {}", queries.len(), root.display());
        Ok(Self { queries, cache })
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[async_trait::async_trait]
impl QueryBackend for DirectoryBackend {
    fn name(&self) -> &'static str {
        "Directory"
    }

    async fn resolve(&self, id: u64, principal: &Principal) -> Result<ResolvedQuery, BackendError> {
        let saved = self
            .queries
            .get(&id)
            .filter(|q| q.org_id == principal.org_id)
            .ok_or(BackendError::NotFound(id))?;

        if let Some(allowed) = &saved.allowed_users {
            if !allowed.contains(&principal.user_id) {
                return Err(BackendError::AccessDenied {
                    id,
                    data_source: saved.data_source.name.clone(),
                });
            }
        }

        Ok(saved.resolved())
    }

    async fn cached_result(
        &self,
        query: &ResolvedQuery,
        max_age: Option<Duration>,
    ) -> Result<Option<ResultSet>, BackendError> {
        let Some(cached) = self.cache.get(&query.query_hash()) else {
            return Ok(None);
        };

        let fresh = match max_age {
            None => true,
            Some(max_age) => {
                let age = Utc::now().signed_duration_since(cached.retrieved_at);
                age.to_std().map_or(true, |age| age <= max_age)
            }
        };

        Ok(fresh.then(|| cached.data.clone()))
    }

    async fn execute(&self, query: &ResolvedQuery, _principal: &Principal) -> Result<ResultSet, BackendError> {
        self.queries
            .get(&query.id)
            .and_then(|saved| saved.result.clone())
            .ok_or_else(|| {
                BackendError::ExecutionFailed(format!("query {} has no stored result", query.id))
            })
    }
}
