//! ReQL federation engine
//!
//! This crate handles:
//! - Resolving `query_<id>` references through a [`QueryBackend`]
//! - Choosing between cached and fresh results, refresh references first
//! - Materializing results into an ephemeral in-memory SQLite database
//! - Running the statement and inferring output column types
//! - Cancellation and the guard against self-referencing queries

pub mod backend;
pub mod mock;
pub mod ephemeral;
pub mod inference;
pub mod plan;
pub mod error;
pub mod federation;

pub use backend::{BackendError, QueryBackend};
pub use mock::{BackendCall, MockBackend};
pub use ephemeral::{quote_identifier, unique_column_names, EphemeralStore, StatementOutput, StoreError};
pub use inference::{guess_type, infer_column_types, TypeInference};
pub use plan::{PlannedQuery, ResolutionPlan};
pub use error::FederationError;
pub use federation::{ExecutionOutcome, Federation};
