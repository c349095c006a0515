//! ReQL Core
//!
//! Domain model shared by the parser, the federation engine and the CLI.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod result;
pub mod query;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use result::{Column, ColumnType, ResultSet, Row, Value};
pub use query::{DataSourceKind, DataSourceRef, Position, Principal, QueryReference, ResolvedQuery};
pub use config::{CacheConfig, Config, ConfigError, DialectConfig, EngineConfig};
