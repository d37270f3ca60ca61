//! # tsdb-shim
//!
//! OpenTSDB-compatible HTTP query surface over a pluggable time-series
//! backend.
//!
//! ## Modules
//!
//! - [`query`]: Metric-query parsing, filtering, grouping, downsampling,
//!   series combination and expressions
//! - [`backend`]: The backend collaborator trait and an in-memory backend
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsdb_shim::backend::MemoryBackend;
//! use tsdb_shim::config::QueryConfig;
//! use tsdb_shim::query::{QueryExecutor, QueryOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let executor = QueryExecutor::new(backend, QueryConfig::default());
//!
//!     let series = executor
//!         .execute_str(
//!             Some("1h-ago"),
//!             None,
//!             &["sum:10s-avg:sys.cpu.user{host=*}".to_string()],
//!             QueryOptions::default(),
//!         )
//!         .await?;
//!
//!     println!("{}", serde_json::to_string(&series)?);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod query;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState};
pub use backend::{Backend, BackendError, MemoryBackend};
pub use config::{Config, ConfigError};
pub use query::{CombinedSeries, QueryError, QueryExecutor, QueryOptions};
