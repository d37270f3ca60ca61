//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;

use crate::backend::Backend;
use crate::config::Config;
use crate::query::QueryExecutor;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Backend collaborator for metadata and writes
    pub backend: Arc<dyn Backend>,
    /// Query executor over the same backend
    pub executor: Arc<QueryExecutor>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Create state for a backend, building the executor from `config.query`
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Self {
        let executor = Arc::new(QueryExecutor::new(
            Arc::clone(&backend),
            config.query.clone(),
        ));
        Self {
            backend,
            executor,
            config: Arc::new(config),
        }
    }
}
