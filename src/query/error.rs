//! Query error types
//!
//! Defines all error conditions that can occur during query parsing and execution.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// The request did not carry a `start` parameter
    #[error("Missing start parameter")]
    MissingStart,

    /// Metric-query token or search-lookup query could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Time expression could not be interpreted
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    /// Unknown filter type or malformed filter
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Malformed downsample specification
    #[error("Invalid downsample: {0}")]
    InvalidDownsample(String),

    /// Malformed or unsupported expression
    #[error("Expression error: {0}")]
    Expression(String),

    /// Search lookup query rejected
    #[error("{0}")]
    InvalidLookup(String),

    /// Aggregator name reached the combine stage without being recognised
    #[error("Unrecognized aggregator: {0}")]
    UnknownAggregator(String),

    /// Backend collaborator failed or lacks a capability
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl QueryError {
    /// True for errors caused by the caller's input rather than the engine or backend
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingStart
                | Self::Parse(_)
                | Self::InvalidTime(_)
                | Self::InvalidFilter(_)
                | Self::InvalidDownsample(_)
                | Self::Expression(_)
                | Self::InvalidLookup(_)
        )
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
