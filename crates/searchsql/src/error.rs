//! SQL error types

use thiserror::Error;

/// Errors raised while compiling, executing, or decoding a query
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Malformed interval: {0}")]
    MalformedInterval(String),

    #[error("Unable to identify column for aggregation named {0}")]
    UnresolvedAggregationName(String),

    #[error("Unsupported aggregation shape: {0}")]
    UnsupportedAggregationShape(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Timeout: query exceeded {0}ms limit")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
