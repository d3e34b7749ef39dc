//! SQL over a search engine's aggregation API
//!
//! Compiles `SELECT` statements into search requests, runs them through a
//! [`SearchTransport`], and turns the nested aggregation response back into
//! flat rows. Queries over a subquery are reduced in memory.
//!
//! ## Supported SQL
//!
//! ```sql
//! -- Document search
//! SELECT city, price FROM sales WHERE price > 10 ORDER BY price DESC LIMIT 20;
//!
//! -- Ungrouped metrics (one filter bucket)
//! SELECT count(*), avg(price) FROM sales WHERE city = 'Utrecht';
//!
//! -- Nested buckets, metrics on the deepest level
//! SELECT city, shop, sum(qty) AS total, count(*) FROM sales GROUP BY city, shop;
//!
//! -- Time buckets
//! SELECT date_histogram("@timestamp", '1h') AS hour, max(latency) FROM logs GROUP BY hour;
//!
//! -- Pipeline: reduce the rows of an inner aggregation
//! SELECT max(n), avg(n), growth(n, hour, NOW('+1h')) AS next
//! FROM (SELECT date_histogram("@timestamp", '1h') AS hour, count(*) AS n
//!       FROM logs GROUP BY hour);
//!
//! -- Show the compiled request
//! EXPLAIN SELECT city, count(*) FROM sales GROUP BY city;
//! ```
//!
//! ## Limitations
//!
//! - No JOINs and no correlated subqueries
//! - No `SELECT *`; every projected column must be named
//! - Read-only: INSERT/UPDATE/DELETE and DDL are rejected

pub mod column;
pub mod compiler;
pub mod config;
pub mod decoder;
mod error;
pub mod executor;
pub mod filter;
pub mod interval;
pub mod pipeline;
pub mod planner;
pub mod response;
pub mod transport;
mod types;

pub use column::{Column, Heading, OpArg, Operation};
pub use compiler::{AggregationNode, MetricKind};
pub use config::SessionConfig;
pub use error::SqlError;
pub use executor::QueryExecutor;
pub use planner::{plan_query, QueryPlan};
pub use response::{AggregationResult, Bucket};
pub use transport::{HttpTransport, SearchTransport};
pub use types::*;

/// Result type for SQL operations
pub type Result<T> = std::result::Result<T, SqlError>;
