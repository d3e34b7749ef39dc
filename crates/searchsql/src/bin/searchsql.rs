//! searchsql
//!
//! Runs one SQL statement against a search engine and prints the result as
//! JSON.
//!
//! ```bash
//! export SEARCHSQL_URL=http://localhost:9200
//! searchsql "SELECT city, count(*) FROM sales GROUP BY city"
//! searchsql --explain "SELECT avg(price) FROM sales"
//! ```
//!
//! Logging goes to stderr and follows `RUST_LOG` (default `info`).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use searchsql::{HttpTransport, QueryExecutor, SessionConfig};

#[derive(Parser)]
#[command(name = "searchsql")]
#[command(about = "Run SQL against a search engine's aggregation API", long_about = None)]
struct Cli {
    /// Engine endpoint
    #[arg(
        short,
        long,
        env = "SEARCHSQL_URL",
        default_value = "http://localhost:9200"
    )]
    url: String,

    /// Maximum bucket count per terms level and hit count per search
    #[arg(long, default_value_t = 10_000)]
    fetch_size: usize,

    /// Engine call timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print the compiled request instead of running it
    #[arg(long)]
    explain: bool,

    /// SQL statement
    sql: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = SessionConfig {
        endpoint: cli.url.trim_end_matches('/').to_string(),
        ..SessionConfig::default()
    }
    .with_fetch_size(cli.fetch_size)
    .with_timeout_ms(cli.timeout_ms);

    let transport = HttpTransport::new(&config).context("Failed to create HTTP transport")?;
    let executor = QueryExecutor::new(Arc::new(transport), config);

    let result = if cli.explain {
        executor
            .explain(&cli.sql)
            .context("Failed to explain query")?
            .into_query_result(0)
    } else {
        executor
            .execute(&cli.sql)
            .await
            .with_context(|| format!("Query failed against {}", cli.url))?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
