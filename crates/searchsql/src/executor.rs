//! SQL query executor

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::{debug, info};

use crate::column::{Column, Heading};
use crate::compiler::build_search_body;
use crate::config::SessionConfig;
use crate::decoder::decode;
use crate::error::SqlError;
use crate::pipeline;
use crate::planner::{plan_query, PlanKind, QueryPlan};
use crate::response::{parse_aggregations, parse_hits};
use crate::transport::SearchTransport;
use crate::types::{Cell, QueryResult, ResultSet};
use crate::Result;

/// Column name of the single `EXPLAIN` output column.
pub const EXPLANATION_COLUMN: &str = "Explanation";

/// SQL query executor
pub struct QueryExecutor {
    transport: Arc<dyn SearchTransport>,
    config: SessionConfig,
}

impl QueryExecutor {
    /// Create a new executor over `transport`
    pub fn new(transport: Arc<dyn SearchTransport>, config: SessionConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Execute a SQL statement (`SELECT` or `EXPLAIN SELECT`)
    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        let result = match parse_statement(sql)? {
            Statement::Query(query) => {
                let plan = plan_query(&query)?;
                self.execute_plan(&plan).await?
            }
            Statement::Explain { statement, .. } => self.explain_statement(&statement)?,
            other => {
                return Err(SqlError::UnsupportedOperation(format!(
                    "Only SELECT queries are supported, got: {}",
                    other
                )))
            }
        };

        let execution_time_ms = start.elapsed().as_millis() as u64;
        info!(
            rows = result.len(),
            elapsed_ms = execution_time_ms,
            "query executed"
        );
        Ok(result.into_query_result(execution_time_ms))
    }

    /// Run the innermost level against the engine, then every enclosing
    /// pipeline level in memory.
    pub async fn execute_plan(&self, plan: &QueryPlan) -> Result<ResultSet> {
        let levels = plan.levels();
        let (innermost, outer) = levels
            .split_first()
            .ok_or_else(|| SqlError::Compile("empty query plan".to_string()))?;

        let mut result = self.fetch(innermost).await?;
        finish(&mut result, innermost);

        for level in outer {
            result = pipeline::apply(result, level)?;
            finish(&mut result, level);
        }
        Ok(result)
    }

    /// Send one level to the engine and decode the response.
    async fn fetch(&self, plan: &QueryPlan) -> Result<ResultSet> {
        let index = plan
            .index
            .as_deref()
            .ok_or_else(|| SqlError::Compile("query has no FROM index".to_string()))?;
        let body = build_search_body(plan, &self.config)?;
        debug!(index = %index, body = %body, "compiled search request");

        let timeout_ms = self.config.timeout_ms;
        let response = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.transport.search(index, &body),
        )
        .await
        .map_err(|_| SqlError::Timeout(timeout_ms))??;

        match plan.kind() {
            PlanKind::Search => {
                let rows = parse_hits(&response, &plan.heading)?;
                Ok(ResultSet::with_rows(plan.heading.clone(), rows))
            }
            PlanKind::Aggregation => decode(&parse_aggregations(&response)?, &plan.heading),
            PlanKind::Pipeline => Err(SqlError::Compile(
                "a query over a subquery is not sent to the engine".to_string(),
            )),
        }
    }

    /// Describe what `sql` would send to the engine, without sending it.
    pub fn explain(&self, sql: &str) -> Result<ResultSet> {
        match parse_statement(sql)? {
            Statement::Explain { statement, .. } => self.explain_statement(&statement),
            statement => self.explain_statement(&statement),
        }
    }

    fn explain_statement(&self, statement: &Statement) -> Result<ResultSet> {
        let Statement::Query(query) = statement else {
            return Err(SqlError::UnsupportedOperation(format!(
                "EXPLAIN supports SELECT queries only, got: {}",
                statement
            )));
        };
        let plan = plan_query(query)?;
        let levels = plan.levels();

        let mut steps = Vec::with_capacity(levels.len());
        for level in levels {
            steps.push(match level.kind() {
                PlanKind::Pipeline => json!({
                    "pipeline": {
                        "columns": level.heading.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(),
                        "groupBy": level.group_by.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(),
                    }
                }),
                _ => json!({
                    "index": level.index,
                    "request": build_search_body(level, &self.config)?,
                }),
            });
        }
        let explanation = serde_json::to_string_pretty(&Value::Array(steps))?;

        let mut heading = Heading::new();
        heading.add(Column::field(EXPLANATION_COLUMN))?;
        Ok(ResultSet::with_rows(
            heading,
            vec![vec![Cell::Text(explanation)]],
        ))
    }
}

/// Parse exactly one SQL statement.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let dialect = GenericDialect {};
    let mut ast =
        Parser::parse_sql(&dialect, sql.trim()).map_err(|e| SqlError::Parse(e.to_string()))?;

    match ast.len() {
        0 => Err(SqlError::Parse("Empty query".to_string())),
        1 => Ok(ast.remove(0)),
        n => Err(SqlError::Parse(format!(
            "Expected a single statement, got {}",
            n
        ))),
    }
}

/// ORDER BY then LIMIT on a decoded level.
fn finish(result: &mut ResultSet, plan: &QueryPlan) {
    if let Some(order) = &plan.order_by {
        result.sort_by_label(&order.label, order.descending);
    }
    if let Some(limit) = plan.limit {
        result.truncate(limit);
    }
}
