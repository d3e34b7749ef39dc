//! Compiles GROUP BY keys and projected aggregates into an aggregation tree
//!
//! The tree is always skewed: one bucket level per grouping key, each
//! nesting the next, with every metric attached to the deepest level only.
//! Without grouping keys a single filter bucket carries the metrics.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::column::{Column, Heading, Operation};
use crate::config::SessionConfig;
use crate::error::SqlError;
use crate::interval::interval_from_arg;
use crate::planner::{PlanKind, QueryPlan};
use crate::Result;

/// Name of the single filter bucket used for ungrouped aggregation.
pub const FILTER_AGG_NAME: &str = "filter";

/// Engine metric aggregation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Avg,
    Sum,
    Min,
    Max,
    ValueCount,
}

impl MetricKind {
    fn for_column(column: &Column) -> Option<Self> {
        match column.operator {
            Operation::Avg => Some(MetricKind::Avg),
            Operation::Sum => Some(MetricKind::Sum),
            Operation::Min => Some(MetricKind::Min),
            Operation::Max => Some(MetricKind::Max),
            Operation::Count if column.source_field.is_some() => Some(MetricKind::ValueCount),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Avg => "avg",
            MetricKind::Sum => "sum",
            MetricKind::Min => "min",
            MetricKind::Max => "max",
            MetricKind::ValueCount => "value_count",
        }
    }
}

/// Compiled aggregation request node
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationNode {
    Terms {
        name: String,
        field: String,
        size: usize,
        children: Vec<AggregationNode>,
    },
    DateHistogram {
        name: String,
        field: String,
        interval_ms: i64,
        children: Vec<AggregationNode>,
    },
    Filter {
        name: String,
        filter: Value,
        children: Vec<AggregationNode>,
    },
    Metric {
        name: String,
        kind: MetricKind,
        field: String,
    },
}

impl AggregationNode {
    pub fn name(&self) -> &str {
        match self {
            AggregationNode::Terms { name, .. }
            | AggregationNode::DateHistogram { name, .. }
            | AggregationNode::Filter { name, .. }
            | AggregationNode::Metric { name, .. } => name,
        }
    }

    pub fn children(&self) -> &[AggregationNode] {
        match self {
            AggregationNode::Terms { children, .. }
            | AggregationNode::DateHistogram { children, .. }
            | AggregationNode::Filter { children, .. } => children,
            AggregationNode::Metric { .. } => &[],
        }
    }

    /// Body of this node in the engine's aggregation DSL (without its name).
    pub fn to_json(&self) -> Value {
        let (mut body, children) = match self {
            AggregationNode::Terms {
                field,
                size,
                children,
                ..
            } => (json!({"terms": {"field": field, "size": size}}), children),
            AggregationNode::DateHistogram {
                field,
                interval_ms,
                children,
                ..
            } => (
                json!({"date_histogram": {
                    "field": field,
                    "fixed_interval": format!("{}ms", interval_ms)
                }}),
                children,
            ),
            AggregationNode::Filter {
                filter, children, ..
            } => (json!({ "filter": filter }), children),
            AggregationNode::Metric { kind, field, .. } => {
                return json!({ (kind.as_str()): {"field": field} });
            }
        };
        if !children.is_empty() {
            body["aggs"] = aggregations_json(children);
        }
        body
    }
}

/// Named aggregation map (`{"<name>": <body>, ...}`).
pub fn aggregations_json(nodes: &[AggregationNode]) -> Value {
    let mut map = Map::new();
    for node in nodes {
        map.insert(node.name().to_string(), node.to_json());
    }
    Value::Object(map)
}

/// Compile grouping keys and heading metrics into an aggregation tree.
pub fn compile(
    group_by: &[Column],
    heading: &Heading,
    filter: &Value,
    config: &SessionConfig,
) -> Result<AggregationNode> {
    if group_by.is_empty() {
        return Ok(AggregationNode::Filter {
            name: FILTER_AGG_NAME.to_string(),
            filter: filter.clone(),
            children: metrics(heading)?,
        });
    }
    build_level(group_by, heading, config)
}

/// Terms tree over every plain projected column, for `SELECT DISTINCT`.
pub fn compile_distinct(heading: &Heading, config: &SessionConfig) -> Result<AggregationNode> {
    let keys: Vec<Column> = heading
        .iter()
        .filter(|c| c.operator == Operation::None)
        .cloned()
        .collect();
    if keys.is_empty() {
        return Err(SqlError::Compile(
            "DISTINCT requires at least one plain column".to_string(),
        ));
    }
    build_level(&keys, &Heading::new(), config)
}

fn build_level(
    group_by: &[Column],
    heading: &Heading,
    config: &SessionConfig,
) -> Result<AggregationNode> {
    let (key, rest) = group_by
        .split_first()
        .ok_or_else(|| SqlError::Compile("empty GROUP BY".to_string()))?;

    let children = if rest.is_empty() {
        metrics(heading)?
    } else {
        vec![build_level(rest, heading, config)?]
    };

    let field = key.source_field.clone().ok_or_else(|| {
        SqlError::Compile(format!("Can not GROUP BY '{}' without a field", key.label))
    })?;

    match key.operator {
        Operation::None => Ok(AggregationNode::Terms {
            name: key.agg_name.clone(),
            field,
            size: config.fetch_size,
            children,
        }),
        Operation::DateHistogram => Ok(AggregationNode::DateHistogram {
            name: key.agg_name.clone(),
            field,
            interval_ms: interval_from_arg(key.op_args.first(), config.default_interval_ms),
            children,
        }),
        _ => Err(SqlError::Compile(format!(
            "Can not use function '{}' as GROUP BY, please use an alias to group by a function",
            key.label
        ))),
    }
}

/// Metric children for the deepest bucket. COUNT(*) is read from the
/// bucket's document count and gets no sub-aggregation.
fn metrics(heading: &Heading) -> Result<Vec<AggregationNode>> {
    heading
        .metric_columns()
        .map(|column| {
            let kind = MetricKind::for_column(column).ok_or_else(|| {
                SqlError::Compile(format!("'{}' is not an engine metric", column.label))
            })?;
            let field = column.source_field.clone().ok_or_else(|| {
                SqlError::Compile(format!("'{}' requires a field", column.label))
            })?;
            Ok(AggregationNode::Metric {
                name: column.agg_name.clone(),
                kind,
                field,
            })
        })
        .collect()
}

/// Build the full search request body for the engine-side plan level.
pub fn build_search_body(plan: &QueryPlan, config: &SessionConfig) -> Result<Value> {
    match plan.kind() {
        PlanKind::Search => {
            let fields: Vec<&str> = plan
                .heading
                .iter()
                .filter_map(|c| c.source_field.as_deref())
                .collect();
            let size = plan
                .limit
                .map_or(config.fetch_size, |limit| limit.min(config.fetch_size));
            let mut body = json!({"size": size, "query": plan.filter, "_source": fields});
            let sort_field = plan.order_by.as_ref().and_then(|order| {
                let column = plan.heading.column_by_label(&order.label)?;
                let direction = if order.descending { "desc" } else { "asc" };
                Some((column.source_field.clone()?, direction))
            });
            if let Some((field, direction)) = sort_field {
                body["sort"] = json!([{ field: {"order": direction} }]);
            }
            Ok(body)
        }
        PlanKind::Aggregation => {
            let (query, root) = if plan.distinct {
                (plan.filter.clone(), compile_distinct(&plan.heading, config)?)
            } else if plan.group_by.is_empty() {
                (
                    crate::filter::match_all(),
                    compile(&plan.group_by, &plan.heading, &plan.filter, config)?,
                )
            } else {
                (
                    plan.filter.clone(),
                    compile(&plan.group_by, &plan.heading, &plan.filter, config)?,
                )
            };
            debug!(root = %root.name(), "aggregation compiled");
            Ok(json!({
                "size": 0,
                "query": query,
                "aggs": aggregations_json(std::slice::from_ref(&root)),
            }))
        }
        PlanKind::Pipeline => Err(SqlError::Compile(
            "a query over a subquery is not sent to the engine".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::OpArg;

    fn heading_with(columns: Vec<Column>) -> Heading {
        let mut heading = Heading::new();
        for column in columns {
            heading.add(column).unwrap();
        }
        heading
    }

    #[test]
    fn test_ungrouped_filter_aggregation() {
        let heading = heading_with(vec![
            Column::function(Operation::Count, None),
            Column::function(Operation::Avg, Some("price".to_string())).with_alias("p"),
        ]);
        let filter = json!({"term": {"city": "x"}});
        let root = compile(&[], &heading, &filter, &SessionConfig::default()).unwrap();

        assert_eq!(
            root.to_json(),
            json!({
                "filter": {"term": {"city": "x"}},
                "aggs": {"p": {"avg": {"field": "price"}}}
            })
        );
    }

    #[test]
    fn test_count_only_has_no_children() {
        let heading = heading_with(vec![Column::function(Operation::Count, None)]);
        let root = compile(&[], &heading, &json!({"match_all": {}}), &SessionConfig::default())
            .unwrap();
        assert!(root.children().is_empty());
        assert!(root.to_json().get("aggs").is_none());
    }

    #[test]
    fn test_nested_terms_with_metrics_at_deepest_level() {
        let heading = heading_with(vec![
            Column::field("city"),
            Column::field("shop"),
            Column::function(Operation::Sum, Some("qty".to_string())),
            Column::function(Operation::Count, Some("user".to_string())).with_alias("users"),
        ]);
        let group_by = vec![heading.columns()[0].clone(), heading.columns()[1].clone()];
        let config = SessionConfig::default().with_fetch_size(50);
        let root = compile(&group_by, &heading, &json!({}), &config).unwrap();

        assert_eq!(
            root.to_json(),
            json!({
                "terms": {"field": "city", "size": 50},
                "aggs": {
                    "shop": {
                        "terms": {"field": "shop", "size": 50},
                        "aggs": {
                            "sum_qty_": {"sum": {"field": "qty"}},
                            "users": {"value_count": {"field": "user"}}
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_date_histogram_interval() {
        let heading = heading_with(vec![
            Column::field("@timestamp").with_alias("t"),
            Column::function(Operation::Max, Some("v".to_string())),
        ]);
        let mut key = heading.columns()[0].clone();
        key.operator = Operation::DateHistogram;
        key.op_args = vec![OpArg::Text("30m".to_string())];

        let root = compile(&[key], &heading, &json!({}), &SessionConfig::default()).unwrap();
        match &root {
            AggregationNode::DateHistogram {
                name,
                field,
                interval_ms,
                children,
            } => {
                assert_eq!(name, "t");
                assert_eq!(field, "@timestamp");
                assert_eq!(*interval_ms, 1_800_000);
                assert_eq!(children.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
        assert_eq!(
            root.to_json()["date_histogram"]["fixed_interval"],
            json!("1800000ms")
        );
    }

    #[test]
    fn test_malformed_interval_uses_configured_default() {
        let heading = heading_with(vec![Column::field("ts")]);
        let mut key = heading.columns()[0].clone();
        key.operator = Operation::DateHistogram;
        key.op_args = vec![OpArg::Text("soon".to_string())];

        let root = compile(&[key], &heading, &json!({}), &SessionConfig::default()).unwrap();
        assert!(matches!(
            root,
            AggregationNode::DateHistogram {
                interval_ms: 8_640_000,
                ..
            }
        ));
    }

    #[test]
    fn test_aggregate_grouping_key_rejected() {
        let heading = heading_with(vec![Column::function(
            Operation::Avg,
            Some("x".to_string()),
        )]);
        let key = heading.columns()[0].clone();
        let err = compile(&[key], &heading, &json!({}), &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, SqlError::Compile(msg) if msg.contains("alias")));
    }

    #[test]
    fn test_distinct_terms_tree() {
        let heading = heading_with(vec![Column::field("a"), Column::field("b")]);
        let root = compile_distinct(&heading, &SessionConfig::default()).unwrap();
        assert_eq!(root.name(), "a");
        assert_eq!(root.children()[0].name(), "b");
        assert!(root.children()[0].children().is_empty());
    }
}
