//! Engine search response model
//!
//! Responses are requested with `typed_keys=true`, so every aggregation key
//! reads `"<type>#<name>"`. The type prefix selects the variant; the name is
//! what the compiler assigned and what the decoder resolves back to a column.

use serde_json::{Map, Value};

use crate::column::Heading;
use crate::error::SqlError;
use crate::types::{Cell, Row};
use crate::Result;

/// One node of a decoded aggregation response.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationResult {
    Terms {
        name: String,
        buckets: Vec<Bucket>,
    },
    DateHistogram {
        name: String,
        buckets: Vec<Bucket>,
    },
    Filter {
        name: String,
        doc_count: u64,
        children: Vec<AggregationResult>,
    },
    SingleValueMetric {
        name: String,
        value: Option<f64>,
    },
}

impl AggregationResult {
    pub fn name(&self) -> &str {
        match self {
            AggregationResult::Terms { name, .. }
            | AggregationResult::DateHistogram { name, .. }
            | AggregationResult::Filter { name, .. }
            | AggregationResult::SingleValueMetric { name, .. } => name,
        }
    }
}

/// A single bucket of a terms or date histogram aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: Cell,
    pub doc_count: u64,
    pub children: Vec<AggregationResult>,
}

/// Surface a top-level engine error object.
fn check_engine_error(response: &Value) -> Result<()> {
    match response.get("error") {
        None | Some(Value::Null) => Ok(()),
        Some(error) => {
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Err(SqlError::Engine(reason))
        }
    }
}

/// Parse the `aggregations` section of a search response.
///
/// A response without aggregations yields no roots.
pub fn parse_aggregations(response: &Value) -> Result<Vec<AggregationResult>> {
    check_engine_error(response)?;
    match response.get("aggregations") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(aggs)) => parse_named(aggs, &[]),
        Some(other) => Err(SqlError::UnsupportedAggregationShape(format!(
            "aggregations is not an object: {}",
            other
        ))),
    }
}

/// Parse every typed key of `object`, skipping the listed reserved keys.
fn parse_named(object: &Map<String, Value>, reserved: &[&str]) -> Result<Vec<AggregationResult>> {
    object
        .iter()
        .filter(|(key, _)| !reserved.contains(&key.as_str()))
        .map(|(key, body)| parse_typed(key, body))
        .collect()
}

fn parse_typed(key: &str, body: &Value) -> Result<AggregationResult> {
    let (kind, name) = key.split_once('#').ok_or_else(|| {
        SqlError::UnsupportedAggregationShape(format!("untyped aggregation key '{}'", key))
    })?;
    let name = name.to_string();

    match kind {
        "sterms" | "lterms" | "dterms" | "terms" => Ok(AggregationResult::Terms {
            buckets: parse_buckets(body, &name, Cell::from_json)?,
            name,
        }),
        "date_histogram" => Ok(AggregationResult::DateHistogram {
            buckets: parse_buckets(body, &name, histogram_key)?,
            name,
        }),
        "filter" => {
            let object = as_object(body, &name)?;
            Ok(AggregationResult::Filter {
                doc_count: doc_count(object),
                children: parse_named(object, &["doc_count", "meta"])?,
                name,
            })
        }
        "avg" | "sum" | "min" | "max" | "value_count" => Ok(AggregationResult::SingleValueMetric {
            value: body.get("value").and_then(Value::as_f64),
            name,
        }),
        other => Err(SqlError::UnsupportedAggregationShape(format!(
            "aggregation '{}' has unsupported type '{}'",
            name, other
        ))),
    }
}

fn parse_buckets(body: &Value, name: &str, key: fn(&Value) -> Cell) -> Result<Vec<Bucket>> {
    let buckets = body
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SqlError::UnsupportedAggregationShape(format!("aggregation '{}' has no buckets", name))
        })?;

    buckets
        .iter()
        .map(|bucket| {
            let object = as_object(bucket, name)?;
            Ok(Bucket {
                key: object.get("key").map(key).unwrap_or(Cell::Null),
                doc_count: doc_count(object),
                children: parse_named(object, &["key", "key_as_string", "doc_count"])?,
            })
        })
        .collect()
}

/// Histogram keys are epoch milliseconds.
fn histogram_key(key: &Value) -> Cell {
    match key.as_i64() {
        Some(millis) => Cell::from_epoch_millis(millis),
        None => key
            .as_f64()
            .map(|millis| Cell::from_epoch_millis(millis as i64))
            .unwrap_or(Cell::Null),
    }
}

fn as_object<'a>(value: &'a Value, name: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        SqlError::UnsupportedAggregationShape(format!("aggregation '{}' is not an object", name))
    })
}

fn doc_count(object: &Map<String, Value>) -> u64 {
    object.get("doc_count").and_then(Value::as_u64).unwrap_or(0)
}

/// Rows from `hits.hits[*]._source`, one cell per heading column.
pub fn parse_hits(response: &Value, heading: &Heading) -> Result<Vec<Row>> {
    check_engine_error(response)?;
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    Ok(hits
        .iter()
        .map(|hit| {
            let source = hit.get("_source").unwrap_or(&Value::Null);
            heading
                .iter()
                .map(|column| {
                    column
                        .source_field
                        .as_deref()
                        .and_then(|field| source_value(source, field))
                        .map(Cell::from_json)
                        .unwrap_or(Cell::Null)
                })
                .collect()
        })
        .collect())
}

/// Field lookup by exact key first, then by dotted path into objects.
fn source_value<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(value) = source.get(field) {
        return Some(value);
    }
    field
        .split('.')
        .try_fold(source, |current, part| current.get(part))
}
