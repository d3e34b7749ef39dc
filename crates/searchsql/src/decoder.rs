//! Flattens an aggregation response tree into rows
//!
//! One working row is reused across the walk. Every cell written while
//! visiting a bucket is recorded on a stack; when the walk leaves that
//! bucket, the cells written since it was entered are cleared again. Ancestor
//! keys therefore survive sibling iterations while nothing leaks sideways.

use tracing::debug;

use crate::column::{Column, Heading, Operation};
use crate::error::SqlError;
use crate::response::{AggregationResult, Bucket};
use crate::types::{Cell, ResultSet, Row};
use crate::Result;

/// Decode the response roots into a result set shaped by `heading`.
pub fn decode(roots: &[AggregationResult], heading: &Heading) -> Result<ResultSet> {
    let mut decoder = Decoder::new(heading);
    match roots {
        [] => {}
        [root] => decoder.visit_root(root)?,
        _ => {
            return Err(SqlError::UnsupportedAggregationShape(format!(
                "expected a single root aggregation, got {}",
                roots.len()
            )))
        }
    }
    debug!(rows = decoder.result.len(), "aggregation response decoded");
    Ok(decoder.result)
}

struct Decoder<'a> {
    heading: &'a Heading,
    row: Row,
    touched: Vec<usize>,
    result: ResultSet,
}

impl<'a> Decoder<'a> {
    fn new(heading: &'a Heading) -> Self {
        Self {
            heading,
            row: heading.new_row(),
            touched: Vec::new(),
            result: ResultSet::new(heading.clone()),
        }
    }

    fn visit_root(&mut self, root: &AggregationResult) -> Result<()> {
        match root {
            AggregationResult::Terms { name, buckets }
            | AggregationResult::DateHistogram { name, buckets } => {
                self.visit_buckets(name, buckets)
            }
            AggregationResult::Filter {
                doc_count,
                children,
                ..
            } => {
                let mark = self.touched.len();
                self.fill_counts(*doc_count);
                for child in children {
                    match child {
                        AggregationResult::SingleValueMetric { name, value } => {
                            self.fill_metric(name, *value)?
                        }
                        other => return Err(nested_shape(other)),
                    }
                }
                self.emit();
                self.reset(mark);
                Ok(())
            }
            AggregationResult::SingleValueMetric { name, .. } => {
                Err(SqlError::UnsupportedAggregationShape(format!(
                    "metric '{}' outside of a bucket",
                    name
                )))
            }
        }
    }

    fn visit_buckets(&mut self, name: &str, buckets: &[Bucket]) -> Result<()> {
        let index = self.resolve(name)?.index;
        for bucket in buckets {
            let mark = self.touched.len();
            self.set(index, bucket.key.clone());
            self.visit_bucket(bucket)?;
            self.reset(mark);
        }
        Ok(())
    }

    /// A bucket holds either one nested bucket level or only metrics.
    fn visit_bucket(&mut self, bucket: &Bucket) -> Result<()> {
        let mut nested = None;
        let mut metrics = Vec::new();
        for child in &bucket.children {
            match child {
                AggregationResult::Terms { name, buckets }
                | AggregationResult::DateHistogram { name, buckets } => {
                    if nested.is_some() {
                        return Err(SqlError::UnsupportedAggregationShape(format!(
                            "more than one nested bucket aggregation next to '{}'",
                            name
                        )));
                    }
                    nested = Some((name.as_str(), buckets.as_slice()));
                }
                AggregationResult::SingleValueMetric { name, value } => {
                    metrics.push((name.as_str(), *value))
                }
                other => return Err(nested_shape(other)),
            }
        }

        match nested {
            Some((name, _)) if !metrics.is_empty() => {
                Err(SqlError::UnsupportedAggregationShape(format!(
                    "metrics attached above the deepest bucket level '{}'",
                    name
                )))
            }
            Some((name, buckets)) => self.visit_buckets(name, buckets),
            None => {
                self.fill_counts(bucket.doc_count);
                for (name, value) in metrics {
                    self.fill_metric(name, value)?;
                }
                self.emit();
                Ok(())
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<&'a Column> {
        self.heading
            .column_by_agg_name(name)
            .ok_or_else(|| SqlError::UnresolvedAggregationName(name.to_string()))
    }

    fn fill_counts(&mut self, doc_count: u64) {
        let heading = self.heading;
        for column in heading.count_columns() {
            self.set(column.index, Cell::Int(doc_count as i64));
        }
    }

    fn fill_metric(&mut self, name: &str, value: Option<f64>) -> Result<()> {
        let column = self.resolve(name)?;
        let cell = match (column.operator, value) {
            (_, None) => Cell::Null,
            (Operation::Count, Some(v)) if v.is_finite() => Cell::Int(v as i64),
            (_, Some(v)) => Cell::from_f64(v),
        };
        self.set(column.index, cell);
        Ok(())
    }

    fn set(&mut self, index: usize, cell: Cell) {
        self.row[index] = cell;
        self.touched.push(index);
    }

    fn emit(&mut self) {
        self.result.push_row(self.row.clone());
    }

    /// Clear every cell written since `mark`.
    fn reset(&mut self, mark: usize) {
        for index in self.touched.drain(mark..) {
            self.row[index] = Cell::Null;
        }
    }
}

fn nested_shape(node: &AggregationResult) -> SqlError {
    SqlError::UnsupportedAggregationShape(format!(
        "aggregation '{}' may only appear at the root",
        node.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading(columns: Vec<Column>) -> Heading {
        let mut heading = Heading::new();
        for column in columns {
            heading.add(column).unwrap();
        }
        heading
    }

    fn metric(name: &str, value: Option<f64>) -> AggregationResult {
        AggregationResult::SingleValueMetric {
            name: name.to_string(),
            value,
        }
    }

    fn bucket(key: &str, doc_count: u64, children: Vec<AggregationResult>) -> Bucket {
        Bucket {
            key: Cell::Text(key.to_string()),
            doc_count,
            children,
        }
    }

    fn terms(name: &str, buckets: Vec<Bucket>) -> AggregationResult {
        AggregationResult::Terms {
            name: name.to_string(),
            buckets,
        }
    }

    #[test]
    fn test_two_level_rows_keep_ancestor_keys() {
        let heading = heading(vec![
            Column::field("a"),
            Column::field("b"),
            Column::function(Operation::Max, Some("v".to_string())).with_alias("m"),
        ]);
        let root = terms(
            "a",
            vec![
                bucket(
                    "a1",
                    3,
                    vec![terms(
                        "b",
                        vec![
                            bucket("b1", 1, vec![metric("m", Some(1.0))]),
                            bucket("b2", 2, vec![metric("m", Some(2.0))]),
                        ],
                    )],
                ),
                bucket(
                    "a2",
                    1,
                    vec![terms("b", vec![bucket("b3", 1, vec![metric("m", None)])])],
                ),
            ],
        );

        let result = decode(&[root], &heading).unwrap();
        let text = |s: &str| Cell::Text(s.to_string());
        assert_eq!(
            result.rows(),
            &[
                vec![text("a1"), text("b1"), Cell::Float(1.0)],
                vec![text("a1"), text("b2"), Cell::Float(2.0)],
                vec![text("a2"), text("b3"), Cell::Null],
            ]
        );
    }

    #[test]
    fn test_missing_metric_does_not_inherit_sibling_value() {
        let heading = heading(vec![
            Column::field("a"),
            Column::field("b"),
            Column::function(Operation::Avg, Some("v".to_string())).with_alias("p"),
        ]);
        let root = terms(
            "a",
            vec![
                bucket(
                    "a1",
                    2,
                    vec![terms(
                        "b",
                        vec![
                            bucket("b1", 1, vec![metric("p", Some(3.0))]),
                            bucket("b2", 1, vec![]),
                        ],
                    )],
                ),
                bucket("a2", 1, vec![terms("b", vec![bucket("b3", 1, vec![])])]),
            ],
        );

        let result = decode(&[root], &heading).unwrap();
        let text = |s: &str| Cell::Text(s.to_string());
        assert_eq!(
            result.rows(),
            &[
                vec![text("a1"), text("b1"), Cell::Float(3.0)],
                vec![text("a1"), text("b2"), Cell::Null],
                vec![text("a2"), text("b3"), Cell::Null],
            ]
        );
    }

    #[test]
    fn test_leaf_counts_and_value_counts() {
        let heading = heading(vec![
            Column::field("a"),
            Column::function(Operation::Count, None),
            Column::function(Operation::Count, Some("u".to_string())).with_alias("users"),
        ]);
        let root = terms("a", vec![bucket("x", 7, vec![metric("users", Some(5.0))])]);
        let result = decode(&[root], &heading).unwrap();
        assert_eq!(
            result.rows(),
            &[vec![Cell::Text("x".to_string()), Cell::Int(7), Cell::Int(5)]]
        );
    }

    #[test]
    fn test_nan_metric_becomes_null() {
        let heading = heading(vec![
            Column::field("a"),
            Column::function(Operation::Avg, Some("v".to_string())).with_alias("avg"),
        ]);
        let root = terms("a", vec![bucket("x", 0, vec![metric("avg", Some(f64::NAN))])]);
        let result = decode(&[root], &heading).unwrap();
        assert_eq!(result.rows()[0][1], Cell::Null);
    }

    #[test]
    fn test_filter_root_emits_one_row() {
        let heading = heading(vec![
            Column::function(Operation::Count, None),
            Column::function(Operation::Sum, Some("v".to_string())).with_alias("s"),
        ]);
        let root = AggregationResult::Filter {
            name: "filter".to_string(),
            doc_count: 42,
            children: vec![metric("s", Some(9.5))],
        };
        let result = decode(&[root], &heading).unwrap();
        assert_eq!(result.rows(), &[vec![Cell::Int(42), Cell::Float(9.5)]]);
    }

    #[test]
    fn test_unknown_name_is_fatal() {
        let heading = heading(vec![Column::field("a")]);
        let err = decode(&[terms("zzz", vec![bucket("x", 1, vec![])])], &heading).unwrap_err();
        assert!(matches!(err, SqlError::UnresolvedAggregationName(name) if name == "zzz"));
    }

    #[test]
    fn test_unsupported_shapes() {
        let heading = heading(vec![
            Column::field("a"),
            Column::field("b"),
            Column::function(Operation::Sum, Some("v".to_string())).with_alias("s"),
        ]);

        let metric_root = decode(&[metric("s", Some(1.0))], &heading).unwrap_err();
        assert!(matches!(
            metric_root,
            SqlError::UnsupportedAggregationShape(_)
        ));

        let mixed = terms(
            "a",
            vec![bucket(
                "x",
                1,
                vec![metric("s", Some(1.0)), terms("b", vec![])],
            )],
        );
        assert!(matches!(
            decode(&[mixed], &heading).unwrap_err(),
            SqlError::UnsupportedAggregationShape(_)
        ));

        let nested_filter = terms(
            "a",
            vec![bucket(
                "x",
                1,
                vec![AggregationResult::Filter {
                    name: "filter".to_string(),
                    doc_count: 1,
                    children: vec![],
                }],
            )],
        );
        assert!(matches!(
            decode(&[nested_filter], &heading).unwrap_err(),
            SqlError::UnsupportedAggregationShape(_)
        ));
    }

    #[test]
    fn test_empty_response_has_no_rows() {
        let heading = heading(vec![Column::field("a")]);
        assert!(decode(&[], &heading).unwrap().is_empty());
        assert!(decode(&[terms("a", vec![])], &heading).unwrap().is_empty());
    }
}
