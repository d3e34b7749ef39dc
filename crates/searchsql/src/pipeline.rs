//! In-memory reductions for queries over a subquery
//!
//! The engine cannot aggregate over the result of another aggregation, so an
//! outer level is computed here from the fully materialized inner rows. Each
//! outer column rewinds the inner cursor and scans it on its own.

use tracing::debug;

use crate::column::{Column, Heading, Operation};
use crate::error::SqlError;
use crate::planner::QueryPlan;
use crate::types::{Cell, ResultCursor, ResultSet, Row};
use crate::Result;

/// Least-squares fit of `y = exp(alpha + beta * x)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogLinearFit {
    pub alpha: f64,
    pub beta: f64,
    pub n: usize,
}

impl LogLinearFit {
    /// Fit over `(x, y)` points with `y > 0`.
    ///
    /// Returns `None` for an empty input or when every x is equal.
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        let n = points.len();
        if n == 0 {
            return None;
        }
        let count = n as f64;
        let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / count;
        let ln_mean = points.iter().map(|(_, y)| y.ln()).sum::<f64>() / count;

        // centered sums: epoch-millisecond x values lose precision otherwise
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut spread: f64 = 0.0;
        for (x, y) in points {
            let dx = x - x_mean;
            sxx += dx * dx;
            sxy += dx * (y.ln() - ln_mean);
            spread = spread.max(dx.abs());
        }
        // all x equal up to rounding
        if sxx == 0.0 || spread <= 8.0 * f64::EPSILON * x_mean.abs() {
            return None;
        }

        let beta = sxy / sxx;
        let alpha = ln_mean - beta * x_mean;
        if !alpha.is_finite() || !beta.is_finite() {
            return None;
        }
        Some(Self { alpha, beta, n })
    }

    pub fn project(&self, x: f64) -> f64 {
        (self.alpha + self.beta * x).exp()
    }
}

/// Apply one pipeline level to the materialized rows of its inner query.
pub fn apply(inner: ResultSet, plan: &QueryPlan) -> Result<ResultSet> {
    let inner_rows = inner.len();
    let mut cursor = inner.cursor();
    let rows = if plan.group_by.is_empty() {
        vec![reduce(&mut cursor, &plan.heading)?]
    } else {
        reduce_grouped(&mut cursor, &plan.heading, &plan.group_by)?
    };
    cursor.close();

    debug!(
        inner_rows,
        outer_rows = rows.len(),
        "pipeline level reduced"
    );
    Ok(ResultSet::with_rows(plan.heading.clone(), rows))
}

/// Reduce the whole cursor into one row shaped by `outer`.
pub fn reduce(cursor: &mut ResultCursor, outer: &Heading) -> Result<Row> {
    let mut row = outer.new_row();
    for column in outer.iter() {
        cursor.rewind();
        row[column.index] = reduce_column(cursor, column)?;
    }
    Ok(row)
}

/// One output row per distinct combination of the grouping keys, in order of
/// first appearance.
pub fn reduce_grouped(
    cursor: &mut ResultCursor,
    outer: &Heading,
    group_by: &[Column],
) -> Result<Vec<Row>> {
    let key_indexes = group_by
        .iter()
        .map(|column| inner_index(cursor.heading(), column))
        .collect::<Result<Vec<_>>>()?;

    let mut groups: Vec<(Vec<Cell>, Vec<Row>)> = Vec::new();
    cursor.rewind();
    while let Some(row) = cursor.next_row() {
        let key: Vec<Cell> = key_indexes.iter().map(|&i| row[i].clone()).collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, rows)) => rows.push(row.clone()),
            None => groups.push((key, vec![row.clone()])),
        }
    }

    let inner_heading = cursor.heading().clone();
    groups
        .into_iter()
        .map(|(_, rows)| {
            let mut group = ResultSet::with_rows(inner_heading.clone(), rows).cursor();
            reduce(&mut group, outer)
        })
        .collect()
}

fn reduce_column(cursor: &mut ResultCursor, column: &Column) -> Result<Cell> {
    let index = inner_index(cursor.heading(), column)?;
    match column.operator {
        Operation::None => Ok(cursor
            .next_row()
            .map(|row| row[index].clone())
            .unwrap_or(Cell::Null)),
        Operation::Min => Ok(extreme(cursor, index, |candidate, best| candidate < best)),
        Operation::Max => Ok(extreme(cursor, index, |candidate, best| candidate > best)),
        Operation::Avg => Ok(average(cursor, index)),
        Operation::Growth => growth(cursor, index, column),
        other => Err(SqlError::UnsupportedOperation(format!(
            "{} is not supported over a subquery",
            other
        ))),
    }
}

/// Outer columns name inner columns by label.
fn inner_index(inner: &Heading, column: &Column) -> Result<usize> {
    let label = column.source_field.as_deref().ok_or_else(|| {
        SqlError::Compile(format!("'{}' needs a subquery column", column.label))
    })?;
    resolve_label(inner, label)
}

fn resolve_label(inner: &Heading, label: &str) -> Result<usize> {
    inner
        .column_by_label(label)
        .map(|c| c.index)
        .ok_or_else(|| SqlError::Compile(format!("Column '{}' not found in subquery", label)))
}

/// Minimum or maximum cell; nulls and non-numeric cells are skipped and the
/// winning cell is returned as-is.
fn extreme(
    cursor: &mut ResultCursor,
    index: usize,
    better: impl Fn(f64, f64) -> bool,
) -> Cell {
    let mut best: Option<(f64, Cell)> = None;
    while let Some(row) = cursor.next_row() {
        let cell = &row[index];
        let Some(value) = cell.as_x_value() else {
            continue;
        };
        match best {
            Some((current, _)) if !better(value, current) => {}
            _ => best = Some((value, cell.clone())),
        }
    }
    best.map(|(_, cell)| cell).unwrap_or(Cell::Null)
}

fn average(cursor: &mut ResultCursor, index: usize) -> Cell {
    let mut sum = 0.0;
    let mut count = 0usize;
    while let Some(row) = cursor.next_row() {
        if let Some(value) = row[index].as_f64() {
            sum += value;
            count += 1;
        }
    }
    if count == 0 {
        Cell::Null
    } else {
        Cell::from_f64(sum / count as f64)
    }
}

/// `GROWTH(y)` projects one step past the last row ordinal;
/// `GROWTH(y, x, target)` regresses on column `x` and projects at `target`.
fn growth(cursor: &mut ResultCursor, y_index: usize, column: &Column) -> Result<Cell> {
    let x_index = match column.op_args.first() {
        None => None,
        Some(arg) => {
            let label = arg.as_str().ok_or_else(|| {
                SqlError::Compile(format!("GROWTH x argument of '{}' must be a column", column.label))
            })?;
            Some(resolve_label(cursor.heading(), label)?)
        }
    };
    let target = match x_index {
        Some(_) => Some(
            column
                .op_args
                .get(1)
                .and_then(|arg| arg.as_f64())
                .ok_or_else(|| {
                    SqlError::Compile(format!(
                        "GROWTH '{}' needs a numeric projected x value",
                        column.label
                    ))
                })?,
        ),
        None => None,
    };

    let mut points = Vec::new();
    let mut ordinal = 0usize;
    while let Some(row) = cursor.next_row() {
        let x = match x_index {
            Some(i) => row[i].as_x_value(),
            None => Some(ordinal as f64),
        };
        ordinal += 1;
        match (x, row[y_index].as_f64()) {
            (Some(x), Some(y)) if y > 0.0 => points.push((x, y)),
            _ => return Ok(Cell::Null),
        }
    }

    let Some(fit) = LogLinearFit::fit(&points) else {
        debug!(column = %column.label, n = points.len(), "degenerate regression");
        return Ok(Cell::Null);
    };
    let x_target = target.unwrap_or(fit.n as f64);
    Ok(Cell::from_f64(fit.project(x_target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::OpArg;
    use std::f64::consts::E;

    fn inner(labels: &[&str], rows: Vec<Row>) -> ResultSet {
        let mut heading = Heading::new();
        for label in labels {
            heading.add(Column::field(*label)).unwrap();
        }
        ResultSet::with_rows(heading, rows)
    }

    fn outer(columns: Vec<Column>) -> Heading {
        let mut heading = Heading::new();
        for column in columns {
            heading.add(column).unwrap();
        }
        heading
    }

    fn over(op: Operation, label: &str) -> Column {
        Column::function(op, Some(label.to_string()))
    }

    fn floats(values: &[f64]) -> Vec<Row> {
        values.iter().map(|v| vec![Cell::Float(*v)]).collect()
    }

    #[test]
    fn test_fit_recovers_exponential() {
        let fit = LogLinearFit::fit(&[(0.0, 1.0), (1.0, E), (2.0, E * E)]).unwrap();
        assert!(fit.alpha.abs() < 1e-12);
        assert!((fit.beta - 1.0).abs() < 1e-12);
        assert!((fit.project(3.0) - E.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(LogLinearFit::fit(&[]).is_none());
        assert!(LogLinearFit::fit(&[(5.0, 1.0)]).is_none());
        assert!(LogLinearFit::fit(&[(0.1, 1.0), (0.1, 2.0), (0.1, 3.0)]).is_none());
    }

    #[test]
    fn test_avg_min_max() {
        let mut cursor = inner(&["v"], floats(&[2.0, 4.0, 6.0])).cursor();
        let heading = outer(vec![
            over(Operation::Avg, "v"),
            over(Operation::Min, "v"),
            over(Operation::Max, "v"),
        ]);
        assert_eq!(
            reduce(&mut cursor, &heading).unwrap(),
            vec![Cell::Float(4.0), Cell::Float(2.0), Cell::Float(6.0)]
        );
    }

    #[test]
    fn test_empty_inner_reduces_to_nulls() {
        let mut cursor = inner(&["v"], vec![]).cursor();
        let heading = outer(vec![
            over(Operation::Avg, "v"),
            over(Operation::Max, "v"),
            over(Operation::Growth, "v"),
        ]);
        assert_eq!(
            reduce(&mut cursor, &heading).unwrap(),
            vec![Cell::Null, Cell::Null, Cell::Null]
        );
    }

    #[test]
    fn test_nulls_are_skipped() {
        let rows = vec![vec![Cell::Null], vec![Cell::Int(3)], vec![Cell::Int(9)]];
        let mut cursor = inner(&["v"], rows).cursor();
        let heading = outer(vec![over(Operation::Min, "v"), over(Operation::Avg, "v")]);
        assert_eq!(
            reduce(&mut cursor, &heading).unwrap(),
            vec![Cell::Int(3), Cell::Float(6.0)]
        );
    }

    #[test]
    fn test_min_max_order_independent() {
        let values = [3.5, -1.0, 8.25, 0.0];
        let mut reversed = values;
        reversed.reverse();
        let heading = outer(vec![over(Operation::Min, "v"), over(Operation::Max, "v")]);

        let a = reduce(&mut inner(&["v"], floats(&values)).cursor(), &heading).unwrap();
        let b = reduce(&mut inner(&["v"], floats(&reversed)).cursor(), &heading).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, vec![Cell::Float(-1.0), Cell::Float(8.25)]);
    }

    #[test]
    fn test_growth_implicit_ordinals() {
        let mut cursor = inner(&["y"], floats(&[1.0, E, E * E])).cursor();
        let heading = outer(vec![over(Operation::Growth, "y")]);
        let Cell::Float(projected) = reduce(&mut cursor, &heading).unwrap()[0] else {
            panic!("expected a float");
        };
        assert!((projected - E.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn test_growth_with_timestamp_x() {
        let hour = 3_600_000_i64;
        let start = 1_700_000_000_000_i64;
        let rows = (0..4)
            .map(|i| {
                vec![
                    Cell::from_epoch_millis(start + i * hour),
                    Cell::Float(2f64.powi(i as i32)),
                ]
            })
            .collect();
        let mut cursor = inner(&["t", "y"], rows).cursor();
        let heading = outer(vec![over(Operation::Growth, "y").with_args(vec![
            OpArg::Text("t".to_string()),
            OpArg::Int(start + 4 * hour),
        ])]);
        let Cell::Float(projected) = reduce(&mut cursor, &heading).unwrap()[0] else {
            panic!("expected a float");
        };
        assert!((projected - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_growth_non_positive_y_is_null() {
        let mut cursor = inner(&["y"], floats(&[1.0, 0.0, 4.0])).cursor();
        let heading = outer(vec![over(Operation::Growth, "y")]);
        assert_eq!(reduce(&mut cursor, &heading).unwrap(), vec![Cell::Null]);
    }

    #[test]
    fn test_grouped_reduction() {
        let text = |s: &str| Cell::Text(s.to_string());
        let rows = vec![
            vec![text("a"), Cell::Int(1)],
            vec![text("b"), Cell::Int(10)],
            vec![text("a"), Cell::Int(5)],
        ];
        let mut cursor = inner(&["k", "v"], rows).cursor();
        let heading = outer(vec![Column::field("k"), over(Operation::Max, "v")]);
        let group_by = vec![heading.columns()[0].clone()];

        let rows = reduce_grouped(&mut cursor, &heading, &group_by).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![text("a"), Cell::Int(5)],
                vec![text("b"), Cell::Int(10)]
            ]
        );
    }

    #[test]
    fn test_unknown_inner_label() {
        let mut cursor = inner(&["v"], floats(&[1.0])).cursor();
        let heading = outer(vec![over(Operation::Max, "w")]);
        let err = reduce(&mut cursor, &heading).unwrap_err();
        assert!(matches!(err, SqlError::Compile(msg) if msg.contains("'w'")));
    }
}
