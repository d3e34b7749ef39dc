//! Result cells, rows, and result sets

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::column::{Heading, Operation};

/// A single value in a result row. `Null` is the explicit missing marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    /// Float cell, with NaN and infinities coerced to `Null`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Cell::Float(value)
        } else {
            Cell::Null
        }
    }

    /// Instant from epoch milliseconds; out-of-range values become `Null`.
    pub fn from_epoch_millis(millis: i64) -> Self {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Cell::Timestamp)
            .unwrap_or(Cell::Null)
    }

    /// Convert a JSON scalar from a document source.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::from_f64).unwrap_or(Cell::Null),
            },
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell; numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Regression x value: numbers as-is, instants as epoch milliseconds.
    pub fn as_x_value(&self) -> Option<f64> {
        match self {
            Cell::Timestamp(ts) => Some(ts.timestamp_millis() as f64),
            other => other.as_f64(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Bool(_) => 0,
            Cell::Int(_) | Cell::Float(_) => 1,
            Cell::Timestamp(_) => 2,
            Cell::Text(_) => 3,
            Cell::Null => 4,
        }
    }

    /// Total order used by ORDER BY: nulls last, numbers compared as floats.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::Int(_) | Cell::Float(_), Cell::Int(_) | Cell::Float(_)) => {
                let a = self.as_f64().unwrap_or(f64::NAN);
                let b = other.as_f64().unwrap_or(f64::NAN);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Query result row, aligned to heading indexes
pub type Row = Vec<Cell>;

/// Column metadata for query results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub operator: Operation,
}

/// Complete query response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Total row count returned
    pub row_count: usize,
    /// Query execution time in milliseconds
    pub execution_time_ms: u64,
}

/// Rows plus the heading that describes them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    heading: Heading,
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(heading: Heading) -> Self {
        Self {
            heading,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(heading: Heading, rows: Vec<Row>) -> Self {
        let mut rs = Self::new(heading);
        for row in rows {
            rs.push_row(row);
        }
        rs
    }

    /// Append a completed row. Every row has exactly one cell per column.
    pub fn push_row(&mut self, row: Row) {
        debug_assert_eq!(
            row.len(),
            self.heading.len(),
            "row arity must match the heading"
        );
        self.rows.push(row);
    }

    pub fn heading(&self) -> &Heading {
        &self.heading
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    /// Stable sort on the column with `label`; unknown labels leave the
    /// order untouched and return `false`.
    pub fn sort_by_label(&mut self, label: &str, descending: bool) -> bool {
        let Some(index) = self.heading.column_by_label(label).map(|c| c.index) else {
            return false;
        };
        self.rows.sort_by(|a, b| {
            let (x, y) = (&a[index], &b[index]);
            match (x.is_null(), y.is_null()) {
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ if descending => y.sort_cmp(x),
                _ => x.sort_cmp(y),
            }
        });
        true
    }

    pub fn cursor(self) -> ResultCursor {
        ResultCursor::new(self)
    }

    pub fn into_query_result(self, execution_time_ms: u64) -> QueryResult {
        let columns = self
            .heading
            .iter()
            .map(|c| ColumnInfo {
                name: c.label.clone(),
                operator: c.operator,
            })
            .collect();
        QueryResult {
            columns,
            row_count: self.rows.len(),
            rows: self.rows,
            execution_time_ms,
        }
    }
}

/// Rewindable cursor over a fully materialized result set.
///
/// Rewinding never re-fetches; the rows are owned by the cursor.
#[derive(Debug)]
pub struct ResultCursor {
    result: ResultSet,
    position: usize,
    closed: bool,
}

impl ResultCursor {
    pub fn new(result: ResultSet) -> Self {
        Self {
            result,
            position: 0,
            closed: false,
        }
    }

    pub fn heading(&self) -> &Heading {
        &self.result.heading
    }

    /// Advance to the next row.
    pub fn next_row(&mut self) -> Option<&Row> {
        if self.closed {
            return None;
        }
        let row = self.result.rows.get(self.position)?;
        self.position += 1;
        Some(row)
    }

    /// Position before the first row.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Release buffered rows. A closed cursor yields nothing.
    pub fn close(&mut self) {
        self.closed = true;
        self.result.rows = Vec::new();
        self.position = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_result_set(self) -> ResultSet {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;

    fn heading(labels: &[&str]) -> Heading {
        let mut heading = Heading::new();
        for label in labels {
            heading.add(Column::field(*label)).unwrap();
        }
        heading
    }

    #[test]
    fn test_from_f64_coerces_non_finite() {
        assert_eq!(Cell::from_f64(1.5), Cell::Float(1.5));
        assert_eq!(Cell::from_f64(f64::NAN), Cell::Null);
        assert_eq!(Cell::from_f64(f64::INFINITY), Cell::Null);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Cell::from_json(&serde_json::json!(3)), Cell::Int(3));
        assert_eq!(Cell::from_json(&serde_json::json!(2.5)), Cell::Float(2.5));
        assert_eq!(
            Cell::from_json(&serde_json::json!("x")),
            Cell::Text("x".to_string())
        );
        assert_eq!(Cell::from_json(&serde_json::Value::Null), Cell::Null);
    }

    #[test]
    fn test_timestamp_x_value() {
        let cell = Cell::from_epoch_millis(1_700_000_000_000);
        assert!(matches!(cell, Cell::Timestamp(_)));
        assert_eq!(cell.as_x_value(), Some(1_700_000_000_000.0));
        assert_eq!(cell.as_f64(), None);
    }

    #[test]
    fn test_cursor_rewind_and_close() {
        let rs = ResultSet::with_rows(
            heading(&["a"]),
            vec![vec![Cell::Int(1)], vec![Cell::Int(2)]],
        );
        let mut cursor = rs.cursor();
        assert_eq!(cursor.next_row(), Some(&vec![Cell::Int(1)]));
        assert_eq!(cursor.next_row(), Some(&vec![Cell::Int(2)]));
        assert_eq!(cursor.next_row(), None);

        cursor.rewind();
        assert_eq!(cursor.next_row(), Some(&vec![Cell::Int(1)]));

        cursor.close();
        assert!(cursor.is_closed());
        assert_eq!(cursor.next_row(), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "row arity")]
    fn test_push_row_checks_arity() {
        let mut rs = ResultSet::new(heading(&["a", "b"]));
        rs.push_row(vec![Cell::Null]);
    }

    #[test]
    fn test_sort_by_label_nulls_last() {
        let mut rs = ResultSet::with_rows(
            heading(&["n"]),
            vec![
                vec![Cell::Int(2)],
                vec![Cell::Null],
                vec![Cell::Float(0.5)],
                vec![Cell::Int(7)],
            ],
        );
        assert!(rs.sort_by_label("n", true));
        let values: Vec<_> = rs.rows().iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            values,
            vec![Cell::Int(7), Cell::Int(2), Cell::Float(0.5), Cell::Null]
        );
        assert!(!rs.sort_by_label("missing", false));
    }

    #[test]
    fn test_query_result_serialization() {
        let rs = ResultSet::with_rows(heading(&["city"]), vec![vec![Cell::Text("x".into())]]);
        let json = serde_json::to_value(rs.into_query_result(12)).unwrap();
        assert_eq!(json["rowCount"], 1);
        assert_eq!(json["columns"][0]["name"], "city");
        assert_eq!(json["columns"][0]["operator"], "NONE");
        assert_eq!(json["rows"][0][0], "x");
    }
}
