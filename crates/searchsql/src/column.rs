//! Projected columns and the heading that orders them
//!
//! A [`Heading`] is built once per compiled query. Both the aggregation
//! compiler (which metrics to attach) and the decoder (where each decoded
//! value lands) read it; nothing mutates it after planning.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SqlError;
use crate::types::Cell;
use crate::Result;

/// Operator applied to a projected column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    None,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Growth,
    DateHistogram,
}

impl Operation {
    /// Map an SQL function name (any case) to its operator.
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "COUNT" => Some(Operation::Count),
            "SUM" => Some(Operation::Sum),
            "AVG" => Some(Operation::Avg),
            "MIN" => Some(Operation::Min),
            "MAX" => Some(Operation::Max),
            "GROWTH" => Some(Operation::Growth),
            "DATE_HISTOGRAM" => Some(Operation::DateHistogram),
            _ => None,
        }
    }

    /// Engine-side metric aggregations.
    pub fn is_metric(&self) -> bool {
        matches!(
            self,
            Operation::Count | Operation::Sum | Operation::Avg | Operation::Min | Operation::Max
        )
    }

    /// Operators a GROUP BY key may carry.
    pub fn is_grouping(&self) -> bool {
        matches!(self, Operation::None | Operation::DateHistogram)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::None => "none",
            Operation::Count => "count",
            Operation::Sum => "sum",
            Operation::Avg => "avg",
            Operation::Min => "min",
            Operation::Max => "max",
            Operation::Growth => "growth",
            Operation::DateHistogram => "date_histogram",
        };
        write!(f, "{}", name)
    }
}

/// Literal operator argument (histogram interval, GROWTH x column, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpArg {
    Int(i64),
    Float(f64),
    Text(String),
}

impl OpArg {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OpArg::Int(i) => Some(*i as f64),
            OpArg::Float(f) => Some(*f),
            OpArg::Text(s) => s.parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OpArg::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One projected output slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Position in the output row; assigned by [`Heading::add`].
    pub index: usize,
    /// Underlying document field; `None` for `COUNT(*)`.
    pub source_field: Option<String>,
    pub operator: Operation,
    pub op_args: Vec<OpArg>,
    pub alias: Option<String>,
    /// Name other clauses use to refer to this column.
    pub label: String,
    /// Name of the aggregation node that carries this column's values.
    pub agg_name: String,
}

impl Column {
    /// A plain field projection.
    pub fn field(name: impl Into<String>) -> Self {
        Self::function(Operation::None, Some(name.into()))
    }

    /// An operator over an optional field.
    pub fn function(operator: Operation, source_field: Option<String>) -> Self {
        let label = default_label(operator, source_field.as_deref());
        Self {
            index: 0,
            source_field,
            operator,
            op_args: Vec::new(),
            alias: None,
            agg_name: sanitize_agg_name(&label),
            label,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.label = alias.clone();
        self.agg_name = sanitize_agg_name(&alias);
        self.alias = Some(alias);
        self
    }

    pub fn with_args(mut self, args: Vec<OpArg>) -> Self {
        self.op_args = args;
        self
    }

    /// `COUNT(*)`: satisfied by a bucket's document count.
    pub fn is_doc_count(&self) -> bool {
        self.operator == Operation::Count && self.source_field.is_none()
    }
}

fn default_label(operator: Operation, field: Option<&str>) -> String {
    match (operator, field) {
        (Operation::None, Some(field)) => field.to_string(),
        (op, Some(field)) => format!("{}({})", op, field),
        (op, None) => format!("{}(*)", op),
    }
}

/// Aggregation names may not contain `[`, `]` or `>` on the engine side.
fn sanitize_agg_name(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Ordered mapping from output position to [`Column`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heading {
    columns: Vec<Column>,
    labels: HashMap<String, usize>,
    agg_names: HashMap<String, usize>,
}

impl Heading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, assigning its index and a collision-free agg name.
    pub fn add(&mut self, mut column: Column) -> Result<&Column> {
        if self.labels.contains_key(&column.label) {
            return Err(SqlError::Compile(format!(
                "Duplicate column label '{}', please use an alias",
                column.label
            )));
        }
        let index = self.columns.len();
        column.index = index;
        if self.agg_names.contains_key(&column.agg_name) {
            let base = format!("{}_{}", column.agg_name, index);
            let mut candidate = base.clone();
            let mut n = 1;
            while self.agg_names.contains_key(&candidate) {
                candidate = format!("{}_{}", base, n);
                n += 1;
            }
            column.agg_name = candidate;
        }
        self.labels.insert(column.label.clone(), index);
        self.agg_names.insert(column.agg_name.clone(), index);
        self.columns.push(column);
        Ok(&self.columns[index])
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Exact, case-sensitive label lookup.
    pub fn column_by_label(&self, label: &str) -> Option<&Column> {
        self.labels.get(label).map(|&i| &self.columns[i])
    }

    pub fn column_by_agg_name(&self, agg_name: &str) -> Option<&Column> {
        self.agg_names.get(agg_name).map(|&i| &self.columns[i])
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains_key(label)
    }

    /// Columns computed by engine-side metric aggregations (COUNT(*) excluded).
    pub fn metric_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.operator.is_metric() && !c.is_doc_count())
    }

    /// `COUNT(*)` columns, filled from bucket document counts.
    pub fn count_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_doc_count())
    }

    pub fn has_aggregates(&self) -> bool {
        self.columns.iter().any(|c| c.operator != Operation::None)
    }

    /// An empty row of exactly `len()` null cells.
    pub fn new_row(&self) -> Vec<Cell> {
        vec![Cell::Null; self.columns.len()]
    }
}
