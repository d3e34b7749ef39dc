//! Binds a parsed SQL query to columns, grouping keys, and a row filter
//!
//! The SQL text itself is parsed by `sqlparser`; this module only walks the
//! resulting AST. A query selecting FROM a subquery becomes a pipeline: the
//! inner plan runs on the engine and the outer levels are reduced in memory.

use chrono::Utc;
use serde_json::Value;
use sqlparser::ast::{
    Distinct, Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, ObjectName, Query,
    Select, SelectItem, SetExpr, TableFactor, Value as SqlValue,
};
use tracing::debug;

use crate::column::{Column, Heading, OpArg, Operation};
use crate::error::SqlError;
use crate::filter::{field_name, match_all, translate_filter};
use crate::interval::parse_offset;
use crate::Result;

/// ORDER BY applied to decoded rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub label: String,
    pub descending: bool,
}

/// How a plan level is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Plain document search, decoded from hits
    Search,
    /// Engine-side bucket/metric aggregation
    Aggregation,
    /// In-memory reduction over an inner plan's result
    Pipeline,
}

/// One level of a bound query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Target index; `None` when selecting from a subquery.
    pub index: Option<String>,
    pub heading: Heading,
    /// Grouping keys, in GROUP BY order, resolved against `heading`.
    pub group_by: Vec<Column>,
    /// Row-level filter in the engine's query DSL.
    pub filter: Value,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub order_by: Option<OrderBy>,
    pub inner: Option<Box<QueryPlan>>,
}

impl QueryPlan {
    pub fn kind(&self) -> PlanKind {
        if self.inner.is_some() {
            PlanKind::Pipeline
        } else if self.distinct || !self.group_by.is_empty() || self.heading.has_aggregates() {
            PlanKind::Aggregation
        } else {
            PlanKind::Search
        }
    }

    /// Plan levels from the innermost (engine) level outwards.
    pub fn levels(&self) -> Vec<&QueryPlan> {
        let mut levels = vec![self];
        let mut current = self;
        while let Some(inner) = current.inner.as_deref() {
            levels.push(inner);
            current = inner;
        }
        levels.reverse();
        levels
    }

    /// The level that is sent to the engine.
    pub fn innermost(&self) -> &QueryPlan {
        let mut current = self;
        while let Some(inner) = current.inner.as_deref() {
            current = inner;
        }
        current
    }
}

/// Bind a parsed query into a [`QueryPlan`].
pub fn plan_query(query: &Query) -> Result<QueryPlan> {
    let select = match &*query.body {
        SetExpr::Select(select) => select,
        SetExpr::Query(inner) => return plan_query(inner),
        _ => {
            return Err(SqlError::UnsupportedOperation(
                "Only simple SELECT queries are supported".to_string(),
            ))
        }
    };

    let (index, inner) = parse_from_clause(select)?;
    let heading = build_heading(&select.projection)?;

    let group_exprs = match &select.group_by {
        GroupByExpr::All => {
            return Err(SqlError::UnsupportedOperation(
                "GROUP BY ALL is not supported".to_string(),
            ))
        }
        GroupByExpr::Expressions(exprs) => exprs.as_slice(),
    };
    let group_by = resolve_group_by(group_exprs, &heading)?;

    let filter = match &select.selection {
        Some(selection) => translate_filter(selection)?,
        None => match_all(),
    };

    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => {
            return Err(SqlError::UnsupportedOperation(
                "DISTINCT ON is not supported".to_string(),
            ))
        }
    };

    let limit = query.limit.as_ref().map(parse_limit).transpose()?;
    let order_by = parse_order_by(query, &heading)?;

    let plan = QueryPlan {
        index,
        heading,
        group_by,
        filter,
        distinct,
        limit,
        order_by,
        inner,
    };
    validate(&plan, select)?;

    debug!(
        index = ?plan.index,
        columns = plan.heading.len(),
        group_by = plan.group_by.len(),
        kind = ?plan.kind(),
        "query planned"
    );
    Ok(plan)
}

fn parse_from_clause(select: &Select) -> Result<(Option<String>, Option<Box<QueryPlan>>)> {
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT requires a FROM clause".to_string()));
    }
    if select.from.len() > 1 || !select.from[0].joins.is_empty() {
        return Err(SqlError::UnsupportedOperation(
            "Joins are not supported".to_string(),
        ));
    }

    match &select.from[0].relation {
        TableFactor::Table { name, .. } => Ok((Some(object_name(name)), None)),
        TableFactor::Derived { subquery, .. } => Ok((None, Some(Box::new(plan_query(subquery)?)))),
        other => Err(SqlError::UnsupportedOperation(format!(
            "Unsupported FROM source: {}",
            other
        ))),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn build_heading(projection: &[SelectItem]) -> Result<Heading> {
    let mut heading = Heading::new();
    for item in projection {
        let column = match item {
            SelectItem::UnnamedExpr(expr) => column_for_expr(expr)?,
            SelectItem::ExprWithAlias { expr, alias } => {
                column_for_expr(expr)?.with_alias(alias.value.clone())
            }
            _ => {
                return Err(SqlError::UnsupportedOperation(format!(
                    "Unsupported select item '{}', please list the projected fields",
                    item
                )))
            }
        };
        heading.add(column)?;
    }
    Ok(heading)
}

fn column_for_expr(expr: &Expr) -> Result<Column> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Ok(Column::field(field_name(expr)?)),
        Expr::Nested(inner) => column_for_expr(inner),
        Expr::Function(func) => column_for_function(func),
        _ => Err(SqlError::UnsupportedOperation(format!(
            "Unsupported expression: {}",
            expr
        ))),
    }
}

fn column_for_function(func: &Function) -> Result<Column> {
    let name = func.name.to_string();
    let operator = Operation::from_function_name(&name).ok_or_else(|| {
        SqlError::UnsupportedOperation(format!("Unsupported function: {}", name.to_uppercase()))
    })?;
    if func.distinct {
        return Err(SqlError::UnsupportedOperation(format!(
            "DISTINCT inside {} is not supported",
            name.to_uppercase()
        )));
    }

    let args = &func.args;
    let field = match args.first() {
        Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) if operator == Operation::Count => {
            None
        }
        Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))) => Some(field_name(expr)?),
        _ => {
            return Err(SqlError::Parse(format!(
                "{} requires a field argument",
                name.to_uppercase()
            )))
        }
    };

    let extra = args[1..]
        .iter()
        .map(function_arg_expr)
        .collect::<Result<Vec<_>>>()?;

    let op_args = match (operator, extra.as_slice()) {
        (Operation::DateHistogram, []) => Vec::new(),
        (Operation::DateHistogram, [interval]) => vec![literal_arg(interval)?],
        (Operation::Growth, []) => Vec::new(),
        (Operation::Growth, [x, projected]) => vec![
            OpArg::Text(field_name(x)?),
            literal_arg(projected)?,
        ],
        (Operation::Growth, _) => {
            return Err(SqlError::Parse(
                "GROWTH takes (y) or (y, knownX, projectedX)".to_string(),
            ))
        }
        (_, []) => Vec::new(),
        _ => {
            return Err(SqlError::Parse(format!(
                "Too many arguments for {}",
                name.to_uppercase()
            )))
        }
    };

    Ok(Column::function(operator, field).with_args(op_args))
}

fn function_arg_expr(arg: &FunctionArg) -> Result<&Expr> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
        other => Err(SqlError::Parse(format!(
            "Unsupported function argument: {}",
            other
        ))),
    }
}

/// Literal operator argument; `NOW('+5m')` evaluates to epoch millis.
fn literal_arg(expr: &Expr) -> Result<OpArg> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => match n.parse::<i64>() {
            Ok(i) => Ok(OpArg::Int(i)),
            Err(_) => n
                .parse::<f64>()
                .map(OpArg::Float)
                .map_err(|_| SqlError::Parse(format!("Invalid number literal: {}", n))),
        },
        Expr::Value(SqlValue::SingleQuotedString(s)) => Ok(OpArg::Text(s.clone())),
        Expr::Function(func) if func.name.to_string().eq_ignore_ascii_case("NOW") => {
            let offset = match func.args.first() {
                None => 0,
                Some(arg) => match function_arg_expr(arg)? {
                    Expr::Value(SqlValue::SingleQuotedString(s)) => parse_offset(s)?,
                    other => {
                        return Err(SqlError::Parse(format!(
                            "NOW expects an offset string, got: {}",
                            other
                        )))
                    }
                },
            };
            Ok(OpArg::Int(Utc::now().timestamp_millis() + offset))
        }
        _ => Err(SqlError::Parse(format!(
            "Unable to parse argument {}",
            expr
        ))),
    }
}

/// Resolve GROUP BY expressions against the projection.
fn resolve_group_by(exprs: &[Expr], heading: &Heading) -> Result<Vec<Column>> {
    let mut groups: Vec<Column> = Vec::with_capacity(exprs.len());
    for expr in exprs {
        let candidate = column_for_expr(expr)?;
        if !candidate.operator.is_grouping() {
            return Err(SqlError::Compile(format!(
                "Can not use function '{}' as GROUP BY, please use an alias to group by a function",
                candidate.label
            )));
        }

        let resolved = heading
            .column_by_label(&candidate.label)
            .or_else(|| {
                heading.iter().find(|c| {
                    c.operator.is_grouping()
                        && c.source_field.is_some()
                        && c.source_field == candidate.source_field
                })
            })
            .ok_or_else(|| {
                SqlError::Compile(format!(
                    "Group by '{}' not defined in SELECT",
                    candidate.label
                ))
            })?;

        if !resolved.operator.is_grouping() {
            return Err(SqlError::Compile(format!(
                "Can not GROUP BY aggregate '{}'",
                resolved.label
            )));
        }
        if groups.iter().any(|g| g.index == resolved.index) {
            return Err(SqlError::Compile(format!(
                "Column '{}' appears more than once in GROUP BY",
                resolved.label
            )));
        }

        let mut group = resolved.clone();
        if candidate.operator == Operation::DateHistogram {
            group.operator = Operation::DateHistogram;
            group.op_args = candidate.op_args;
        }
        groups.push(group);
    }
    Ok(groups)
}

fn parse_limit(expr: &Expr) -> Result<usize> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => n
            .parse::<usize>()
            .map_err(|_| SqlError::Parse(format!("Invalid LIMIT: {}", n))),
        other => Err(SqlError::Parse(format!("Invalid LIMIT: {}", other))),
    }
}

fn parse_order_by(query: &Query, heading: &Heading) -> Result<Option<OrderBy>> {
    let Some(first) = query.order_by.first() else {
        return Ok(None);
    };
    let label = column_for_expr(&first.expr)?.label;
    if !heading.has_label(&label) {
        return Err(SqlError::Compile(format!(
            "ORDER BY '{}' not defined in SELECT",
            label
        )));
    }
    Ok(Some(OrderBy {
        label,
        descending: first.asc == Some(false),
    }))
}

fn validate(plan: &QueryPlan, select: &Select) -> Result<()> {
    if plan.inner.is_some() {
        if select.selection.is_some() {
            return Err(SqlError::UnsupportedOperation(
                "WHERE is not supported on a query over a subquery".to_string(),
            ));
        }
        for column in plan.heading.iter() {
            let allowed = match column.operator {
                Operation::Min | Operation::Max | Operation::Avg | Operation::Growth => true,
                Operation::None => plan.group_by.iter().any(|g| g.index == column.index),
                _ => false,
            };
            if !allowed {
                return Err(SqlError::Compile(format!(
                    "Unsupported operation '{}' in a query over a subquery",
                    column.label
                )));
            }
        }
        if plan.group_by.iter().any(|g| g.operator != Operation::None) {
            return Err(SqlError::Compile(
                "Only plain columns can group a query over a subquery".to_string(),
            ));
        }
        return Ok(());
    }

    if let Some(growth) = plan
        .heading
        .iter()
        .find(|c| c.operator == Operation::Growth)
    {
        return Err(SqlError::Compile(format!(
            "'{}' can only be computed over a subquery",
            growth.label
        )));
    }
    if plan.distinct && plan.heading.has_aggregates() {
        return Err(SqlError::UnsupportedOperation(
            "DISTINCT cannot be combined with aggregate functions".to_string(),
        ));
    }
    Ok(())
}
