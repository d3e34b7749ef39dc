//! WHERE clause translation into the engine's query DSL

use serde_json::{json, Value};
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue};

use crate::error::SqlError;
use crate::Result;

/// Query matching every document; used when there is no WHERE clause.
pub fn match_all() -> Value {
    json!({"match_all": {}})
}

/// Translate a WHERE expression into a query DSL object.
pub fn translate_filter(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Nested(inner) => translate_filter(inner),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(json!({
                "bool": {"must": [translate_filter(left)?, translate_filter(right)?]}
            })),
            BinaryOperator::Or => Ok(json!({
                "bool": {
                    "should": [translate_filter(left)?, translate_filter(right)?],
                    "minimum_should_match": 1
                }
            })),
            _ => translate_comparison(left, op, right),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(must_not(translate_filter(expr)?)),
        Expr::IsNull(inner) => {
            let field = field_name(inner)?;
            Ok(must_not(json!({"exists": {"field": field}})))
        }
        Expr::IsNotNull(inner) => {
            let field = field_name(inner)?;
            Ok(json!({"exists": {"field": field}}))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let field = field_name(expr)?;
            let values = list.iter().map(literal).collect::<Result<Vec<_>>>()?;
            let query = json!({"terms": {field: values}});
            Ok(if *negated { must_not(query) } else { query })
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let field = field_name(expr)?;
            let (low, high) = (literal(low)?, literal(high)?);
            let query = json!({"range": {field: {"gte": low, "lte": high}}});
            Ok(if *negated { must_not(query) } else { query })
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let field = field_name(expr)?;
            let pattern = match literal(pattern)? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let query = json!({"wildcard": {field: {"value": like_to_wildcard(&pattern)}}});
            Ok(if *negated { must_not(query) } else { query })
        }
        _ => Err(SqlError::UnsupportedOperation(format!(
            "Unsupported WHERE expression: {}",
            expr
        ))),
    }
}

fn must_not(query: Value) -> Value {
    json!({"bool": {"must_not": [query]}})
}

fn translate_comparison(left: &Expr, op: &BinaryOperator, right: &Expr) -> Result<Value> {
    // literal on the left: flip so the field is always first
    let (field, value, op) = match (field_name(left), field_name(right)) {
        (Ok(field), _) => (field, literal(right)?, op.clone()),
        (Err(_), Ok(field)) => (field, literal(left)?, flip(op)),
        (Err(e), Err(_)) => return Err(e),
    };

    let range = |bound: &str| json!({"range": {field.clone(): {bound: value.clone()}}});
    match op {
        BinaryOperator::Eq => Ok(json!({"term": {field.clone(): value.clone()}})),
        BinaryOperator::NotEq => Ok(must_not(json!({"term": {field.clone(): value.clone()}}))),
        BinaryOperator::Gt => Ok(range("gt")),
        BinaryOperator::GtEq => Ok(range("gte")),
        BinaryOperator::Lt => Ok(range("lt")),
        BinaryOperator::LtEq => Ok(range("lte")),
        other => Err(SqlError::UnsupportedOperation(format!(
            "Unsupported operator in WHERE: {}",
            other
        ))),
    }
}

fn flip(op: &BinaryOperator) -> BinaryOperator {
    match op {
        BinaryOperator::Gt => BinaryOperator::Lt,
        BinaryOperator::GtEq => BinaryOperator::LtEq,
        BinaryOperator::Lt => BinaryOperator::Gt,
        BinaryOperator::LtEq => BinaryOperator::GtEq,
        other => other.clone(),
    }
}

/// Field referenced by an identifier, quotes already stripped by the parser.
pub(crate) fn field_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => Ok(parts
            .iter()
            .map(|p| p.value.as_str())
            .collect::<Vec<_>>()
            .join(".")),
        Expr::Nested(inner) => field_name(inner),
        _ => Err(SqlError::UnsupportedOperation(format!(
            "Expected a field reference, got: {}",
            expr
        ))),
    }
}

fn literal(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(json!(i))
            } else {
                n.parse::<f64>()
                    .map(|f| json!(f))
                    .map_err(|_| SqlError::Parse(format!("Invalid number literal: {}", n)))
            }
        }
        Expr::Value(SqlValue::SingleQuotedString(s)) => Ok(json!(s)),
        Expr::Value(SqlValue::Boolean(b)) => Ok(json!(b)),
        Expr::Value(SqlValue::Null) => Ok(Value::Null),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(json!(-i)),
                None => Ok(json!(-n.as_f64().unwrap_or_default())),
            },
            other => Err(SqlError::Parse(format!("Cannot negate literal {}", other))),
        },
        Expr::Nested(inner) => literal(inner),
        _ => Err(SqlError::UnsupportedOperation(format!(
            "Expected a literal value, got: {}",
            expr
        ))),
    }
}

fn like_to_wildcard(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '%' => '*',
            '_' => '?',
            other => other,
        })
        .collect()
}
