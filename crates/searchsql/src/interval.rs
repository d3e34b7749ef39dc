//! Interval literals for date histograms ("30m", "1d", "3600000")

use tracing::warn;

use crate::column::OpArg;
use crate::error::SqlError;
use crate::Result;

/// Fallback interval when a literal cannot be parsed.
///
/// Kept at `24*60*6000` (144 minutes) for compatibility with existing
/// queries; a full day would be `24*60*60000`.
pub const DEFAULT_INTERVAL_MS: i64 = 24 * 60 * 6000;

/// Milliseconds per unit symbol. Units are case-sensitive (`m` vs `M`).
fn unit_millis(unit: char) -> Option<i64> {
    match unit {
        's' => Some(1_000),
        'm' => Some(60_000),
        'h' => Some(3_600_000),
        'd' => Some(86_400_000),
        'w' => Some(604_800_000),
        'M' => Some(2_592_000_000),
        'y' => Some(31_536_000_000),
        _ => None,
    }
}

/// Parse an interval literal into milliseconds.
///
/// A purely numeric literal is taken verbatim as milliseconds. Otherwise the
/// last character must be a unit symbol and the prefix an integer multiplier.
/// The result must be strictly positive.
pub fn try_parse_interval(literal: &str) -> Result<i64> {
    let ms = parse_span(literal)?;
    if ms == 0 {
        return Err(SqlError::MalformedInterval(format!(
            "interval '{}' must be positive",
            literal.trim()
        )));
    }
    Ok(ms)
}

/// Unsigned span shared by intervals and `NOW()` offsets; zero is allowed.
fn parse_span(literal: &str) -> Result<i64> {
    let literal = literal.trim();
    let negative =
        || SqlError::MalformedInterval(format!("interval '{}' must not be negative", literal));
    if let Ok(ms) = literal.parse::<i64>() {
        return if ms < 0 { Err(negative()) } else { Ok(ms) };
    }

    let unit = literal
        .chars()
        .last()
        .ok_or_else(|| SqlError::MalformedInterval("empty interval".to_string()))?;
    let millis = unit_millis(unit).ok_or_else(|| {
        SqlError::MalformedInterval(format!("unknown interval unit in '{}'", literal))
    })?;

    let prefix = &literal[..literal.len() - unit.len_utf8()];
    let multiplier = prefix.parse::<i64>().map_err(|_| {
        SqlError::MalformedInterval(format!("invalid interval multiplier in '{}'", literal))
    })?;
    if multiplier < 0 {
        return Err(negative());
    }

    multiplier
        .checked_mul(millis)
        .ok_or_else(|| SqlError::MalformedInterval(format!("interval '{}' overflows", literal)))
}

/// Lenient variant of [`try_parse_interval`]: malformed literals degrade to
/// `default_ms` instead of failing the query.
pub fn parse_interval(literal: &str, default_ms: i64) -> i64 {
    match try_parse_interval(literal) {
        Ok(ms) => ms,
        Err(e) => {
            warn!(literal = %literal, default_ms, error = %e, "using default interval");
            default_ms
        }
    }
}

/// Resolve a DATE_HISTOGRAM operator argument into milliseconds.
pub fn interval_from_arg(arg: Option<&OpArg>, default_ms: i64) -> i64 {
    match arg {
        Some(OpArg::Int(ms)) if *ms > 0 => *ms,
        Some(OpArg::Float(ms)) if *ms >= 1.0 => *ms as i64,
        Some(OpArg::Text(literal)) => parse_interval(literal, default_ms),
        Some(other) => {
            warn!(arg = ?other, default_ms, "non-positive interval, using default");
            default_ms
        }
        None => default_ms,
    }
}

/// Parse a signed offset such as `+5m` or `-1d`, as used by `NOW('+5m')`.
pub fn parse_offset(literal: &str) -> Result<i64> {
    let literal = literal.trim();
    if let Some(rest) = literal.strip_prefix('-') {
        Ok(-parse_span(rest)?)
    } else {
        parse_span(literal.strip_prefix('+').unwrap_or(literal))
    }
}
