//! Typed operator dispatch.
//!
//! Null checks short-circuit before any data-type dispatch; after that each
//! declared data type owns its operator subset and everything else fails
//! closed.

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};

use crate::campaign::{DataType, Operator};
use crate::value::PropertyValue;

/// Evaluate one operator against a resolved source value.
pub fn compare(
    data_type: DataType,
    operator: Operator,
    source: &PropertyValue,
    targets: &[PropertyValue],
    now: DateTime<Utc>,
) -> bool {
    match operator {
        Operator::IsNull => return source.is_null(),
        Operator::IsNotNull => return !source.is_null(),
        _ => {
            // Null matches only IS_NULL; non-null operators need targets.
            if source.is_null() || targets.is_empty() {
                return false;
            }
        }
    }

    match data_type {
        DataType::String => match source.as_str() {
            Some(s) => compare_string(operator, s, &string_targets(targets)),
            None => false,
        },
        DataType::Int | DataType::Bigint | DataType::Double => match source.as_f64() {
            Some(n) => compare_number(operator, n, &number_targets(targets)),
            None => false,
        },
        DataType::Boolean => match source.as_bool() {
            Some(b) => compare_boolean(operator, b, &bool_targets(targets)),
            None => false,
        },
        DataType::Datetime => match parse_instant(source) {
            Some(instant) if is_calendar_operator(operator) => compare_calendar(
                operator,
                instant.with_timezone(&Local).date_naive(),
                now.with_timezone(&Local).date_naive(),
                targets.first(),
            ),
            Some(instant) => {
                let parsed: Vec<DateTime<Utc>> =
                    targets.iter().filter_map(parse_instant).collect();
                compare_datetime(operator, instant, &parsed)
            }
            None => false,
        },
        DataType::Date => match normalize_date(source) {
            Some(day) if is_calendar_operator(operator) => {
                match NaiveDate::parse_from_str(&day, "%Y-%m-%d") {
                    Ok(naive) => compare_calendar(
                        operator,
                        naive,
                        now.with_timezone(&Local).date_naive(),
                        targets.first(),
                    ),
                    Err(_) => false,
                }
            }
            Some(day) => {
                let parsed: Vec<String> = targets.iter().filter_map(normalize_date).collect();
                compare_date(operator, &day, &parsed)
            }
            None => false,
        },
        DataType::Object => false,
        DataType::ArrayString => match source.as_string_array() {
            Some(elements) => compare_array(operator, &elements, &string_targets(targets)),
            None => false,
        },
    }
}

/// Extraction and relative-day operators; they read the target as a year,
/// month, "YYYY-MM" string, or whole-day offset instead of a date value.
fn is_calendar_operator(operator: Operator) -> bool {
    matches!(
        operator,
        Operator::YearEqual
            | Operator::MonthEqual
            | Operator::YearMonthEqual
            | Operator::Before
            | Operator::Past
            | Operator::WithinPast
            | Operator::After
            | Operator::Remaining
            | Operator::WithinRemaining
    )
}

fn string_targets(targets: &[PropertyValue]) -> Vec<&str> {
    targets.iter().filter_map(|t| t.as_str()).collect()
}

fn number_targets(targets: &[PropertyValue]) -> Vec<f64> {
    targets.iter().filter_map(|t| t.as_f64()).collect()
}

fn bool_targets(targets: &[PropertyValue]) -> Vec<bool> {
    targets.iter().filter_map(|t| t.as_bool()).collect()
}

/// String comparisons. LIKE is a case-insensitive substring test.
pub fn compare_string(operator: Operator, source: &str, targets: &[&str]) -> bool {
    let contains_any = || {
        let lowered = source.to_lowercase();
        targets.iter().any(|t| lowered.contains(&t.to_lowercase()))
    };
    match operator {
        Operator::Equal => targets.first().is_some_and(|t| *t == source),
        Operator::NotEqual => targets.first().is_some_and(|t| *t != source),
        Operator::Like => contains_any(),
        Operator::NotLike => !targets.is_empty() && !contains_any(),
        Operator::In => targets.contains(&source),
        Operator::NotIn => !targets.is_empty() && !targets.contains(&source),
        _ => false,
    }
}

/// Numeric comparisons over the unified Int/Float domain.
///
/// BETWEEN is exclusive on both bounds and NOT_BETWEEN inclusive on both,
/// so every number is classified by exactly one of the pair at a boundary.
pub fn compare_number(operator: Operator, source: f64, targets: &[f64]) -> bool {
    match operator {
        Operator::Equal => targets.first().is_some_and(|t| source == *t),
        Operator::NotEqual => targets.first().is_some_and(|t| source != *t),
        Operator::GreaterThan => targets.first().is_some_and(|t| source > *t),
        Operator::GreaterThanOrEqual => targets.first().is_some_and(|t| source >= *t),
        Operator::LessThan => targets.first().is_some_and(|t| source < *t),
        Operator::LessThanOrEqual => targets.first().is_some_and(|t| source <= *t),
        Operator::Between => {
            targets.len() == 2 && source > targets[0] && source < targets[1]
        }
        Operator::NotBetween => {
            targets.len() == 2 && (source <= targets[0] || source >= targets[1])
        }
        Operator::In => targets.iter().any(|t| source == *t),
        Operator::NotIn => !targets.is_empty() && targets.iter().all(|t| source != *t),
        _ => false,
    }
}

pub fn compare_boolean(operator: Operator, source: bool, targets: &[bool]) -> bool {
    match operator {
        Operator::Equal => targets.first().is_some_and(|t| source == *t),
        Operator::NotEqual => targets.first().is_some_and(|t| source != *t),
        Operator::In => targets.contains(&source),
        Operator::NotIn => !targets.is_empty() && !targets.contains(&source),
        _ => false,
    }
}

/// Instant ordering and membership comparisons for DATETIME values.
pub fn compare_datetime(
    operator: Operator,
    source: DateTime<Utc>,
    targets: &[DateTime<Utc>],
) -> bool {
    match operator {
        Operator::Equal => targets.first().is_some_and(|t| source == *t),
        Operator::NotEqual => targets.first().is_some_and(|t| source != *t),
        Operator::GreaterThan => targets.first().is_some_and(|t| source > *t),
        Operator::GreaterThanOrEqual => targets.first().is_some_and(|t| source >= *t),
        Operator::LessThan => targets.first().is_some_and(|t| source < *t),
        Operator::LessThanOrEqual => targets.first().is_some_and(|t| source <= *t),
        Operator::Between => {
            targets.len() == 2 && source > targets[0] && source < targets[1]
        }
        Operator::NotBetween => {
            targets.len() == 2 && (source <= targets[0] || source >= targets[1])
        }
        Operator::In => targets.contains(&source),
        Operator::NotIn => !targets.is_empty() && !targets.contains(&source),
        _ => false,
    }
}

/// Calendar-day ordering comparisons for DATE values ("YYYY-MM-DD" strings;
/// lexicographic order is date order for this format).
pub fn compare_date(operator: Operator, source: &str, targets: &[String]) -> bool {
    match operator {
        Operator::Equal => targets.first().is_some_and(|t| source == t),
        Operator::NotEqual => targets.first().is_some_and(|t| source != t),
        Operator::GreaterThan => targets.first().is_some_and(|t| source > t.as_str()),
        Operator::GreaterThanOrEqual => targets.first().is_some_and(|t| source >= t.as_str()),
        Operator::LessThan => targets.first().is_some_and(|t| source < t.as_str()),
        Operator::LessThanOrEqual => targets.first().is_some_and(|t| source <= t.as_str()),
        Operator::Between => {
            targets.len() == 2 && source > targets[0].as_str() && source < targets[1].as_str()
        }
        Operator::NotBetween => {
            targets.len() == 2
                && (source <= targets[0].as_str() || source >= targets[1].as_str())
        }
        Operator::In => targets.iter().any(|t| t == source),
        Operator::NotIn => !targets.is_empty() && targets.iter().all(|t| t != source),
        _ => false,
    }
}

/// Extraction (YEAR/MONTH/YEAR_MONTH) and relative-day operators shared by
/// DATE and DATETIME, computed against today's local calendar day.
fn compare_calendar(
    operator: Operator,
    day: NaiveDate,
    today: NaiveDate,
    first_target: Option<&PropertyValue>,
) -> bool {
    let Some(target) = first_target else {
        return false;
    };

    match operator {
        Operator::YearEqual => target
            .as_f64()
            .map(|y| day.year() as f64 == y)
            .or_else(|| target.as_str().map(|s| s == day.format("%Y").to_string()))
            .unwrap_or(false),
        Operator::MonthEqual => target
            .as_f64()
            .map(|m| day.month() as f64 == m)
            .or_else(|| target.as_str().map(|s| s == day.format("%m").to_string()))
            .unwrap_or(false),
        Operator::YearMonthEqual => target
            .as_str()
            .is_some_and(|s| s == day.format("%Y-%m").to_string()),
        Operator::Before | Operator::Past | Operator::WithinPast => {
            let Some(offset) = day_offset(target) else {
                return false;
            };
            let past_days = (today - day).num_days();
            match operator {
                Operator::Before => past_days == offset,
                Operator::Past => past_days >= offset,
                _ => (0..=offset).contains(&past_days),
            }
        }
        Operator::After | Operator::Remaining | Operator::WithinRemaining => {
            let Some(offset) = day_offset(target) else {
                return false;
            };
            let remaining_days = (day - today).num_days();
            match operator {
                Operator::After => remaining_days == offset,
                Operator::Remaining => remaining_days >= offset,
                _ => (0..=offset).contains(&remaining_days),
            }
        }
        _ => false,
    }
}

fn day_offset(target: &PropertyValue) -> Option<i64> {
    match target {
        PropertyValue::Int(n) => Some(*n),
        PropertyValue::Float(f) => Some(*f as i64),
        PropertyValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// ARRAY_STRING comparisons.
pub fn compare_array(operator: Operator, source: &[&str], targets: &[&str]) -> bool {
    let any_like = || {
        source.iter().any(|element| {
            let lowered = element.to_lowercase();
            targets.iter().any(|t| lowered.contains(&t.to_lowercase()))
        })
    };
    match operator {
        Operator::Contains => targets.first().is_some_and(|t| source.contains(t)),
        Operator::NotContains => targets.first().is_some_and(|t| !source.contains(t)),
        Operator::Any => targets.iter().any(|t| source.contains(t)),
        Operator::None => !targets.is_empty() && !targets.iter().any(|t| source.contains(t)),
        Operator::ArrayLike => any_like(),
        Operator::ArrayNotLike => !targets.is_empty() && !any_like(),
        _ => false,
    }
}

fn parse_instant(value: &PropertyValue) -> Option<DateTime<Utc>> {
    match value {
        PropertyValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        // Epoch milliseconds.
        PropertyValue::Int(ms) => DateTime::from_timestamp_millis(*ms),
        _ => None,
    }
}

/// Normalize a DATE-typed value to "YYYY-MM-DD". Accepts separator variants
/// ("." and "/") and instant strings, which are truncated to their day.
fn normalize_date(value: &PropertyValue) -> Option<String> {
    let s = value.as_str()?;
    let normalized = s.replace(['.', '/'], "-");
    if normalized.len() >= 10 && normalized.as_bytes()[4] == b'-' {
        Some(normalized[..10].to_string())
    } else {
        None
    }
}
