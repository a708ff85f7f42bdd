//! Targeting: matching variant queries against user attributes.
//!
//! Everything here is pure. The same rules ship to the browser as a
//! self-contained script (see [`script`]) so statically delivered pages
//! can pick their variant without a server round trip.

pub mod script;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use trellis_expr::Value;

use crate::model::{Query, Variant};
use crate::processor::is_truthy;

/// Attribute name to value, as supplied by the host.
pub type UserAttributes = Map<String, JsonValue>;

const URL_PATH: &str = "urlPath";

/// Whether every query matches and `now` falls inside the optional window.
pub fn matches(
    attributes: &UserAttributes,
    queries: &[Query],
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> bool {
    matches_at(attributes, queries, start_date, end_date, Utc::now())
}

/// [`matches`] against an explicit clock. A truthy `date` attribute
/// overrides `now`; when it cannot be parsed the window is not checked.
pub fn matches_at(
    attributes: &UserAttributes,
    queries: &[Query],
    start_date: Option<&str>,
    end_date: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    let now = match attributes.get("date") {
        Some(date) if is_truthy(date) => parse_date_value(date),
        _ => Some(now),
    };

    if let Some(now) = now {
        if start_date.and_then(parse_date).is_some_and(|start| start > now) {
            return false;
        }
        if end_date.and_then(parse_date).is_some_and(|end| end < now) {
            return false;
        }
    }

    queries.iter().all(|query| query_matches(attributes, query))
}

pub fn variant_matches(attributes: &UserAttributes, variant: &Variant) -> bool {
    matches(
        attributes,
        &variant.query,
        variant.start_date.as_deref(),
        variant.end_date.as_deref(),
    )
}

/// Matching variants in authored order.
pub fn filter_variants<'a>(attributes: &UserAttributes, variants: &'a [Variant]) -> Vec<&'a Variant> {
    variants
        .iter()
        .filter(|variant| variant_matches(attributes, variant))
        .collect()
}

/// Index of the first matching variant.
pub fn first_match(attributes: &UserAttributes, variants: &[Variant]) -> Option<usize> {
    variants
        .iter()
        .position(|variant| variant_matches(attributes, variant))
}

/// A single predicate. Queries missing a property or operator match.
pub fn query_matches(attributes: &UserAttributes, query: &Query) -> bool {
    let (Some(property), Some(operator)) = (
        query.property.as_deref().filter(|p| !p.is_empty()),
        query.operator.as_deref().filter(|o| !o.is_empty()),
    ) else {
        return true;
    };

    let test_value = match &query.value {
        Some(JsonValue::String(s)) if property == URL_PATH && s != "/" && s.ends_with('/') => {
            Some(JsonValue::String(s[..s.len() - 1].to_string()))
        }
        other => other.clone(),
    };

    if let Some(JsonValue::Array(candidates)) = &test_value {
        let single = |candidate: &JsonValue| {
            query_matches(
                attributes,
                &Query {
                    property: Some(property.to_string()),
                    operator: Some(operator.to_string()),
                    value: Some(candidate.clone()),
                },
            )
        };
        return if operator == "isNot" {
            candidates.iter().all(single)
        } else {
            candidates.iter().any(single)
        };
    }

    let test = test_value.as_ref().map(Value::from_json).unwrap_or_default();
    let actual = attributes.get(property);

    if let Some(JsonValue::Array(items)) = actual {
        return items.iter().any(|item| Value::from_json(item).strict_equals(&test));
    }

    let actual = actual.map(Value::from_json).unwrap_or_default();
    match operator {
        "is" => actual.strict_equals(&test),
        "isNot" => !actual.strict_equals(&test),
        "contains" => as_str(&actual).is_some_and(|s| s.contains(&test.to_js_string())),
        "startsWith" => as_str(&actual).is_some_and(|s| s.starts_with(&test.to_js_string())),
        "endsWith" => as_str(&actual).is_some_and(|s| s.ends_with(&test.to_js_string())),
        "greaterThan" => compare(&actual, &test, |a, b| a > b),
        "lessThan" => compare(&actual, &test, |a, b| a < b),
        "greaterThanOrEqualTo" => compare(&actual, &test, |a, b| a >= b),
        "lessThanOrEqualTo" => compare(&actual, &test, |a, b| a <= b),
        _ => false,
    }
}

fn as_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn compare(actual: &Value, test: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual, test) {
        (Value::Number(a), Value::Number(b)) => op(*a, *b),
        _ => false,
    }
}

fn parse_date_value(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => parse_date(s),
        JsonValue::Number(n) => n
            .as_f64()
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64)),
        _ => None,
    }
}

/// RFC 3339, a naive date-time, or a bare date. Naive values are UTC.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(text, format) {
            return Some(date.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}
