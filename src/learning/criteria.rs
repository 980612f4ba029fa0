//! Pattern criteria evaluation
//!
//! A criteria map is `field -> expectation`, where an expectation is one of:
//! - a scalar: equality with the context value
//! - an array: the context value is a member (or overlaps, for array contexts)
//! - `{"operator": "gt|gte|lt|lte|contains|regex", "value": ...}`
//!
//! Every field must be satisfied for the criteria to match.

use super::Context;
use crate::error::{Result, VigilError};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

const OPERATORS: &[&str] = &["gt", "gte", "lt", "lte", "contains", "regex"];

/// Reject unknown operators and invalid regexes up front
pub fn validate(criteria: &Map<String, Value>) -> Result<()> {
    for (field, expected) in criteria {
        let Some((operator, operand)) = as_condition(expected) else {
            continue;
        };

        if !OPERATORS.contains(&operator) {
            return Err(VigilError::InvalidCriteria(format!(
                "unknown operator '{}' for field '{}'",
                operator, field
            )));
        }

        if operator == "regex" {
            let pattern = operand.as_str().ok_or_else(|| {
                VigilError::InvalidCriteria(format!("regex for '{}' must be a string", field))
            })?;
            Regex::new(pattern)?;
        }
    }
    Ok(())
}

/// True when every criteria field is satisfied by `context`
pub fn matches(criteria: &Map<String, Value>, context: &Context) -> bool {
    criteria.iter().all(|(field, expected)| match context.get(field) {
        Some(actual) => field_matches(expected, actual),
        None => false,
    })
}

fn as_condition(expected: &Value) -> Option<(&str, &Value)> {
    let object = expected.as_object()?;
    let operator = object.get("operator")?.as_str()?;
    Some((operator, object.get("value").unwrap_or(&Value::Null)))
}

/// Strict match of one expectation against one context value
pub fn field_matches(expected: &Value, actual: &Value) -> bool {
    if let Some((operator, operand)) = as_condition(expected) {
        return evaluate_operator(operator, operand, actual);
    }

    match (expected, actual) {
        (Value::Array(options), Value::Array(values)) => {
            values.iter().any(|v| options.iter().any(|o| scalar_eq(o, v)))
        }
        (Value::Array(options), value) => options.iter().any(|o| scalar_eq(o, value)),
        (expected, actual) => scalar_eq(expected, actual),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn evaluate_operator(operator: &str, operand: &Value, actual: &Value) -> bool {
    match operator {
        "gt" | "gte" | "lt" | "lte" => {
            let (Some(actual), Some(operand)) = (actual.as_f64(), operand.as_f64()) else {
                return false;
            };
            match operator {
                "gt" => actual > operand,
                "gte" => actual >= operand,
                "lt" => actual < operand,
                _ => actual <= operand,
            }
        }
        "contains" => match (actual, operand) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| scalar_eq(item, needle)),
            _ => false,
        },
        "regex" => match (actual.as_str(), operand.as_str()) {
            (Some(text), Some(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}

/// Graded similarity in [0, 1] used for context-match scoring
///
/// Booleans match exactly, strings by word overlap, numbers by relative
/// proximity, arrays by membership; operator conditions score 1 or 0.
pub fn field_similarity(expected: &Value, actual: &Value) -> f64 {
    if as_condition(expected).is_some() || expected.is_array() {
        return if field_matches(expected, actual) { 1.0 } else { 0.0 };
    }

    match (expected, actual) {
        (Value::Bool(a), Value::Bool(b)) => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        (Value::String(a), Value::String(b)) => word_overlap(a, b),
        (Value::Number(_), Value::Number(_)) => {
            let (a, b) = (expected.as_f64().unwrap_or(0.0), actual.as_f64().unwrap_or(0.0));
            let scale = a.abs().max(b.abs()).max(1.0);
            (1.0 - (a - b).abs() / scale).max(0.0)
        }
        (expected, Value::Array(values)) => {
            if values.iter().any(|v| scalar_eq(expected, v)) {
                1.0
            } else {
                0.0
            }
        }
        (expected, actual) => {
            if expected == actual {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Jaccard overlap of lowercase word sets
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    };

    let (a, b) = (words(a), words(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let union = a.union(&b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        a.intersection(&b).count() as f64 / union
    }
}
