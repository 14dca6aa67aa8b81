//! Adapter for criteria JSON written before the canonical tagged shape.
//!
//! Recognized shapes, in the order they are tried:
//!
//! | Shape                                             | Becomes                      |
//! |---------------------------------------------------|------------------------------|
//! | `{}`                                              | no criteria                  |
//! | `{"type": "boolean_equals", "expectedValue": ..}` | `boolean_flag`               |
//! | `{"type": "string_contains", "expectedValue": ..}`| `string_match` / contains    |
//! | tagged shape with loose fields (see below)        | same tag                     |
//! | `{"operator": ">=", "value": 10}` (no `type`)     | `number_threshold`           |
//! | `{"expectedValue": true}` (no `type`)             | `boolean_flag`               |
//!
//! Loose fields: thresholds under `threshold`, `targetValue` or `value`
//! (number or numeric string), symbolic operators (`>`, `>=`, `==`, ...),
//! booleans spelled as strings, `withinDays` as a string.

use crate::criteria::{
    CriteriaError, NumberOperator, StringMatchMode, SuccessCriteria, TimestampMode,
};
use serde_json::{Map, Value};

type Object = Map<String, Value>;

/// Convert a legacy JSON value. `Ok(None)` for the empty object.
pub fn adapt(value: &Value) -> Result<Option<SuccessCriteria>, CriteriaError> {
    let Some(obj) = value.as_object() else {
        return Err(malformed(format!("expected an object, got {value}")));
    };
    if obj.is_empty() {
        return Ok(None);
    }
    adapt_object(obj).map(Some)
}

fn adapt_object(obj: &Object) -> Result<SuccessCriteria, CriteriaError> {
    match obj.get("type").and_then(Value::as_str) {
        Some(kind) => adapt_tagged(kind, obj),
        None if obj.contains_key("operator") => number_threshold(obj),
        None if obj.contains_key("expectedValue") => boolean_flag(obj),
        None => Err(malformed("object has neither `type` nor `operator`")),
    }
}

fn adapt_tagged(kind: &str, obj: &Object) -> Result<SuccessCriteria, CriteriaError> {
    match kind {
        "boolean_flag" | "boolean_equals" => boolean_flag(obj),
        "number_threshold" => number_threshold(obj),
        "string_contains" => Ok(SuccessCriteria::StringMatch {
            mode: StringMatchMode::Contains,
            pattern: string_field(obj, &["pattern", "expectedValue", "value"])?,
            case_sensitive: bool_field(obj, "caseSensitive").unwrap_or(false),
        }),
        "string_match" => Ok(SuccessCriteria::StringMatch {
            mode: match obj.get("mode").and_then(Value::as_str) {
                None | Some("exact") => StringMatchMode::Exact,
                Some("contains") => StringMatchMode::Contains,
                Some("regex") => StringMatchMode::Regex,
                Some(other) => return Err(malformed(format!("unknown string mode `{other}`"))),
            },
            pattern: string_field(obj, &["pattern", "expectedValue", "value"])?,
            case_sensitive: bool_field(obj, "caseSensitive").unwrap_or(false),
        }),
        "string_not_null" => Ok(SuccessCriteria::StringNotNull),
        "timestamp_comparison" => timestamp_comparison(obj),
        "timestamp_not_null" => Ok(SuccessCriteria::TimestampNotNull),
        "composite_and" => Ok(SuccessCriteria::CompositeAnd {
            criteria: children(obj)?,
        }),
        "composite_or" => Ok(SuccessCriteria::CompositeOr {
            criteria: children(obj)?,
        }),
        other => Err(malformed(format!("unknown criteria type `{other}`"))),
    }
}

fn boolean_flag(obj: &Object) -> Result<SuccessCriteria, CriteriaError> {
    let expected_value = bool_field(obj, "expectedValue")
        .or_else(|| bool_field(obj, "value"))
        .ok_or(CriteriaError::MissingField {
            criteria: "boolean_flag",
            field: "expectedValue",
        })?;
    Ok(SuccessCriteria::BooleanFlag { expected_value })
}

fn number_threshold(obj: &Object) -> Result<SuccessCriteria, CriteriaError> {
    let operator = match obj.get("operator").and_then(Value::as_str) {
        Some(op) => parse_operator(op)?,
        None => {
            return Err(CriteriaError::MissingField {
                criteria: "number_threshold",
                field: "operator",
            });
        }
    };
    let threshold = ["threshold", "targetValue", "value"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(number))
        .ok_or(CriteriaError::MissingField {
            criteria: "number_threshold",
            field: "threshold",
        })?;
    Ok(SuccessCriteria::NumberThreshold {
        operator,
        threshold,
    })
}

fn timestamp_comparison(obj: &Object) -> Result<SuccessCriteria, CriteriaError> {
    let mode = match obj.get("mode").and_then(Value::as_str) {
        Some("before") => TimestampMode::Before,
        Some("after") => TimestampMode::After,
        Some("within_days") => TimestampMode::WithinDays,
        Some(other) => return Err(malformed(format!("unknown timestamp mode `{other}`"))),
        None => {
            return Err(CriteriaError::MissingField {
                criteria: "timestamp_comparison",
                field: "mode",
            });
        }
    };
    let reference_time = obj
        .get("referenceTime")
        .and_then(Value::as_str)
        .map(str::to_string);
    let within_days = obj
        .get("withinDays")
        .and_then(number)
        .filter(|d| *d >= 0.0 && d.fract() == 0.0 && *d <= f64::from(u32::MAX))
        .map(|d| d as u32);
    Ok(SuccessCriteria::TimestampComparison {
        mode,
        reference_time,
        within_days,
    })
}

fn children(obj: &Object) -> Result<Vec<SuccessCriteria>, CriteriaError> {
    let Some(items) = obj.get("criteria").and_then(Value::as_array) else {
        return Err(CriteriaError::MissingField {
            criteria: "composite",
            field: "criteria",
        });
    };
    items
        .iter()
        .map(|item| {
            if let Ok(canonical) = serde_json::from_value::<SuccessCriteria>(item.clone()) {
                return Ok(canonical);
            }
            item.as_object()
                .filter(|o| !o.is_empty())
                .ok_or_else(|| malformed("composite child must be a non-empty object"))
                .and_then(adapt_object)
        })
        .collect()
}

fn parse_operator(op: &str) -> Result<NumberOperator, CriteriaError> {
    match op.trim() {
        ">" | "gt" | "greater_than" => Ok(NumberOperator::GreaterThan),
        "<" | "lt" | "less_than" => Ok(NumberOperator::LessThan),
        "=" | "==" | "===" | "eq" | "equals" => Ok(NumberOperator::Equals),
        ">=" | "gte" | "greater_than_or_equal" => Ok(NumberOperator::GreaterThanOrEqual),
        "<=" | "lte" | "less_than_or_equal" => Ok(NumberOperator::LessThanOrEqual),
        other => Err(malformed(format!("unknown operator `{other}`"))),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn bool_field(obj: &Object, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

fn string_field(obj: &Object, keys: &[&'static str]) -> Result<String, CriteriaError> {
    keys.iter()
        .find_map(|key| match obj.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .ok_or(CriteriaError::MissingField {
            criteria: "string_match",
            field: keys[0],
        })
}

fn malformed(message: impl Into<String>) -> CriteriaError {
    CriteriaError::Malformed(message.into())
}
