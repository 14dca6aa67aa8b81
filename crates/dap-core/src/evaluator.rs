//! # Success-Criteria Evaluator
//!
//! Maps `(raw value, declared type, criteria)` to an [`EvaluationResult`].
//!
//! The evaluator runs inside bulk import loops, so it never returns an error
//! and never panics: coercion failures, invalid patterns and malformed trees
//! all degrade to `success = false` with a human-readable `error`.
//!
//! ## Coercion
//!
//! | Type      | Accepted raw strings                                          |
//! |-----------|---------------------------------------------------------------|
//! | BOOLEAN   | `true`/`1`/`yes`/`y`, `false`/`0`/`no`/`n` (any case)          |
//! | NUMBER    | locale-free finite float (`"1e3"`, `"-2.5"`)                   |
//! | STRING    | anything                                                      |
//! | TIMESTAMP | RFC 3339, `YYYY-MM-DDTHH:MM:SS[.f]` (UTC), or `YYYY-MM-DD`     |

use crate::criteria::{
    NumberOperator, REFERENCE_NOW, StringMatchMode, SuccessCriteria, TimestampMode,
};
use crate::model::{CustomerTelemetryAttribute, DataType, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Compiled-size cap for user-supplied patterns.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

// =============================================================================
// RESULT & CONTEXT
// =============================================================================

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Whether the criteria passed.
    pub success: bool,
    /// What was compared, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Why the value could not be evaluated. Implies `success == false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationResult {
    /// A passing result.
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            success: true,
            details: Some(details.into()),
            error: None,
        }
    }

    /// A failing result with an explanation.
    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
            error: None,
        }
    }

    /// A result for a value or criteria that could not be evaluated.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            details: None,
            error: Some(message.into()),
        }
    }

    fn from_bool(success: bool, details: String) -> Self {
        if success {
            Self::pass(details)
        } else {
            Self::fail(details)
        }
    }
}

/// Inputs that are not part of the criteria: currently only the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalContext {
    /// Instant used for `"now"` references and `within_days`.
    pub now: Timestamp,
}

impl EvalContext {
    /// Context pinned to a given instant.
    pub fn at(now: Timestamp) -> Self {
        Self { now }
    }

    /// Context on the wall clock.
    pub fn now() -> Self {
        Self { now: Utc::now() }
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::now()
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Evaluate a raw value against criteria on the wall clock.
pub fn evaluate(
    value: Option<&str>,
    data_type: DataType,
    criteria: &SuccessCriteria,
) -> EvaluationResult {
    evaluate_with(&EvalContext::now(), value, data_type, criteria)
}

/// Evaluate a raw value against criteria with an explicit context.
///
/// An absent value fails closed: there is nothing to coerce.
pub fn evaluate_with(
    ctx: &EvalContext,
    value: Option<&str>,
    data_type: DataType,
    criteria: &SuccessCriteria,
) -> EvaluationResult {
    let Some(raw) = value else {
        return EvaluationResult::error("no value to evaluate");
    };
    match TypedValue::coerce(raw, data_type) {
        Ok(typed) => evaluate_node(ctx, &typed, criteria),
        Err(reason) => EvaluationResult::error(format!("invalid value format: {reason}")),
    }
}

/// Evaluate an attribute's current value against its own criteria.
///
/// An attribute without criteria has nothing to check and passes.
pub fn evaluate_attribute(
    ctx: &EvalContext,
    attribute: &CustomerTelemetryAttribute,
) -> EvaluationResult {
    let Some(criteria) = &attribute.success_criteria else {
        return EvaluationResult::pass("no success criteria defined");
    };
    let value = attribute.current_value().map(|v| v.value.as_str());
    evaluate_with(ctx, value, attribute.data_type, criteria)
}

/// Evaluate many attributes independently, in input order.
pub fn evaluate_many(
    ctx: &EvalContext,
    attributes: &[CustomerTelemetryAttribute],
) -> Vec<(String, EvaluationResult)> {
    attributes
        .iter()
        .map(|a| (a.id.clone(), evaluate_attribute(ctx, a)))
        .collect()
}

// =============================================================================
// COERCION
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TypedValue<'a> {
    Boolean(bool),
    Number(f64),
    Text(&'a str),
    Timestamp(Timestamp),
}

impl<'a> TypedValue<'a> {
    fn coerce(raw: &'a str, data_type: DataType) -> Result<Self, String> {
        match data_type {
            DataType::Boolean => parse_bool(raw)
                .map(Self::Boolean)
                .ok_or_else(|| format!("\"{raw}\" is not a boolean")),
            DataType::Number => parse_number(raw)
                .map(Self::Number)
                .ok_or_else(|| format!("\"{raw}\" is not a number")),
            DataType::String => Ok(Self::Text(raw)),
            DataType::Timestamp => parse_timestamp(raw)
                .map(Self::Timestamp)
                .ok_or_else(|| format!("\"{raw}\" is not a timestamp")),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "BOOLEAN",
            Self::Number(_) => "NUMBER",
            Self::Text(_) => "STRING",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse an instant. Naive forms are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Compile a user pattern. Compiled per call; nothing is cached.
pub fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| e.to_string())
}

// =============================================================================
// TREE EVALUATION
// =============================================================================

fn evaluate_node(
    ctx: &EvalContext,
    value: &TypedValue<'_>,
    criteria: &SuccessCriteria,
) -> EvaluationResult {
    match (criteria, value) {
        (SuccessCriteria::CompositeAnd { criteria: children }, _) => {
            evaluate_all(ctx, value, children)
        }
        (SuccessCriteria::CompositeOr { criteria: children }, _) => {
            evaluate_any(ctx, value, children)
        }

        (SuccessCriteria::BooleanFlag { expected_value }, TypedValue::Boolean(actual)) => {
            EvaluationResult::from_bool(
                actual == expected_value,
                format!("value {actual}, expected {expected_value}"),
            )
        }

        (
            SuccessCriteria::NumberThreshold {
                operator,
                threshold,
            },
            TypedValue::Number(actual),
        ) => number_threshold(*operator, *actual, *threshold),

        (
            SuccessCriteria::StringMatch {
                mode,
                pattern,
                case_sensitive,
            },
            TypedValue::Text(actual),
        ) => string_match(*mode, pattern, *case_sensitive, actual),

        (SuccessCriteria::StringNotNull, TypedValue::Text(actual)) => EvaluationResult::from_bool(
            !actual.trim().is_empty(),
            "value must be non-empty".to_string(),
        ),

        (
            SuccessCriteria::TimestampComparison {
                mode,
                reference_time,
                within_days,
            },
            TypedValue::Timestamp(actual),
        ) => timestamp_comparison(ctx, *mode, reference_time.as_deref(), *within_days, *actual),

        (SuccessCriteria::TimestampNotNull, TypedValue::Timestamp(actual)) => {
            EvaluationResult::pass(format!("timestamp {}", actual.to_rfc3339()))
        }

        (leaf, other) => EvaluationResult::error(format!(
            "{} criteria cannot evaluate a {} value",
            leaf.kind(),
            other.type_name()
        )),
    }
}

fn evaluate_all(
    ctx: &EvalContext,
    value: &TypedValue<'_>,
    children: &[SuccessCriteria],
) -> EvaluationResult {
    if children.is_empty() {
        warn!("composite_and criteria has no children; failing closed");
        return EvaluationResult::error("composite_and has no criteria");
    }
    let total = children.len();
    for (index, child) in children.iter().enumerate() {
        let result = evaluate_node(ctx, value, child);
        if !result.success {
            return EvaluationResult {
                success: false,
                details: Some(format!(
                    "condition {} of {total} failed: {}",
                    index + 1,
                    result.details.as_deref().unwrap_or(child.kind())
                )),
                error: result.error,
            };
        }
    }
    EvaluationResult::pass(format!("all {total} conditions met"))
}

fn evaluate_any(
    ctx: &EvalContext,
    value: &TypedValue<'_>,
    children: &[SuccessCriteria],
) -> EvaluationResult {
    if children.is_empty() {
        warn!("composite_or criteria has no children; failing closed");
        return EvaluationResult::error("composite_or has no criteria");
    }
    let total = children.len();
    let mut first_error = None;
    for (index, child) in children.iter().enumerate() {
        let result = evaluate_node(ctx, value, child);
        if result.success {
            return EvaluationResult::pass(format!("condition {} of {total} met", index + 1));
        }
        if first_error.is_none() {
            first_error = result.error;
        }
    }
    EvaluationResult {
        success: false,
        details: Some(format!("none of {total} conditions met")),
        error: first_error,
    }
}

fn number_threshold(operator: NumberOperator, actual: f64, threshold: f64) -> EvaluationResult {
    if threshold.is_nan() {
        return EvaluationResult::error("threshold is not a number");
    }
    EvaluationResult::from_bool(
        operator.apply(actual, threshold),
        format!("{actual} {} {threshold}", operator.symbol()),
    )
}

fn string_match(
    mode: StringMatchMode,
    pattern: &str,
    case_sensitive: bool,
    actual: &str,
) -> EvaluationResult {
    let verb = match mode {
        StringMatchMode::Exact => "equals",
        StringMatchMode::Contains => "contains",
        StringMatchMode::Regex => "matches",
    };
    let details = format!("\"{actual}\" {verb} \"{pattern}\"");
    match mode {
        StringMatchMode::Exact => {
            let matched = if case_sensitive {
                actual == pattern
            } else {
                actual.to_lowercase() == pattern.to_lowercase()
            };
            EvaluationResult::from_bool(matched, details)
        }
        StringMatchMode::Contains => {
            let matched = if case_sensitive {
                actual.contains(pattern)
            } else {
                actual.to_lowercase().contains(&pattern.to_lowercase())
            };
            EvaluationResult::from_bool(matched, details)
        }
        StringMatchMode::Regex => match compile_pattern(pattern, case_sensitive) {
            Ok(regex) => EvaluationResult::from_bool(regex.is_match(actual), details),
            Err(e) => EvaluationResult::error(format!("invalid regex pattern: {e}")),
        },
    }
}

fn timestamp_comparison(
    ctx: &EvalContext,
    mode: TimestampMode,
    reference_time: Option<&str>,
    within_days: Option<u32>,
    actual: Timestamp,
) -> EvaluationResult {
    match mode {
        TimestampMode::WithinDays => {
            let Some(days) = within_days else {
                return EvaluationResult::error("within_days comparison requires withinDays");
            };
            let window = TimeDelta::try_days(i64::from(days)).unwrap_or(TimeDelta::MAX);
            EvaluationResult::from_bool(
                (ctx.now - actual).abs() <= window,
                format!("{} within {days} days of now", actual.to_rfc3339()),
            )
        }
        TimestampMode::Before | TimestampMode::After => {
            let reference = match reference_time {
                None => ctx.now,
                Some(r) if r.eq_ignore_ascii_case(REFERENCE_NOW) => ctx.now,
                Some(r) => match parse_timestamp(r) {
                    Some(t) => t,
                    None => {
                        return EvaluationResult::error(format!("invalid reference time: {r}"));
                    }
                },
            };
            let (passed, word) = if mode == TimestampMode::Before {
                (actual < reference, "before")
            } else {
                (actual > reference, "after")
            };
            EvaluationResult::from_bool(
                passed,
                format!(
                    "{} {word} {}",
                    actual.to_rfc3339(),
                    reference.to_rfc3339()
                ),
            )
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{TelemetryAttribute, TelemetryValue, ValueSource, new_id};
    use proptest::prelude::*;

    fn fixed_now() -> EvalContext {
        EvalContext::at(parse_timestamp("2025-06-15T12:00:00Z").unwrap())
    }

    fn threshold(operator: NumberOperator, threshold: f64) -> SuccessCriteria {
        SuccessCriteria::NumberThreshold {
            operator,
            threshold,
        }
    }

    fn run(value: &str, data_type: DataType, criteria: &SuccessCriteria) -> EvaluationResult {
        evaluate_with(&fixed_now(), Some(value), data_type, criteria)
    }

    // -------------------------------------------------------------------------
    // BOOLEAN
    // -------------------------------------------------------------------------

    #[test]
    fn boolean_flag_scenario() {
        let criteria = SuccessCriteria::BooleanFlag {
            expected_value: true,
        };
        assert!(run("true", DataType::Boolean, &criteria).success);
        assert!(!run("false", DataType::Boolean, &criteria).success);

        let missing = evaluate_with(&fixed_now(), None, DataType::Boolean, &criteria);
        assert!(!missing.success);
        assert!(missing.error.is_some());
    }

    #[test]
    fn boolean_spellings() {
        let expect_true = SuccessCriteria::BooleanFlag {
            expected_value: true,
        };
        let expect_false = SuccessCriteria::BooleanFlag {
            expected_value: false,
        };
        for raw in ["TRUE", "1", "yes", " Y "] {
            assert!(run(raw, DataType::Boolean, &expect_true).success, "{raw}");
        }
        for raw in ["FALSE", "0", "no", "n"] {
            assert!(run(raw, DataType::Boolean, &expect_false).success, "{raw}");
        }
        let bad = run("maybe", DataType::Boolean, &expect_true);
        assert!(!bad.success);
        assert!(bad.error.unwrap().starts_with("invalid value format"));
    }

    // -------------------------------------------------------------------------
    // NUMBER
    // -------------------------------------------------------------------------

    #[test]
    fn number_operators() {
        let cases = [
            (NumberOperator::GreaterThan, "150", true),
            (NumberOperator::GreaterThan, "50", false),
            (NumberOperator::LessThan, "50", true),
            (NumberOperator::Equals, "100", true),
            (NumberOperator::Equals, "100.0", true),
            (NumberOperator::GreaterThanOrEqual, "100", true),
            (NumberOperator::LessThanOrEqual, "100", true),
            (NumberOperator::LessThanOrEqual, "100.5", false),
        ];
        for (op, raw, expected) in cases {
            let result = run(raw, DataType::Number, &threshold(op, 100.0));
            assert_eq!(result.success, expected, "{op:?} {raw}");
        }
    }

    #[test]
    fn non_numeric_value_is_format_error() {
        let result = run(
            "not a number",
            DataType::Number,
            &threshold(NumberOperator::GreaterThan, 100.0),
        );
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn nan_threshold_fails() {
        let result = run(
            "1",
            DataType::Number,
            &threshold(NumberOperator::GreaterThan, f64::NAN),
        );
        assert!(!result.success);
    }

    #[test]
    fn nan_and_infinite_values_are_rejected() {
        for raw in ["NaN", "inf", "-infinity"] {
            let result = run(
                raw,
                DataType::Number,
                &threshold(NumberOperator::LessThan, 1.0),
            );
            assert!(result.error.is_some(), "{raw}");
        }
    }

    // -------------------------------------------------------------------------
    // STRING
    // -------------------------------------------------------------------------

    fn string_match_criteria(mode: StringMatchMode, pattern: &str, cs: bool) -> SuccessCriteria {
        SuccessCriteria::StringMatch {
            mode,
            pattern: pattern.into(),
            case_sensitive: cs,
        }
    }

    #[test]
    fn exact_match_case_handling() {
        let insensitive = string_match_criteria(StringMatchMode::Exact, "SUCCESS", false);
        assert!(run("success", DataType::String, &insensitive).success);

        let sensitive = string_match_criteria(StringMatchMode::Exact, "SUCCESS", true);
        assert!(!run("success", DataType::String, &sensitive).success);
        assert!(run("SUCCESS", DataType::String, &sensitive).success);
    }

    #[test]
    fn contains_match() {
        let criteria = string_match_criteria(StringMatchMode::Contains, "success", false);
        assert!(run("deployment was Successful", DataType::String, &criteria).success);
        assert!(!run("deployment failed", DataType::String, &criteria).success);
    }

    #[test]
    fn regex_match() {
        let criteria = string_match_criteria(StringMatchMode::Regex, "^deploy.*success$", false);
        assert!(run("deployment was a SUCCESS", DataType::String, &criteria).success);
        assert!(!run("deployment pending", DataType::String, &criteria).success);
    }

    #[test]
    fn invalid_regex_fails_without_panicking() {
        let criteria = string_match_criteria(StringMatchMode::Regex, "([", false);
        let result = run("anything", DataType::String, &criteria);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid regex"));
    }

    #[test]
    fn string_not_null() {
        assert!(run("some value", DataType::String, &SuccessCriteria::StringNotNull).success);
        assert!(!run("   ", DataType::String, &SuccessCriteria::StringNotNull).success);
    }

    // -------------------------------------------------------------------------
    // TIMESTAMP
    // -------------------------------------------------------------------------

    fn ts_criteria(
        mode: TimestampMode,
        reference: Option<&str>,
        days: Option<u32>,
    ) -> SuccessCriteria {
        SuccessCriteria::TimestampComparison {
            mode,
            reference_time: reference.map(str::to_string),
            within_days: days,
        }
    }

    #[test]
    fn before_and_after_reference() {
        let before = ts_criteria(TimestampMode::Before, Some("2025-12-31"), None);
        assert!(run("2025-01-15", DataType::Timestamp, &before).success);

        let after = ts_criteria(TimestampMode::After, Some("2024-01-01"), None);
        assert!(run("2025-01-15T10:30:00Z", DataType::Timestamp, &after).success);
        assert!(!run("2023-05-01", DataType::Timestamp, &after).success);
    }

    #[test]
    fn missing_reference_means_now() {
        let before_now = ts_criteria(TimestampMode::Before, None, None);
        assert!(run("2025-06-15T11:59:59Z", DataType::Timestamp, &before_now).success);
        assert!(!run("2025-06-15T12:00:01Z", DataType::Timestamp, &before_now).success);

        let after_now = ts_criteria(TimestampMode::After, Some("now"), None);
        assert!(run("2025-06-16", DataType::Timestamp, &after_now).success);
    }

    #[test]
    fn within_days_is_absolute_difference() {
        let criteria = ts_criteria(TimestampMode::WithinDays, Some("now"), Some(7));
        assert!(run("2025-06-12T12:00:00Z", DataType::Timestamp, &criteria).success);
        assert!(run("2025-06-20T12:00:00Z", DataType::Timestamp, &criteria).success);
        assert!(run("2025-06-08T12:00:00Z", DataType::Timestamp, &criteria).success);
        assert!(!run("2025-06-01T12:00:00Z", DataType::Timestamp, &criteria).success);
    }

    #[test]
    fn invalid_reference_time_fails() {
        let criteria = ts_criteria(TimestampMode::Before, Some("someday"), None);
        let result = run("2025-01-01", DataType::Timestamp, &criteria);
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn timestamp_not_null() {
        assert!(
            run(
                "2025-01-15T10:30:00Z",
                DataType::Timestamp,
                &SuccessCriteria::TimestampNotNull
            )
            .success
        );
        assert!(!run("soon", DataType::Timestamp, &SuccessCriteria::TimestampNotNull).success);
    }

    // -------------------------------------------------------------------------
    // COMPOSITES & MISMATCHES
    // -------------------------------------------------------------------------

    #[test]
    fn composite_and_or() {
        let and = SuccessCriteria::all(vec![
            threshold(NumberOperator::GreaterThan, 50.0),
            threshold(NumberOperator::LessThan, 150.0),
        ]);
        assert!(run("100", DataType::Number, &and).success);

        let and_fail = SuccessCriteria::all(vec![
            threshold(NumberOperator::GreaterThan, 50.0),
            threshold(NumberOperator::LessThan, 80.0),
        ]);
        let result = run("100", DataType::Number, &and_fail);
        assert!(!result.success);
        assert!(result.details.unwrap().starts_with("condition 2 of 2"));

        let or = SuccessCriteria::any(vec![
            threshold(NumberOperator::Equals, 50.0),
            threshold(NumberOperator::Equals, 100.0),
        ]);
        assert!(run("100", DataType::Number, &or).success);
    }

    #[test]
    fn empty_composites_fail_closed() {
        for criteria in [SuccessCriteria::all(vec![]), SuccessCriteria::any(vec![])] {
            let result = run("1", DataType::Number, &criteria);
            assert!(!result.success);
            assert!(result.error.is_some());
        }
    }

    #[test]
    fn leaf_of_wrong_type_fails() {
        let result = run(
            "true",
            DataType::Boolean,
            &threshold(NumberOperator::GreaterThan, 1.0),
        );
        assert!(!result.success);
        assert!(result.error.unwrap().contains("number_threshold"));
    }

    // -------------------------------------------------------------------------
    // ATTRIBUTE HELPERS
    // -------------------------------------------------------------------------

    fn attribute(criteria: Option<SuccessCriteria>, values: &[&str]) -> CustomerTelemetryAttribute {
        let mut attr = CustomerTelemetryAttribute::from_template(&TelemetryAttribute {
            id: new_id(),
            name: "logins".into(),
            data_type: DataType::Number,
            success_criteria: criteria,
            is_required: true,
            is_active: true,
            order: 0,
        });
        let base = fixed_now().now;
        attr.values = values
            .iter()
            .enumerate()
            .map(|(i, v)| TelemetryValue {
                id: new_id(),
                value: (*v).to_string(),
                batch_id: None,
                source: ValueSource::Import,
                notes: None,
                created_at: base + TimeDelta::seconds(i as i64),
            })
            .collect();
        attr
    }

    #[test]
    fn attribute_without_criteria_passes() {
        let attr = attribute(None, &["anything"]);
        assert!(evaluate_attribute(&fixed_now(), &attr).success);
    }

    #[test]
    fn attribute_without_values_fails() {
        let attr = attribute(Some(threshold(NumberOperator::GreaterThan, 100.0)), &[]);
        assert!(!evaluate_attribute(&fixed_now(), &attr).success);
    }

    #[test]
    fn attribute_uses_latest_value() {
        let attr = attribute(
            Some(threshold(NumberOperator::GreaterThan, 100.0)),
            &["500", "50"],
        );
        assert!(!evaluate_attribute(&fixed_now(), &attr).success);
    }

    #[test]
    fn evaluate_many_keeps_order() {
        let attrs = vec![
            attribute(Some(threshold(NumberOperator::GreaterThan, 100.0)), &["150"]),
            attribute(Some(threshold(NumberOperator::GreaterThan, 1000.0)), &["50"]),
        ];
        let results = evaluate_many(&fixed_now(), &attrs);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.success);
        assert!(!results[1].1.success);
        assert!(evaluate_many(&fixed_now(), &[]).is_empty());
    }

    // -------------------------------------------------------------------------
    // PROPERTIES
    // -------------------------------------------------------------------------

    fn operator_strategy() -> impl Strategy<Value = NumberOperator> {
        prop::sample::select(NumberOperator::ALL.to_vec())
    }

    fn leaf_strategy() -> impl Strategy<Value = SuccessCriteria> {
        (operator_strategy(), -1000.0f64..1000.0).prop_map(|(op, t)| threshold(op, t))
    }

    proptest! {
        #[test]
        fn threshold_agrees_with_direct_comparison(
            op in operator_strategy(),
            value in -1.0e9f64..1.0e9,
            limit in -1.0e9f64..1.0e9,
        ) {
            let result = run(&value.to_string(), DataType::Number, &threshold(op, limit));
            prop_assert_eq!(result.success, op.apply(value, limit));
            prop_assert!(result.error.is_none());
        }

        #[test]
        fn non_numeric_strings_never_pass(raw in "[a-zA-Z ]{1,12}") {
            prop_assume!(raw.trim().parse::<f64>().is_err());
            let result = run(&raw, DataType::Number, &threshold(NumberOperator::GreaterThan, 0.0));
            prop_assert!(!result.success);
            prop_assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        }

        #[test]
        fn composites_follow_truth_tables(
            leaves in prop::collection::vec(leaf_strategy(), 1..8),
            value in -1000.0f64..1000.0,
        ) {
            let criteria = leaves;
            let expected: Vec<bool> = criteria
                .iter()
                .map(|c| run(&value.to_string(), DataType::Number, c).success)
                .collect();

            let and = run(
                &value.to_string(),
                DataType::Number,
                &SuccessCriteria::all(criteria.clone()),
            );
            let or = run(&value.to_string(), DataType::Number, &SuccessCriteria::any(criteria));
            prop_assert_eq!(and.success, expected.iter().all(|b| *b));
            prop_assert_eq!(or.success, expected.iter().any(|b| *b));
        }
    }
}
