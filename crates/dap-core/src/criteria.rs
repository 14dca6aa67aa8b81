//! # Success Criteria
//!
//! The rule applied to a telemetry value to decide pass/fail.
//!
//! Criteria form a tree: leaves compare one typed value, composites combine
//! children with AND/OR. The canonical JSON shape carries a `type` tag:
//!
//! ```json
//! {"type": "composite_and", "criteria": [
//!     {"type": "number_threshold", "operator": "greater_than", "threshold": 50},
//!     {"type": "number_threshold", "operator": "less_than", "threshold": 150}
//! ]}
//! ```
//!
//! Older stored shapes are converted by [`crate::formats::legacy`] before they
//! reach this type.

use crate::model::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Comparison used by [`SuccessCriteria::NumberThreshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberOperator {
    GreaterThan,
    LessThan,
    Equals,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl NumberOperator {
    /// All operators, for exhaustive tests.
    pub const ALL: [Self; 5] = [
        Self::GreaterThan,
        Self::LessThan,
        Self::Equals,
        Self::GreaterThanOrEqual,
        Self::LessThanOrEqual,
    ];

    /// Apply the operator. Any NaN operand yields `false`.
    #[allow(clippy::float_cmp)]
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        if value.is_nan() || threshold.is_nan() {
            return false;
        }
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::Equals => value == threshold,
            Self::GreaterThanOrEqual => value >= threshold,
            Self::LessThanOrEqual => value <= threshold,
        }
    }

    /// Mathematical symbol, for human-readable details.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Equals => "=",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
        }
    }
}

/// Matching mode of [`SuccessCriteria::StringMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatchMode {
    Exact,
    Contains,
    Regex,
}

/// Comparison mode of [`SuccessCriteria::TimestampComparison`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    Before,
    After,
    WithinDays,
}

/// Reference value meaning "the evaluation instant".
pub const REFERENCE_NOW: &str = "now";

/// A success-criteria tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SuccessCriteria {
    /// Passes when the boolean value equals `expected_value`.
    BooleanFlag { expected_value: bool },

    /// Passes when `value <operator> threshold`.
    NumberThreshold {
        operator: NumberOperator,
        threshold: f64,
    },

    /// Passes when the string matches `pattern`. Case-insensitive unless flagged.
    StringMatch {
        mode: StringMatchMode,
        pattern: String,
        #[serde(default)]
        case_sensitive: bool,
    },

    /// Passes when the string is non-empty after trimming.
    StringNotNull,

    /// Passes when the instant is before/after `reference_time`, or within
    /// `within_days` of now. A missing reference means now.
    TimestampComparison {
        mode: TimestampMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference_time: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within_days: Option<u32>,
    },

    /// Passes when the value parses as an instant.
    TimestampNotNull,

    /// Passes when every child passes. Must not be empty.
    CompositeAnd { criteria: Vec<SuccessCriteria> },

    /// Passes when at least one child passes. Must not be empty.
    CompositeOr { criteria: Vec<SuccessCriteria> },
}

/// Rejected criteria definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    /// A composite without children.
    #[error("{0} must contain at least one criterion")]
    EmptyComposite(&'static str),

    /// A leaf that cannot apply to the attribute's declared type.
    #[error("{criteria} criteria cannot apply to a {data_type} attribute")]
    TypeMismatch {
        criteria: &'static str,
        data_type: DataType,
    },

    /// A required field is absent.
    #[error("{criteria} criteria requires `{field}`")]
    MissingField {
        criteria: &'static str,
        field: &'static str,
    },

    /// `referenceTime` is neither "now" nor a parsable instant.
    #[error("invalid reference time: {0}")]
    InvalidReferenceTime(String),

    /// The regex pattern does not compile.
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),

    /// The threshold is not a finite number.
    #[error("threshold must be a finite number")]
    NonFiniteThreshold,

    /// Stored JSON could not be understood in any known shape.
    #[error("malformed criteria: {0}")]
    Malformed(String),
}

impl SuccessCriteria {
    /// Tag name as it appears in JSON.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BooleanFlag { .. } => "boolean_flag",
            Self::NumberThreshold { .. } => "number_threshold",
            Self::StringMatch { .. } => "string_match",
            Self::StringNotNull => "string_not_null",
            Self::TimestampComparison { .. } => "timestamp_comparison",
            Self::TimestampNotNull => "timestamp_not_null",
            Self::CompositeAnd { .. } => "composite_and",
            Self::CompositeOr { .. } => "composite_or",
        }
    }

    /// The data type a leaf applies to. `None` for composites.
    pub fn applies_to(&self) -> Option<DataType> {
        match self {
            Self::BooleanFlag { .. } => Some(DataType::Boolean),
            Self::NumberThreshold { .. } => Some(DataType::Number),
            Self::StringMatch { .. } | Self::StringNotNull => Some(DataType::String),
            Self::TimestampComparison { .. } | Self::TimestampNotNull => Some(DataType::Timestamp),
            Self::CompositeAnd { .. } | Self::CompositeOr { .. } => None,
        }
    }

    /// Convenience constructor for AND composites.
    pub fn all(criteria: Vec<SuccessCriteria>) -> Self {
        Self::CompositeAnd { criteria }
    }

    /// Convenience constructor for OR composites.
    pub fn any(criteria: Vec<SuccessCriteria>) -> Self {
        Self::CompositeOr { criteria }
    }

    /// Check authoring invariants against the attribute's declared type.
    ///
    /// The evaluator tolerates invalid trees (it fails closed), but the store
    /// refuses to persist them.
    pub fn validate(&self, data_type: DataType) -> Result<(), CriteriaError> {
        match self {
            Self::CompositeAnd { criteria } | Self::CompositeOr { criteria } => {
                if criteria.is_empty() {
                    return Err(CriteriaError::EmptyComposite(self.kind()));
                }
                criteria.iter().try_for_each(|c| c.validate(data_type))
            }
            leaf => {
                if leaf.applies_to() != Some(data_type) {
                    return Err(CriteriaError::TypeMismatch {
                        criteria: leaf.kind(),
                        data_type,
                    });
                }
                leaf.validate_leaf()
            }
        }
    }

    fn validate_leaf(&self) -> Result<(), CriteriaError> {
        match self {
            Self::NumberThreshold { threshold, .. } if !threshold.is_finite() => {
                Err(CriteriaError::NonFiniteThreshold)
            }
            Self::StringMatch {
                mode: StringMatchMode::Regex,
                pattern,
                case_sensitive,
            } => crate::evaluator::compile_pattern(pattern, *case_sensitive)
                .map(|_| ())
                .map_err(CriteriaError::InvalidPattern),
            Self::TimestampComparison {
                mode,
                reference_time,
                within_days,
            } => {
                if *mode == TimestampMode::WithinDays && within_days.is_none() {
                    return Err(CriteriaError::MissingField {
                        criteria: "timestamp_comparison",
                        field: "withinDays",
                    });
                }
                match reference_time.as_deref() {
                    None => Ok(()),
                    Some(r) if r.eq_ignore_ascii_case(REFERENCE_NOW) => Ok(()),
                    Some(r) => crate::evaluator::parse_timestamp(r)
                        .map(|_| ())
                        .ok_or_else(|| CriteriaError::InvalidReferenceTime(r.to_string())),
                }
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SuccessCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BooleanFlag { expected_value } => write!(f, "value is {expected_value}"),
            Self::NumberThreshold {
                operator,
                threshold,
            } => write!(f, "value {} {threshold}", operator.symbol()),
            Self::StringMatch { mode, pattern, .. } => match mode {
                StringMatchMode::Exact => write!(f, "value equals \"{pattern}\""),
                StringMatchMode::Contains => write!(f, "value contains \"{pattern}\""),
                StringMatchMode::Regex => write!(f, "value matches /{pattern}/"),
            },
            Self::StringNotNull | Self::TimestampNotNull => f.write_str("value is present"),
            Self::TimestampComparison {
                mode,
                reference_time,
                within_days,
            } => {
                let reference = reference_time.as_deref().unwrap_or(REFERENCE_NOW);
                match mode {
                    TimestampMode::Before => write!(f, "value before {reference}"),
                    TimestampMode::After => write!(f, "value after {reference}"),
                    TimestampMode::WithinDays => {
                        write!(f, "value within {} days of now", within_days.unwrap_or(0))
                    }
                }
            }
            Self::CompositeAnd { criteria } => write!(f, "all of {} conditions", criteria.len()),
            Self::CompositeOr { criteria } => write!(f, "any of {} conditions", criteria.len()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
