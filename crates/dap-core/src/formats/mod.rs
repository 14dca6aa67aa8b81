//! # Formats Module
//!
//! Criteria encoding for storage and the JSON API.
//!
//! This module contains:
//! - The canonical JSON codec (`{"type": ..., ...}`, see [`SuccessCriteria`])
//! - The adapter for older stored shapes ([`legacy`])
//! - The serde `with` module used by record fields holding criteria
//!
//! Records are stored with postcard, which cannot drive an internally tagged
//! enum. Criteria fields are therefore written as canonical JSON text inside
//! the postcard row, and read back through the same canonical-or-legacy path
//! as API input.

pub mod legacy;

use crate::criteria::{CriteriaError, SuccessCriteria};
use serde_json::Value;

/// Decode criteria JSON text, accepting canonical and legacy shapes.
///
/// `Ok(None)` means "no criteria" (`null`, `{}` or blank text).
pub fn decode_criteria_json(text: &str) -> Result<Option<SuccessCriteria>, CriteriaError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| CriteriaError::Malformed(e.to_string()))?;
    decode_criteria_value(value)
}

/// Decode an already-parsed JSON value. Canonical shape first, then legacy.
pub fn decode_criteria_value(value: Value) -> Result<Option<SuccessCriteria>, CriteriaError> {
    if value.is_null() {
        return Ok(None);
    }
    if let Ok(criteria) = serde_json::from_value::<SuccessCriteria>(value.clone()) {
        return Ok(Some(criteria));
    }
    legacy::adapt(&value)
}

/// Canonical JSON text for criteria.
pub fn encode_criteria_json(criteria: &SuccessCriteria) -> Result<String, CriteriaError> {
    serde_json::to_string(criteria).map_err(|e| CriteriaError::Malformed(e.to_string()))
}

/// Whether stored JSON text is already in canonical form (re-encoding is a no-op).
pub fn is_canonical(text: &str) -> bool {
    match decode_criteria_json(text) {
        Ok(Some(criteria)) => encode_criteria_json(&criteria).is_ok_and(|c| c == text),
        Ok(None) | Err(_) => false,
    }
}

/// Serde adapter for `Option<SuccessCriteria>` record fields.
///
/// Human-readable formats see the tagged object (or legacy JSON on input).
/// Binary formats see an optional canonical JSON string.
pub mod stored_criteria {
    use super::{decode_criteria_json, decode_criteria_value, encode_criteria_json};
    use crate::criteria::SuccessCriteria;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<SuccessCriteria>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            return value.serialize(serializer);
        }
        let text = value
            .as_ref()
            .map(encode_criteria_json)
            .transpose()
            .map_err(S::Error::custom)?;
        text.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SuccessCriteria>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            match Option::<serde_json::Value>::deserialize(deserializer)? {
                Some(value) => decode_criteria_value(value).map_err(D::Error::custom),
                None => Ok(None),
            }
        } else {
            match Option::<String>::deserialize(deserializer)? {
                Some(text) => decode_criteria_json(&text).map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}
