//! # Domain Model
//!
//! Records held by the store and exchanged with the app layer.
//!
//! Product-level records ([`Product`], [`Task`], [`TelemetryAttribute`]) are
//! templates authored by product owners. Customer-level records
//! ([`CustomerProduct`], [`AdoptionPlan`], [`CustomerTask`],
//! [`CustomerTelemetryAttribute`]) are instances derived from them.
//!
//! Stored rows are encoded with postcard, so record types must not use
//! `skip_serializing_if`: postcard expects every field on both sides.

use crate::criteria::SuccessCriteria;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wall-clock instant, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Generate a fresh record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// ENUMS
// =============================================================================

/// License tier. Ordering is the gating order: Essential < Advantage < Signature.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseLevel {
    /// Entry tier.
    #[default]
    Essential,
    /// Middle tier.
    Advantage,
    /// Top tier.
    Signature,
}

impl LicenseLevel {
    /// Numeric rank used by the eligibility filter.
    pub fn rank(self) -> u8 {
        match self {
            Self::Essential => 1,
            Self::Advantage => 2,
            Self::Signature => 3,
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Essential => "ESSENTIAL",
            Self::Advantage => "ADVANTAGE",
            Self::Signature => "SIGNATURE",
        }
    }
}

impl fmt::Display for LicenseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ESSENTIAL" => Ok(Self::Essential),
            "ADVANTAGE" => Ok(Self::Advantage),
            "SIGNATURE" => Ok(Self::Signature),
            other => Err(format!("unknown license level: {other}")),
        }
    }
}

/// Declared type of a telemetry attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    Number,
    String,
    Timestamp,
}

impl DataType {
    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Number => "NUMBER",
            Self::String => "STRING",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" => Ok(Self::Boolean),
            "NUMBER" => Ok(Self::Number),
            "STRING" => Ok(Self::String),
            "TIMESTAMP" => Ok(Self::Timestamp),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// Progress state of a customer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
    /// Was implemented, telemetry now shows the feature is no longer used.
    NoLongerUsing,
    /// Excluded from progress aggregates.
    NotApplicable,
}

impl TaskStatus {
    /// Counts as completed in plan aggregates.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Counts toward `total_tasks` in plan aggregates.
    pub fn is_applicable(self) -> bool {
        !matches!(self, Self::NotApplicable)
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::NoLongerUsing => "NO_LONGER_USING",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DONE" => Ok(Self::Done),
            "NO_LONGER_USING" => Ok(Self::NoLongerUsing),
            "NOT_APPLICABLE" => Ok(Self::NotApplicable),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Who last changed a task's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusUpdateSource {
    Manual,
    Telemetry,
}

/// How a telemetry value entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueSource {
    #[default]
    Manual,
    Import,
}

// =============================================================================
// PRODUCT DEFINITION
// =============================================================================

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub outcome_ids: Vec<String>,
    #[serde(default)]
    pub release_ids: Vec<String>,
}

/// Telemetry signal declared on a product task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryAttribute {
    pub id: String,
    pub name: String,
    pub data_type: DataType,
    #[serde(default, with = "crate::formats::stored_criteria")]
    pub success_criteria: Option<SuccessCriteria>,
    #[serde(default = "default_true")]
    pub is_required: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub order: u32,
}

/// Task template belonging to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default)]
    pub license_level: LicenseLevel,
    #[serde(default)]
    pub outcome_ids: Vec<String>,
    #[serde(default)]
    pub release_ids: Vec<String>,
    #[serde(default)]
    pub telemetry_attributes: Vec<TelemetryAttribute>,
    /// Set when the product owner deletes the task. Deleted tasks are never eligible.
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Task {
    /// Whether the task is still part of the product definition.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Bulk catalog payload used to seed the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

// =============================================================================
// CUSTOMER INSTANCES
// =============================================================================

/// Assignment of a product to a customer, with the chosen scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProduct {
    pub id: String,
    pub customer_id: String,
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub license_level: LicenseLevel,
    /// Opt-in outcome filter. Empty means "no outcome filter".
    #[serde(default)]
    pub selected_outcome_ids: Vec<String>,
    /// Opt-in release filter. Empty means "no release filter".
    #[serde(default)]
    pub selected_release_ids: Vec<String>,
}

/// Partial update of a [`CustomerProduct`]. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProductUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub license_level: Option<LicenseLevel>,
    #[serde(default)]
    pub selected_outcome_ids: Option<Vec<String>>,
    #[serde(default)]
    pub selected_release_ids: Option<Vec<String>>,
}

impl CustomerProductUpdate {
    /// Apply the present fields onto `target`.
    pub fn apply_to(&self, target: &mut CustomerProduct) {
        if let Some(name) = &self.name {
            target.name.clone_from(name);
        }
        if let Some(level) = self.license_level {
            target.license_level = level;
        }
        if let Some(ids) = &self.selected_outcome_ids {
            target.selected_outcome_ids.clone_from(ids);
        }
        if let Some(ids) = &self.selected_release_ids {
            target.selected_release_ids.clone_from(ids);
        }
    }
}

/// The instantiated checklist for one customer product.
///
/// Aggregates are recomputed by the store on every mutation; nothing edits
/// them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdoptionPlan {
    pub id: String,
    pub customer_product_id: String,
    pub product_id: String,
    pub product_name: String,
    pub license_level: LicenseLevel,
    pub selected_outcome_ids: Vec<String>,
    pub selected_release_ids: Vec<String>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub progress_percentage: f64,
    pub created_at: Timestamp,
    pub last_synced_at: Option<Timestamp>,
}

/// One observed value of a telemetry attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryValue {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub source: ValueSource,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

/// Instance copy of a [`TelemetryAttribute`] on a customer task, with its value history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerTelemetryAttribute {
    pub id: String,
    pub original_attribute_id: String,
    pub name: String,
    pub data_type: DataType,
    #[serde(default, with = "crate::formats::stored_criteria")]
    pub success_criteria: Option<SuccessCriteria>,
    pub is_required: bool,
    pub is_active: bool,
    pub order: u32,
    pub is_met: bool,
    pub last_checked_at: Option<Timestamp>,
    pub values: Vec<TelemetryValue>,
}

impl CustomerTelemetryAttribute {
    /// Instantiate from a product attribute with an empty history.
    pub fn from_template(template: &TelemetryAttribute) -> Self {
        Self {
            id: new_id(),
            original_attribute_id: template.id.clone(),
            name: template.name.clone(),
            data_type: template.data_type,
            success_criteria: template.success_criteria.clone(),
            is_required: template.is_required,
            is_active: template.is_active,
            order: template.order,
            is_met: false,
            last_checked_at: None,
            values: Vec::new(),
        }
    }

    /// The most recent value by creation time. Ties go to the later insert.
    pub fn current_value(&self) -> Option<&TelemetryValue> {
        self.values.iter().max_by_key(|v| v.created_at)
    }
}

/// Instance copy of a product [`Task`] inside an adoption plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerTask {
    pub id: String,
    pub adoption_plan_id: String,
    /// Back-reference to the product task this was instantiated from.
    pub original_task_id: String,
    pub name: String,
    pub description: Option<String>,
    pub sequence_number: u32,
    pub license_level: LicenseLevel,
    pub outcome_ids: Vec<String>,
    pub release_ids: Vec<String>,
    pub status: TaskStatus,
    pub status_update_source: Option<StatusUpdateSource>,
    pub status_updated_at: Option<Timestamp>,
    pub status_updated_by: Option<String>,
    pub status_notes: Option<String>,
    pub telemetry_attributes: Vec<CustomerTelemetryAttribute>,
    pub created_at: Timestamp,
    /// Soft-delete marker. Removed tasks stay for audit history but are out of the plan.
    pub removed_at: Option<Timestamp>,
}

impl CustomerTask {
    /// Instantiate a product task into a plan, status `NOT_STARTED`.
    pub fn from_template(adoption_plan_id: &str, template: &Task, now: Timestamp) -> Self {
        let mut telemetry_attributes: Vec<_> = template
            .telemetry_attributes
            .iter()
            .map(CustomerTelemetryAttribute::from_template)
            .collect();
        telemetry_attributes.sort_by_key(|a| a.order);

        Self {
            id: new_id(),
            adoption_plan_id: adoption_plan_id.to_string(),
            original_task_id: template.id.clone(),
            name: template.name.clone(),
            description: template.description.clone(),
            sequence_number: template.sequence_number,
            license_level: template.license_level,
            outcome_ids: template.outcome_ids.clone(),
            release_ids: template.release_ids.clone(),
            status: TaskStatus::NotStarted,
            status_update_source: None,
            status_updated_at: None,
            status_updated_by: None,
            status_notes: None,
            telemetry_attributes,
            created_at: now,
            removed_at: None,
        }
    }

    /// Still a member of its plan.
    pub fn is_live(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Look up one of this task's attributes by id.
    pub fn attribute(&self, attribute_id: &str) -> Option<&CustomerTelemetryAttribute> {
        self.telemetry_attributes
            .iter()
            .find(|a| a.id == attribute_id)
    }
}

// =============================================================================
// AUDIT
// =============================================================================

/// Append-only record of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    /// JSON document with action-specific details.
    pub details: String,
    pub actor: Option<String>,
    pub at: Timestamp,
}

impl AuditEntry {
    /// Build an entry; `details` is rendered to JSON text.
    pub fn new(
        action: &str,
        entity_type: &str,
        entity_id: &str,
        details: &serde_json::Value,
        actor: Option<&str>,
        at: Timestamp,
    ) -> Self {
        Self {
            id: new_id(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            details: details.to_string(),
            actor: actor.map(str::to_string),
            at,
        }
    }

    /// Storage key: sortable by time, unique by id.
    pub fn key(&self) -> String {
        format!(
            "{}#{}",
            self.at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            self.id
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
