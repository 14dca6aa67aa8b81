//! Task status assessment from telemetry results.
//!
//! | Counted attributes met | Previous status (source TELEMETRY) | New status        |
//! |------------------------|------------------------------------|-------------------|
//! | all                    | any                                | `DONE`            |
//! | not all                | `DONE` / `NO_LONGER_USING`         | `NO_LONGER_USING` |
//! | some                   | other                              | `IN_PROGRESS`     |
//! | none                   | other                              | `NOT_STARTED`     |
//!
//! A status set by a person (source MANUAL, not `NOT_STARTED`) is never
//! overwritten. The `NO_LONGER_USING` regression only ever applies to tasks
//! whose current status came from telemetry.

use crate::evaluator::{EvalContext, EvaluationResult, evaluate_attribute};
use crate::model::{
    CustomerTask, CustomerTelemetryAttribute, StatusUpdateSource, TaskStatus, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Actor recorded on status changes made by telemetry.
pub const TELEMETRY_ACTOR: &str = "telemetry";

/// Note recorded on status changes made by telemetry.
pub const TELEMETRY_NOTE: &str = "Automatically updated based on telemetry criteria";

/// Evaluation of one attribute during an assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeOutcome {
    pub attribute_id: String,
    pub name: String,
    /// Whether this attribute takes part in the status decision.
    pub counted: bool,
    pub result: EvaluationResult,
}

/// Proposed status for one customer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusAssessment {
    pub new_status: TaskStatus,
    /// The task should be written: status differs and no manual lock applies.
    pub should_update: bool,
    /// Counted attributes that passed.
    pub met: usize,
    /// Counted attributes.
    pub considered: usize,
    pub was_previously_done_by_telemetry: bool,
    /// One entry per active attribute, in attribute order.
    pub attribute_outcomes: Vec<AttributeOutcome>,
}

impl StatusAssessment {
    /// Write the assessment onto `task`: per-attribute `is_met` always, the
    /// status only when [`should_update`](Self::should_update) holds.
    ///
    /// Returns whether the status changed.
    pub fn apply(&self, task: &mut CustomerTask, now: Timestamp) -> bool {
        for outcome in &self.attribute_outcomes {
            if let Some(attr) = task
                .telemetry_attributes
                .iter_mut()
                .find(|a| a.id == outcome.attribute_id)
            {
                attr.is_met = outcome.result.success;
                attr.last_checked_at = Some(now);
            }
        }
        if !self.should_update {
            return false;
        }
        task.status = self.new_status;
        task.status_update_source = Some(StatusUpdateSource::Telemetry);
        task.status_updated_at = Some(now);
        task.status_updated_by = Some(TELEMETRY_ACTOR.to_string());
        task.status_notes = Some(TELEMETRY_NOTE.to_string());
        true
    }
}

/// Assess a task's status from its attributes' current values.
///
/// With `batch_id`, only values from that batch count; an attribute whose
/// latest value came from elsewhere is treated as missing.
pub fn assess_task_status(
    task: &CustomerTask,
    ctx: &EvalContext,
    batch_id: Option<&str>,
) -> StatusAssessment {
    let active: Vec<&CustomerTelemetryAttribute> = task
        .telemetry_attributes
        .iter()
        .filter(|a| a.is_active)
        .collect();
    let any_required = active
        .iter()
        .any(|a| a.is_required && a.success_criteria.is_some());

    let attribute_outcomes: Vec<AttributeOutcome> = active
        .iter()
        .map(|attr| AttributeOutcome {
            attribute_id: attr.id.clone(),
            name: attr.name.clone(),
            counted: attr.success_criteria.is_some() && (attr.is_required || !any_required),
            result: evaluate_in_batch(ctx, attr, batch_id),
        })
        .collect();

    let considered = attribute_outcomes.iter().filter(|o| o.counted).count();
    let met = attribute_outcomes
        .iter()
        .filter(|o| o.counted && o.result.success)
        .count();

    let by_telemetry = task.status_update_source == Some(StatusUpdateSource::Telemetry);
    let was_previously_done_by_telemetry = by_telemetry && task.status == TaskStatus::Done;

    if considered == 0 {
        return StatusAssessment {
            new_status: task.status,
            should_update: false,
            met,
            considered,
            was_previously_done_by_telemetry,
            attribute_outcomes,
        };
    }

    let new_status = if met == considered {
        TaskStatus::Done
    } else if by_telemetry
        && matches!(task.status, TaskStatus::Done | TaskStatus::NoLongerUsing)
    {
        TaskStatus::NoLongerUsing
    } else if met > 0 {
        TaskStatus::InProgress
    } else {
        TaskStatus::NotStarted
    };

    let manual_lock = task.status_update_source == Some(StatusUpdateSource::Manual)
        && task.status != TaskStatus::NotStarted;
    let should_update = new_status != task.status && !manual_lock;

    StatusAssessment {
        new_status,
        should_update,
        met,
        considered,
        was_previously_done_by_telemetry,
        attribute_outcomes,
    }
}

fn evaluate_in_batch(
    ctx: &EvalContext,
    attr: &CustomerTelemetryAttribute,
    batch_id: Option<&str>,
) -> EvaluationResult {
    let Some(batch) = batch_id else {
        return evaluate_attribute(ctx, attr);
    };
    if attr.success_criteria.is_none() {
        return evaluate_attribute(ctx, attr);
    }
    match attr.current_value() {
        Some(v) if v.batch_id.as_deref() == Some(batch) => evaluate_attribute(ctx, attr),
        _ => EvaluationResult::error(format!("no value in batch {batch}")),
    }
}

// =============================================================================
// TESTS
// =============================================================================
