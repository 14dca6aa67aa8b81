//! # Response Module
//!
//! Structured summaries returned by store operations.
//!
//! Bulk operations report counts and per-item errors rather than a single
//! success flag, so a caller can tell "nothing to do" from "partially failed".

use crate::model::{AdoptionPlan, CustomerTask, TaskStatus};
use crate::status::AttributeOutcome;
use serde::{Deserialize, Serialize};

/// Result of a plan sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Customer tasks created for newly eligible product tasks.
    pub tasks_added: u32,
    /// Customer tasks soft-deleted because they are no longer eligible.
    pub tasks_removed: u32,
    /// Customer tasks whose definition fields were refreshed.
    pub tasks_updated: u32,
    /// The plan with recomputed aggregates.
    pub plan: AdoptionPlan,
}

impl SyncOutcome {
    /// Whether the sync changed task membership or definitions.
    pub fn changed_anything(&self) -> bool {
        self.tasks_added + self.tasks_removed + self.tasks_updated > 0
    }
}

/// A row that could not be applied during import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// Zero-based position in the input.
    pub row: usize,
    pub message: String,
}

/// Result of a telemetry batch import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub rows_total: usize,
    pub rows_failed: usize,
    pub values_recorded: usize,
    /// Attributes whose current value passes its criteria after the import.
    pub criteria_met: usize,
    /// Tasks whose status was changed by the re-evaluation.
    pub tasks_status_changed: usize,
    pub errors: Vec<RowError>,
    /// Aggregates after the import, when a plan was touched.
    pub plan: Option<AdoptionPlan>,
}

impl ImportSummary {
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            ..Self::default()
        }
    }

    pub fn fail_row(&mut self, row: usize, message: impl Into<String>) {
        self.rows_failed += 1;
        self.errors.push(RowError {
            row,
            message: message.into(),
        });
    }

    /// No row failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of re-evaluating one customer task's telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvaluation {
    pub task_id: String,
    pub previous_status: TaskStatus,
    pub status: TaskStatus,
    pub status_changed: bool,
    pub attributes_met: usize,
    pub attributes_considered: usize,
    pub attributes: Vec<AttributeOutcome>,
}

impl TaskEvaluation {
    /// Assemble from the task after the assessment was applied.
    pub fn new(
        task: &CustomerTask,
        previous_status: TaskStatus,
        assessment: &crate::status::StatusAssessment,
        status_changed: bool,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            previous_status,
            status: task.status,
            status_changed,
            attributes_met: assessment.met,
            attributes_considered: assessment.considered,
            attributes: assessment.attribute_outcomes.clone(),
        }
    }
}

/// Result of rewriting stored criteria to the canonical shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub tasks_scanned: usize,
    pub tasks_rewritten: usize,
    pub customer_tasks_scanned: usize,
    pub customer_tasks_rewritten: usize,
    /// Rows that could not be decoded, as `table/key: reason`.
    pub failures: Vec<String>,
}

impl MigrationReport {
    pub fn rewritten(&self) -> usize {
        self.tasks_rewritten + self.customer_tasks_rewritten
    }
}

// =============================================================================
// TESTS
// =============================================================================
