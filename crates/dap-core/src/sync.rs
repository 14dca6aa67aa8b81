//! # Plan Synchronizer
//!
//! Pure reconciliation of an adoption plan's tasks against the product
//! definition. [`plan_sync`] computes what must change; the store applies the
//! result inside one write transaction.
//!
//! Sync owns task membership and definition-derived fields only. Status,
//! status provenance and telemetry values are recorded progress and are never
//! modified here.

use crate::eligibility::{Eligibility, EligibilityFilter};
use crate::model::{AdoptionPlan, CustomerTask, CustomerTelemetryAttribute, Task, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Changes needed to bring a plan in line with its product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// New customer tasks, status `NOT_STARTED`.
    pub to_add: Vec<CustomerTask>,
    /// Live tasks no longer eligible, already stamped with `removed_at`.
    pub to_remove: Vec<CustomerTask>,
    /// Live tasks whose definition fields were refreshed.
    pub to_update: Vec<CustomerTask>,
    /// Live tasks that needed nothing.
    pub unchanged: usize,
}

impl SyncPlan {
    /// Nothing to write.
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    /// Every record that must be written.
    pub fn changed(&self) -> impl Iterator<Item = &CustomerTask> {
        self.to_add
            .iter()
            .chain(&self.to_update)
            .chain(&self.to_remove)
    }

    /// Apply the changes to an in-memory task list (replace by id, append new).
    pub fn apply(&self, tasks: &mut Vec<CustomerTask>) {
        let mut index: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        for task in self.to_update.iter().chain(&self.to_remove) {
            if let Some(&i) = index.get(&task.id) {
                tasks[i] = task.clone();
            }
        }
        for task in &self.to_add {
            index.insert(task.id.clone(), tasks.len());
            tasks.push(task.clone());
        }
    }
}

/// Compute the reconciliation for one plan.
///
/// `existing` may include soft-deleted tasks; they are ignored. A product task
/// that becomes eligible again gets a fresh customer task rather than
/// resurrecting the removed one.
pub fn plan_sync(
    plan_id: &str,
    filter: &EligibilityFilter,
    product_tasks: &[Task],
    existing: &[CustomerTask],
    now: Timestamp,
) -> SyncPlan {
    let templates: HashMap<&str, &Task> =
        product_tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut live: Vec<&CustomerTask> = existing.iter().filter(|t| t.is_live()).collect();
    live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut out = SyncPlan::default();
    let mut present: HashSet<&str> = HashSet::new();

    for task in live {
        let original = task.original_task_id.as_str();
        if !present.insert(original) {
            debug!(task = %task.id, original, "duplicate customer task removed");
            out.to_remove.push(removed(task, now));
            continue;
        }
        let verdict = templates
            .get(original)
            .map_or(Eligibility::Deleted, |template| filter.check(template));
        match (verdict, templates.get(original)) {
            (Eligibility::Eligible, Some(template)) => {
                let mut refreshed = task.clone();
                if refresh_from_template(&mut refreshed, template) {
                    out.to_update.push(refreshed);
                } else {
                    out.unchanged += 1;
                }
            }
            (verdict, _) => {
                debug!(task = %task.id, original, ?verdict, "customer task no longer eligible");
                out.to_remove.push(removed(task, now));
                present.remove(original);
            }
        }
    }

    let mut missing: Vec<&Task> = product_tasks
        .iter()
        .filter(|t| !present.contains(t.id.as_str()))
        .filter(|t| filter.is_eligible(t))
        .collect();
    missing.sort_by(|a, b| {
        a.sequence_number
            .cmp(&b.sequence_number)
            .then_with(|| a.id.cmp(&b.id))
    });
    for template in missing {
        debug!(original = %template.id, "customer task added");
        out.to_add.push(CustomerTask::from_template(plan_id, template, now));
    }

    out
}

fn removed(task: &CustomerTask, now: Timestamp) -> CustomerTask {
    let mut task = task.clone();
    task.removed_at = Some(now);
    task
}

/// Copy definition fields from the product task. Returns whether anything changed.
pub fn refresh_from_template(task: &mut CustomerTask, template: &Task) -> bool {
    let before = task.clone();

    task.name.clone_from(&template.name);
    task.description.clone_from(&template.description);
    task.sequence_number = template.sequence_number;
    task.license_level = template.license_level;
    task.outcome_ids.clone_from(&template.outcome_ids);
    task.release_ids.clone_from(&template.release_ids);

    let mut current: HashMap<String, CustomerTelemetryAttribute> =
        std::mem::take(&mut task.telemetry_attributes)
            .into_iter()
            .map(|a| (a.original_attribute_id.clone(), a))
            .collect();
    let mut attributes: Vec<CustomerTelemetryAttribute> = template
        .telemetry_attributes
        .iter()
        .map(|def| match current.remove(&def.id) {
            Some(mut attr) => {
                attr.name.clone_from(&def.name);
                attr.data_type = def.data_type;
                attr.success_criteria.clone_from(&def.success_criteria);
                attr.is_required = def.is_required;
                attr.is_active = def.is_active;
                attr.order = def.order;
                attr
            }
            None => CustomerTelemetryAttribute::from_template(def),
        })
        .collect();
    attributes.sort_by_key(|a| a.order);
    task.telemetry_attributes = attributes;

    *task != before
}

// =============================================================================
// AGGREGATES
// =============================================================================

/// Plan-level completion figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub progress_percentage: f64,
}

impl PlanProgress {
    pub fn apply_to(&self, plan: &mut AdoptionPlan) {
        plan.total_tasks = self.total_tasks;
        plan.completed_tasks = self.completed_tasks;
        plan.progress_percentage = self.progress_percentage;
    }
}

/// Aggregate over live, applicable tasks. Percentage has two decimals.
pub fn compute_progress<'a>(tasks: impl IntoIterator<Item = &'a CustomerTask>) -> PlanProgress {
    let (total, completed) = tasks
        .into_iter()
        .filter(|t| t.is_live() && t.status.is_applicable())
        .fold((0u32, 0u32), |(total, done), t| {
            (total + 1, done + u32::from(t.status.is_complete()))
        });
    PlanProgress {
        total_tasks: total,
        completed_tasks: completed,
        progress_percentage: percentage(completed, total),
    }
}

#[allow(clippy::float_arithmetic)]
fn percentage(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(completed) / f64::from(total) * 100.0;
    (raw * 100.0).round() / 100.0
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_arithmetic)]
mod tests {
    use super::*;
    use crate::criteria::SuccessCriteria;
    use crate::evaluator::parse_timestamp;
    use crate::model::{
        DataType, LicenseLevel, StatusUpdateSource, TaskStatus, TelemetryAttribute,
        TelemetryValue, ValueSource,
    };

    fn now() -> Timestamp {
        parse_timestamp("2025-05-01T09:00:00Z").unwrap()
    }

    fn later() -> Timestamp {
        parse_timestamp("2025-05-02T09:00:00Z").unwrap()
    }

    fn product_task(id: &str, seq: u32, level: LicenseLevel, outcomes: &[&str]) -> Task {
        Task {
            id: id.into(),
            product_id: "p".into(),
            name: format!("task {id}"),
            description: None,
            sequence_number: seq,
            license_level: level,
            outcome_ids: outcomes.iter().map(|s| s.to_string()).collect(),
            release_ids: vec![],
            telemetry_attributes: vec![TelemetryAttribute {
                id: format!("{id}-attr"),
                name: "enabled".into(),
                data_type: DataType::Boolean,
                success_criteria: Some(SuccessCriteria::BooleanFlag {
                    expected_value: true,
                }),
                is_required: true,
                is_active: true,
                order: 0,
            }],
            deleted_at: None,
        }
    }

    fn filter(level: LicenseLevel, outcomes: &[&str]) -> EligibilityFilter {
        EligibilityFilter::new(level, outcomes.iter().map(|s| s.to_string()), [])
    }

    fn sync(
        f: &EligibilityFilter,
        product: &[Task],
        tasks: &mut Vec<CustomerTask>,
        at: Timestamp,
    ) -> SyncPlan {
        let plan = plan_sync("plan", f, product, tasks, at);
        plan.apply(tasks);
        plan
    }

    fn live_originals(tasks: &[CustomerTask]) -> Vec<String> {
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|t| t.is_live())
            .map(|t| t.original_task_id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn initial_sync_adds_eligible_tasks_in_sequence_order() {
        let product = vec![
            product_task("b", 2, LicenseLevel::Essential, &[]),
            product_task("a", 1, LicenseLevel::Essential, &[]),
            product_task("c", 3, LicenseLevel::Signature, &[]),
        ];
        let mut tasks = Vec::new();
        let plan = sync(&filter(LicenseLevel::Essential, &[]), &product, &mut tasks, now());
        let added: Vec<&str> = plan.to_add.iter().map(|t| t.original_task_id.as_str()).collect();
        assert_eq!(added, vec!["a", "b"]);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::NotStarted));
    }

    #[test]
    fn sync_is_idempotent() {
        let product = vec![
            product_task("a", 1, LicenseLevel::Essential, &["o1"]),
            product_task("b", 2, LicenseLevel::Advantage, &[]),
        ];
        let f = filter(LicenseLevel::Advantage, &["o1"]);
        let mut tasks = Vec::new();
        sync(&f, &product, &mut tasks, now());
        let snapshot = tasks.clone();

        let second = sync(&f, &product, &mut tasks, later());
        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);
        assert_eq!(tasks, snapshot);
    }

    #[test]
    fn sync_preserves_status_and_values() {
        let mut product = vec![product_task("a", 1, LicenseLevel::Essential, &[])];
        let f = filter(LicenseLevel::Essential, &[]);
        let mut tasks = Vec::new();
        sync(&f, &product, &mut tasks, now());

        tasks[0].status = TaskStatus::Done;
        tasks[0].status_update_source = Some(StatusUpdateSource::Telemetry);
        tasks[0].status_updated_at = Some(now());
        tasks[0].telemetry_attributes[0].values.push(TelemetryValue {
            id: "v1".into(),
            value: "true".into(),
            batch_id: None,
            source: ValueSource::Manual,
            notes: None,
            created_at: now(),
        });

        product[0].name = "renamed".into();
        let plan = sync(&f, &product, &mut tasks, later());
        assert_eq!(plan.to_update.len(), 1);

        let t = &tasks[0];
        assert_eq!(t.name, "renamed");
        assert_eq!(t.status, TaskStatus::Done);
        assert_eq!(t.status_update_source, Some(StatusUpdateSource::Telemetry));
        assert_eq!(t.status_updated_at, Some(now()));
        assert_eq!(t.telemetry_attributes[0].values.len(), 1);
    }

    #[test]
    fn license_upgrade_adds_task_as_not_started() {
        let product = vec![
            product_task("basic", 1, LicenseLevel::Essential, &[]),
            product_task("pro", 2, LicenseLevel::Advantage, &[]),
        ];
        let mut tasks = Vec::new();
        sync(&filter(LicenseLevel::Essential, &[]), &product, &mut tasks, now());
        assert_eq!(live_originals(&tasks), vec!["basic"]);

        let plan = sync(&filter(LicenseLevel::Advantage, &[]), &product, &mut tasks, later());
        assert_eq!(plan.to_add.len(), 1);
        assert_eq!(live_originals(&tasks), vec!["basic", "pro"]);
        let pro = tasks.iter().find(|t| t.original_task_id == "pro").unwrap();
        assert_eq!(pro.status, TaskStatus::NotStarted);
    }

    #[test]
    fn narrowed_selection_soft_deletes_and_readding_creates_fresh_task() {
        let product = vec![
            product_task("a", 1, LicenseLevel::Essential, &["o1"]),
            product_task("b", 2, LicenseLevel::Essential, &["o2"]),
        ];
        let mut tasks = Vec::new();
        sync(&filter(LicenseLevel::Essential, &[]), &product, &mut tasks, now());
        let old_b = tasks.iter().find(|t| t.original_task_id == "b").unwrap().id.clone();

        let narrowed = sync(&filter(LicenseLevel::Essential, &["o1"]), &product, &mut tasks, now());
        assert_eq!(narrowed.to_remove.len(), 1);
        assert_eq!(live_originals(&tasks), vec!["a"]);
        assert_eq!(tasks.len(), 2, "soft delete keeps the row");

        sync(&filter(LicenseLevel::Essential, &[]), &product, &mut tasks, later());
        let live_b = tasks
            .iter()
            .find(|t| t.original_task_id == "b" && t.is_live())
            .unwrap();
        assert_ne!(live_b.id, old_b);
        assert_eq!(tasks.len(), 3);
    }

    #[test]
    fn deleted_product_task_is_removed() {
        let mut product = vec![product_task("a", 1, LicenseLevel::Essential, &[])];
        let f = filter(LicenseLevel::Essential, &[]);
        let mut tasks = Vec::new();
        sync(&f, &product, &mut tasks, now());

        product[0].deleted_at = Some(later());
        let plan = sync(&f, &product, &mut tasks, later());
        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(tasks[0].removed_at, Some(later()));
    }

    #[test]
    fn duplicate_live_copies_collapse_to_oldest() {
        let product = vec![product_task("a", 1, LicenseLevel::Essential, &[])];
        let first = CustomerTask::from_template("plan", &product[0], now());
        let dup = CustomerTask::from_template("plan", &product[0], later());
        let mut tasks = vec![dup.clone(), first.clone()];

        let plan = sync(&filter(LicenseLevel::Essential, &[]), &product, &mut tasks, later());
        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(plan.to_remove[0].id, dup.id);
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn attributes_reconcile_by_original_id() {
        let mut product = vec![product_task("a", 1, LicenseLevel::Essential, &[])];
        let f = filter(LicenseLevel::Essential, &[]);
        let mut tasks = Vec::new();
        sync(&f, &product, &mut tasks, now());
        let kept_id = tasks[0].telemetry_attributes[0].id.clone();

        product[0].telemetry_attributes[0].success_criteria = Some(SuccessCriteria::BooleanFlag {
            expected_value: false,
        });
        product[0].telemetry_attributes.push(TelemetryAttribute {
            id: "new-attr".into(),
            name: "seats".into(),
            data_type: DataType::Number,
            success_criteria: None,
            is_required: false,
            is_active: true,
            order: 1,
        });
        sync(&f, &product, &mut tasks, later());

        let attrs = &tasks[0].telemetry_attributes;
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].id, kept_id);
        assert_eq!(
            attrs[0].success_criteria,
            Some(SuccessCriteria::BooleanFlag {
                expected_value: false
            })
        );
        assert_eq!(attrs[1].original_attribute_id, "new-attr");
    }

    #[test]
    fn progress_excludes_removed_and_not_applicable() {
        let product = vec![
            product_task("a", 1, LicenseLevel::Essential, &[]),
            product_task("b", 2, LicenseLevel::Essential, &[]),
            product_task("c", 3, LicenseLevel::Essential, &[]),
            product_task("d", 4, LicenseLevel::Essential, &[]),
        ];
        let mut tasks: Vec<CustomerTask> = product
            .iter()
            .map(|t| CustomerTask::from_template("plan", t, now()))
            .collect();
        tasks[0].status = TaskStatus::Done;
        tasks[1].status = TaskStatus::NotApplicable;
        tasks[3].removed_at = Some(now());

        let progress = compute_progress(&tasks);
        assert_eq!(progress.total_tasks, 2);
        assert_eq!(progress.completed_tasks, 1);
        assert!((progress.progress_percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_rounds_to_two_decimals() {
        assert!((percentage(1, 3) - 33.33).abs() < 1e-9);
        assert!((percentage(2, 3) - 66.67).abs() < 1e-9);
        assert!(percentage(0, 0).abs() < f64::EPSILON);
    }
}
