//! Task status, telemetry values, batch import and criteria migration.

use super::RedbStore;
use super::redb_store::{
    append_audit, load_plan_tasks, refresh_plan_progress, write_customer_task,
};
use super::tables::{self, ATTRIBUTE_TASKS, CUSTOMER_TASKS, PLANS, TASKS};
use crate::error::DapError;
use crate::evaluator::EvalContext;
use crate::import::apply_import;
use crate::model::{
    AuditEntry, CustomerTask, StatusUpdateSource, Task, TaskStatus, TelemetryValue, Timestamp,
    ValueSource, new_id,
};
use crate::response::{ImportSummary, MigrationReport, TaskEvaluation};
use crate::status::assess_task_status;
use chrono::Utc;
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, warn};

/// Actor recorded for manual changes without a named user.
const MANUAL_ACTOR: &str = "manual";

impl RedbStore {
    // =========================================================================
    // MANUAL STATUS
    // =========================================================================

    /// Set a task's status by hand. Plan aggregates are recomputed.
    pub fn set_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor: Option<&str>,
        notes: Option<&str>,
    ) -> Result<CustomerTask, DapError> {
        self.set_task_status_at(task_id, status, actor, notes, Utc::now())
    }

    pub fn set_task_status_at(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor: Option<&str>,
        notes: Option<&str>,
        now: Timestamp,
    ) -> Result<CustomerTask, DapError> {
        let txn = self.db().begin_write()?;
        let mut task = load_live_task(&txn, task_id)?;
        let previous = task.status;
        task.status = status;
        task.status_update_source = Some(StatusUpdateSource::Manual);
        task.status_updated_at = Some(now);
        task.status_updated_by = Some(actor.unwrap_or(MANUAL_ACTOR).to_string());
        task.status_notes = notes.map(str::to_string);
        write_customer_task(&txn, &task)?;
        refresh_plan_progress(&txn, &task.adoption_plan_id)?;
        append_audit(
            &txn,
            &AuditEntry::new(
                "UPDATE_CUSTOMER_TASK_STATUS",
                "CustomerTask",
                task_id,
                &json!({
                    "from": previous,
                    "to": status,
                    "source": StatusUpdateSource::Manual,
                    "notes": notes,
                }),
                actor,
                now,
            ),
        )?;
        txn.commit()?;
        Ok(task)
    }

    // =========================================================================
    // TELEMETRY VALUES
    // =========================================================================

    /// Record a manually entered value for a customer attribute.
    pub fn add_telemetry_value(
        &self,
        attribute_id: &str,
        value: &str,
        batch_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<TelemetryValue, DapError> {
        self.add_telemetry_value_at(attribute_id, value, batch_id, notes, Utc::now())
    }

    pub fn add_telemetry_value_at(
        &self,
        attribute_id: &str,
        value: &str,
        batch_id: Option<&str>,
        notes: Option<&str>,
        now: Timestamp,
    ) -> Result<TelemetryValue, DapError> {
        let txn = self.db().begin_write()?;
        let task_id = {
            let index = txn.open_table(ATTRIBUTE_TASKS)?;
            let task_id = index.get(attribute_id)?.map(|g| g.value().to_string());
            task_id.ok_or_else(|| DapError::not_found("telemetry attribute", attribute_id))?
        };
        let mut task = load_live_task(&txn, &task_id)?;
        let entry = TelemetryValue {
            id: new_id(),
            value: value.to_string(),
            batch_id: batch_id.map(str::to_string),
            source: ValueSource::Manual,
            notes: notes.map(str::to_string),
            created_at: now,
        };
        let attr = task
            .telemetry_attributes
            .iter_mut()
            .find(|a| a.id == attribute_id)
            .ok_or_else(|| DapError::not_found("telemetry attribute", attribute_id))?;
        attr.values.push(entry.clone());
        write_customer_task(&txn, &task)?;
        append_audit(
            &txn,
            &AuditEntry::new(
                "ADD_CUSTOMER_TELEMETRY_VALUE",
                "CustomerTelemetryValue",
                &entry.id,
                &json!({"attribute_id": attribute_id, "value": value, "batch_id": batch_id}),
                None,
                now,
            ),
        )?;
        txn.commit()?;
        Ok(entry)
    }

    // =========================================================================
    // EVALUATION
    // =========================================================================

    /// Re-evaluate one task's telemetry and update its status when allowed.
    pub fn evaluate_task_telemetry(&self, task_id: &str) -> Result<TaskEvaluation, DapError> {
        self.evaluate_task_telemetry_at(task_id, &EvalContext::now(), None)
    }

    pub fn evaluate_task_telemetry_at(
        &self,
        task_id: &str,
        ctx: &EvalContext,
        batch_id: Option<&str>,
    ) -> Result<TaskEvaluation, DapError> {
        let txn = self.db().begin_write()?;
        let mut task = load_live_task(&txn, task_id)?;
        let previous = task.status;
        let assessment = assess_task_status(&task, ctx, batch_id);
        let changed = assessment.apply(&mut task, ctx.now);
        write_customer_task(&txn, &task)?;
        if changed {
            refresh_plan_progress(&txn, &task.adoption_plan_id)?;
            append_audit(
                &txn,
                &AuditEntry::new(
                    "UPDATE_CUSTOMER_TASK_STATUS",
                    "CustomerTask",
                    task_id,
                    &json!({
                        "from": previous,
                        "to": task.status,
                        "source": StatusUpdateSource::Telemetry,
                    }),
                    None,
                    ctx.now,
                ),
            )?;
        }
        txn.commit()?;
        Ok(TaskEvaluation::new(&task, previous, &assessment, changed))
    }

    // =========================================================================
    // BATCH IMPORT
    // =========================================================================

    /// Import telemetry rows into a plan under a fresh batch id.
    pub fn import_telemetry(
        &self,
        plan_id: &str,
        rows: &[Value],
    ) -> Result<ImportSummary, DapError> {
        self.import_telemetry_at(plan_id, rows, &new_id(), &EvalContext::now())
    }

    /// Import telemetry rows. Row failures are reported in the summary; the
    /// recorded values and status changes commit together.
    pub fn import_telemetry_at(
        &self,
        plan_id: &str,
        rows: &[Value],
        batch_id: &str,
        ctx: &EvalContext,
    ) -> Result<ImportSummary, DapError> {
        let txn = self.db().begin_write()?;
        {
            let plans = txn.open_table(PLANS)?;
            if plans.get(plan_id)?.is_none() {
                return Err(DapError::not_found("adoption plan", plan_id));
            }
        }
        let before = load_plan_tasks(&txn, plan_id)?;
        let mut tasks = before.clone();
        let mut summary = apply_import(&mut tasks, rows, batch_id, ctx);

        for (old, new) in before.iter().zip(&tasks) {
            if old != new {
                write_customer_task(&txn, new)?;
            }
            if old.status != new.status {
                append_audit(
                    &txn,
                    &AuditEntry::new(
                        "UPDATE_CUSTOMER_TASK_STATUS",
                        "CustomerTask",
                        &new.id,
                        &json!({
                            "from": old.status,
                            "to": new.status,
                            "source": StatusUpdateSource::Telemetry,
                            "batch_id": batch_id,
                        }),
                        None,
                        ctx.now,
                    ),
                )?;
            }
        }
        summary.plan = Some(refresh_plan_progress(&txn, plan_id)?);
        append_audit(
            &txn,
            &AuditEntry::new(
                "IMPORT_TELEMETRY",
                "AdoptionPlan",
                plan_id,
                &json!({
                    "batch_id": batch_id,
                    "rows_total": summary.rows_total,
                    "rows_failed": summary.rows_failed,
                    "values_recorded": summary.values_recorded,
                    "tasks_status_changed": summary.tasks_status_changed,
                }),
                None,
                ctx.now,
            ),
        )?;
        txn.commit()?;
        info!(
            plan = %plan_id,
            batch = %batch_id,
            rows = summary.rows_total,
            failed = summary.rows_failed,
            changed = summary.tasks_status_changed,
            "telemetry imported"
        );
        Ok(summary)
    }

    // =========================================================================
    // MIGRATION
    // =========================================================================

    /// Rewrite stored criteria in the canonical shape.
    ///
    /// Rows are decoded through the legacy adapter and re-encoded; only rows
    /// whose bytes change are written. Undecodable rows are reported and left
    /// alone.
    pub fn migrate_legacy_criteria(&self) -> Result<MigrationReport, DapError> {
        let txn = self.db().begin_write()?;
        let mut report = MigrationReport::default();

        let (scanned, rewritten) =
            reencode_table::<Task>(&txn, TASKS, "tasks", &mut report.failures)?;
        report.tasks_scanned = scanned;
        report.tasks_rewritten = rewritten;

        let (scanned, rewritten) = reencode_table::<CustomerTask>(
            &txn,
            CUSTOMER_TASKS,
            "customer_tasks",
            &mut report.failures,
        )?;
        report.customer_tasks_scanned = scanned;
        report.customer_tasks_rewritten = rewritten;

        append_audit(
            &txn,
            &AuditEntry::new(
                "MIGRATE_CRITERIA",
                "Catalog",
                "criteria",
                &serde_json::to_value(&report)?,
                None,
                Utc::now(),
            ),
        )?;
        txn.commit()?;
        info!(
            rewritten = report.rewritten(),
            failures = report.failures.len(),
            "criteria migration finished"
        );
        Ok(report)
    }
}

fn load_live_task(txn: &WriteTransaction, task_id: &str) -> Result<CustomerTask, DapError> {
    let table = txn.open_table(CUSTOMER_TASKS)?;
    let task: CustomerTask = tables::require(&table, "customer task", task_id)?;
    if !task.is_live() {
        return Err(DapError::Invalid(format!(
            "customer task {task_id} was removed from its plan"
        )));
    }
    Ok(task)
}

fn reencode_table<T>(
    txn: &WriteTransaction,
    definition: TableDefinition<'static, &'static str, &'static [u8]>,
    name: &str,
    failures: &mut Vec<String>,
) -> Result<(usize, usize), DapError>
where
    T: Serialize + DeserializeOwned,
{
    let mut table = txn.open_table(definition)?;
    let mut scanned = 0;
    let mut pending: Vec<(String, Vec<u8>)> = Vec::new();
    for row in table.iter()? {
        let (key, value) = row?;
        scanned += 1;
        let key = key.value().to_string();
        match tables::decode::<T>(value.value()) {
            Ok(record) => {
                let bytes = tables::encode(&record)?;
                if bytes.as_slice() != value.value() {
                    pending.push((key, bytes));
                }
            }
            Err(e) => {
                warn!(table = name, %key, error = %e, "row left unmigrated");
                failures.push(format!("{name}/{key}: {e}"));
            }
        }
    }
    let rewritten = pending.len();
    for (key, bytes) in pending {
        table.insert(key.as_str(), bytes.as_slice())?;
    }
    Ok((scanned, rewritten))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_arithmetic)]
mod tests {
    use super::super::redb_store::tests::seeded_store;
    use super::*;
    use crate::criteria::{NumberOperator, SuccessCriteria};
    use crate::model::{DataType, LicenseLevel};
    use serde::Serialize;

    fn plan_with_tasks(store: &RedbStore) -> (String, Vec<CustomerTask>) {
        let plan_id = store.create_adoption_plan("cp", None).unwrap().plan.id;
        let tasks = store.plan_tasks(&plan_id, false).unwrap();
        (plan_id, tasks)
    }

    #[test]
    fn manual_status_updates_aggregates_and_locks_out_telemetry() {
        let store = seeded_store();
        let (plan_id, tasks) = plan_with_tasks(&store);
        let task = &tasks[0];

        let updated = store
            .set_task_status(&task.id, TaskStatus::Done, Some("csm"), Some("confirmed on call"))
            .unwrap();
        assert_eq!(updated.status_update_source, Some(StatusUpdateSource::Manual));
        let plan = store.adoption_plan(&plan_id).unwrap();
        assert_eq!((plan.completed_tasks, plan.total_tasks), (1, 2));
        assert!((plan.progress_percentage - 50.0).abs() < 1e-9);

        store
            .add_telemetry_value(&task.telemetry_attributes[0].id, "0", None, None)
            .unwrap();
        let eval = store.evaluate_task_telemetry(&task.id).unwrap();
        assert!(!eval.status_changed);
        assert_eq!(eval.status, TaskStatus::Done);
    }

    #[test]
    fn not_applicable_leaves_the_denominator() {
        let store = seeded_store();
        let (plan_id, tasks) = plan_with_tasks(&store);
        store
            .set_task_status(&tasks[1].id, TaskStatus::NotApplicable, None, None)
            .unwrap();
        assert_eq!(store.adoption_plan(&plan_id).unwrap().total_tasks, 1);
    }

    #[test]
    fn unknown_attribute_is_not_found() {
        let store = seeded_store();
        assert!(matches!(
            store.add_telemetry_value("nope", "1", None, None),
            Err(DapError::NotFound { .. })
        ));
    }

    #[test]
    fn import_records_values_and_regresses_missing_tasks() {
        let store = seeded_store();
        let (plan_id, tasks) = plan_with_tasks(&store);
        let ctx = EvalContext::now();

        let first = vec![
            json!({"task_name": tasks[0].name, "attribute_name": "logins", "value": 25}),
            json!({"task_name": tasks[1].name, "attribute_name": "logins", "value": "30"}),
            json!({"task_name": "No such task", "attribute_name": "logins", "value": "1"}),
        ];
        let summary = store.import_telemetry_at(&plan_id, &first, "b1", &ctx).unwrap();
        assert_eq!(summary.values_recorded, 2);
        assert_eq!(summary.rows_failed, 1);
        assert_eq!(summary.tasks_status_changed, 2);
        assert_eq!(summary.plan.as_ref().unwrap().completed_tasks, 2);

        let second = vec![json!({
            "task_name": tasks[0].name,
            "attribute_name": "logins",
            "value": 40
        })];
        let summary = store.import_telemetry_at(&plan_id, &second, "b2", &ctx).unwrap();
        assert_eq!(summary.tasks_status_changed, 1);
        let b = store.customer_task(&tasks[1].id).unwrap();
        assert_eq!(b.status, TaskStatus::NoLongerUsing);
        assert_eq!(summary.plan.unwrap().completed_tasks, 1);

        let imports = store
            .audit_log(Some(&plan_id))
            .unwrap()
            .into_iter()
            .filter(|e| e.action == "IMPORT_TELEMETRY")
            .count();
        assert_eq!(imports, 2);
    }

    #[test]
    fn import_into_unknown_plan_fails() {
        let store = seeded_store();
        assert!(matches!(
            store.import_telemetry("missing", &[]),
            Err(DapError::NotFound { .. })
        ));
    }

    #[test]
    fn removed_task_cannot_be_updated() {
        let store = seeded_store();
        let (plan_id, tasks) = plan_with_tasks(&store);
        store.delete_task(&tasks[1].original_task_id, Utc::now()).unwrap();
        store.sync_adoption_plan(&plan_id).unwrap();
        assert!(matches!(
            store.set_task_status(&tasks[1].id, TaskStatus::Done, None, None),
            Err(DapError::Invalid(_))
        ));
    }

    // Row shapes written before criteria were stored canonically.
    #[derive(Serialize)]
    struct LegacyAttribute {
        id: String,
        name: String,
        data_type: DataType,
        success_criteria: Option<String>,
        is_required: bool,
        is_active: bool,
        order: u32,
    }

    #[derive(Serialize)]
    struct LegacyTask {
        id: String,
        product_id: String,
        name: String,
        description: Option<String>,
        sequence_number: u32,
        license_level: LicenseLevel,
        outcome_ids: Vec<String>,
        release_ids: Vec<String>,
        telemetry_attributes: Vec<LegacyAttribute>,
        deleted_at: Option<Timestamp>,
    }

    #[test]
    fn migration_rewrites_legacy_rows_once() {
        let store = seeded_store();
        let legacy = LegacyTask {
            id: "legacy".into(),
            product_id: "prod".into(),
            name: "Legacy task".into(),
            description: None,
            sequence_number: 9,
            license_level: LicenseLevel::Essential,
            outcome_ids: vec![],
            release_ids: vec![],
            telemetry_attributes: vec![LegacyAttribute {
                id: "legacy-attr".into(),
                name: "seats".into(),
                data_type: DataType::Number,
                success_criteria: Some(r#"{"operator":">=","value":10}"#.into()),
                is_required: true,
                is_active: true,
                order: 0,
            }],
            deleted_at: None,
        };
        {
            let txn = store.db().begin_write().unwrap();
            {
                let mut table = txn.open_table(TASKS).unwrap();
                table
                    .insert("legacy", postcard::to_allocvec(&legacy).unwrap().as_slice())
                    .unwrap();
                table.insert("broken", [0xff_u8].as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let task = store.task("legacy").unwrap();
        assert_eq!(
            task.telemetry_attributes[0].success_criteria,
            Some(SuccessCriteria::NumberThreshold {
                operator: NumberOperator::GreaterThanOrEqual,
                threshold: 10.0,
            })
        );

        let report = store.migrate_legacy_criteria().unwrap();
        assert_eq!(report.tasks_scanned, 5);
        assert_eq!(report.tasks_rewritten, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("tasks/broken"));

        let again = store.migrate_legacy_criteria().unwrap();
        assert_eq!(again.rewritten(), 0);
        assert_eq!(store.task("legacy").unwrap(), task);
    }
}
