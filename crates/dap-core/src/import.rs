//! # Telemetry Import
//!
//! Applies a batch of already-parsed telemetry rows to a plan's tasks.
//!
//! Rows are independent: a row naming an unknown task or attribute, or
//! carrying no value, is reported and skipped. After all rows are recorded,
//! every live task of the plan is re-assessed against the batch, so a task
//! with no data in this batch can regress.

use crate::evaluator::EvalContext;
use crate::model::{CustomerTask, TelemetryValue, ValueSource, new_id};
use crate::response::ImportSummary;
use crate::status::assess_task_status;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One telemetry observation addressed by task and attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    pub task_name: String,
    pub attribute_name: String,
    pub value: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ImportRow {
    pub fn new(task_name: &str, attribute_name: &str, value: &str) -> Self {
        Self {
            task_name: task_name.to_string(),
            attribute_name: attribute_name.to_string(),
            value: value.to_string(),
            notes: None,
        }
    }

    /// Read a row from loosely shaped JSON.
    ///
    /// Accepts `task_name`/`taskName`/`task`, `attribute_name`/`attributeName`/
    /// `attribute`, and a `value` that is a string, number or boolean.
    pub fn from_json(row: &Value) -> Result<Self, String> {
        let obj = row.as_object().ok_or("row is not an object")?;
        let text = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|k| match obj.get(*k)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
        };
        Ok(Self {
            task_name: text(&["task_name", "taskName", "task"]).ok_or("missing task name")?,
            attribute_name: text(&["attribute_name", "attributeName", "attribute"])
                .ok_or("missing attribute name")?,
            value: text(&["value"]).ok_or("missing value")?,
            notes: text(&["notes"]),
        })
    }
}

/// Record `rows` into `tasks` under `batch_id`, then re-assess every live task.
///
/// `tasks` is the plan's full task list; removed tasks are never matched.
pub fn apply_import(
    tasks: &mut [CustomerTask],
    rows: &[Value],
    batch_id: &str,
    ctx: &EvalContext,
) -> ImportSummary {
    let mut summary = ImportSummary::new(batch_id);
    summary.rows_total = rows.len();

    for (index, raw) in rows.iter().enumerate() {
        match ImportRow::from_json(raw).and_then(|row| record(tasks, &row, batch_id, ctx)) {
            Ok(()) => summary.values_recorded += 1,
            Err(message) => {
                warn!(row = index, batch = batch_id, %message, "telemetry row skipped");
                summary.fail_row(index, message);
            }
        }
    }

    for task in tasks.iter_mut().filter(|t| t.is_live()) {
        let assessment = assess_task_status(task, ctx, Some(batch_id));
        summary.criteria_met += assessment.met;
        if assessment.apply(task, ctx.now) {
            summary.tasks_status_changed += 1;
        }
    }
    summary
}

fn record(
    tasks: &mut [CustomerTask],
    row: &ImportRow,
    batch_id: &str,
    ctx: &EvalContext,
) -> Result<(), String> {
    if row.value.trim().is_empty() {
        return Err(format!(
            "empty value for {} / {}",
            row.task_name, row.attribute_name
        ));
    }
    let mut matches = tasks
        .iter_mut()
        .filter(|t| t.is_live() && same_name(&t.name, &row.task_name));
    let task = matches
        .next()
        .ok_or_else(|| format!("unknown task \"{}\"", row.task_name))?;
    if matches.next().is_some() {
        return Err(format!("ambiguous task name \"{}\"", row.task_name));
    }
    let attr = task
        .telemetry_attributes
        .iter_mut()
        .find(|a| same_name(&a.name, &row.attribute_name))
        .ok_or_else(|| {
            format!(
                "unknown attribute \"{}\" on task \"{}\"",
                row.attribute_name, row.task_name
            )
        })?;
    attr.values.push(TelemetryValue {
        id: new_id(),
        value: row.value.trim().to_string(),
        batch_id: Some(batch_id.to_string()),
        source: ValueSource::Import,
        notes: row.notes.clone(),
        created_at: ctx.now,
    });
    Ok(())
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::criteria::SuccessCriteria;
    use crate::evaluator::parse_timestamp;
    use crate::model::{DataType, StatusUpdateSource, Task, TaskStatus, TelemetryAttribute};
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::at(parse_timestamp("2025-04-01T00:00:00Z").unwrap())
    }

    fn plan_tasks() -> Vec<CustomerTask> {
        ["Enable SSO", "Configure MFA"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let template = Task {
                    id: format!("t{i}"),
                    product_id: "p".into(),
                    name: (*name).into(),
                    description: None,
                    sequence_number: i as u32,
                    license_level: Default::default(),
                    outcome_ids: vec![],
                    release_ids: vec![],
                    telemetry_attributes: vec![TelemetryAttribute {
                        id: format!("t{i}-enabled"),
                        name: "Enabled".into(),
                        data_type: DataType::Boolean,
                        success_criteria: Some(SuccessCriteria::BooleanFlag {
                            expected_value: true,
                        }),
                        is_required: true,
                        is_active: true,
                        order: 0,
                    }],
                    deleted_at: None,
                };
                CustomerTask::from_template("plan", &template, ctx().now)
            })
            .collect()
    }

    /// A row that turns the `Enabled` attribute of `task` on.
    fn sso_row(task: &str) -> Value {
        json!({"task_name": task, "attribute_name": "Enabled", "value": "true"})
    }

    #[test]
    fn loose_json_rows_parse() {
        let row =
            ImportRow::from_json(&json!({"taskName": "A", "attribute": "B", "value": 42})).unwrap();
        assert_eq!(row, ImportRow::new("A", "B", "42"));
        assert!(ImportRow::from_json(&json!({"task": "A"})).is_err());
        assert!(ImportRow::from_json(&json!("nope")).is_err());
    }

    #[test]
    fn malformed_rows_do_not_abort_the_batch() {
        let mut tasks = plan_tasks();
        let rows = vec![
            json!({"task_name": "enable sso", "attribute_name": "enabled", "value": "yes"}),
            json!({"task_name": "Unknown", "attribute_name": "Enabled", "value": "true"}),
            json!({"task_name": "Configure MFA", "attribute_name": "Missing", "value": "true"}),
            json!({"task_name": "Configure MFA"}),
            json!({"task_name": "Configure MFA", "attribute_name": "Enabled", "value": "  "}),
        ];
        let summary = apply_import(&mut tasks, &rows, "b1", &ctx());

        assert_eq!(summary.rows_total, 5);
        assert_eq!(summary.values_recorded, 1);
        assert_eq!(summary.rows_failed, 4);
        let failed_rows: Vec<usize> = summary.errors.iter().map(|e| e.row).collect();
        assert_eq!(failed_rows, vec![1, 2, 3, 4]);

        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[0].status_update_source, Some(StatusUpdateSource::Telemetry));
        assert_eq!(tasks[1].status, TaskStatus::NotStarted);
        assert_eq!(summary.tasks_status_changed, 1);
        assert_eq!(summary.criteria_met, 1);
    }

    #[test]
    fn next_batch_without_data_regresses_telemetry_done() {
        let mut tasks = plan_tasks();
        let first = vec![sso_row("Enable SSO")];
        apply_import(&mut tasks, &first, "b1", &ctx());
        assert_eq!(tasks[0].status, TaskStatus::Done);

        let second = vec![sso_row("Configure MFA")];
        let summary = apply_import(&mut tasks, &second, "b2", &ctx());
        assert_eq!(tasks[0].status, TaskStatus::NoLongerUsing);
        assert_eq!(tasks[1].status, TaskStatus::Done);
        assert_eq!(summary.tasks_status_changed, 2);
    }

    #[test]
    fn removed_tasks_are_not_matched() {
        let mut tasks = plan_tasks();
        tasks[0].removed_at = Some(ctx().now);
        let rows = vec![sso_row("Enable SSO")];
        let summary = apply_import(&mut tasks, &rows, "b1", &ctx());
        assert_eq!(summary.rows_failed, 1);
        assert!(tasks[0].telemetry_attributes[0].values.is_empty());
    }
}
