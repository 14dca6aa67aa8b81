//! # CLI Commands
//!
//! One function per `dap` subcommand. Each opens the database named by
//! `--db`, runs one store operation and prints the result as text or, with
//! `--json`, as pretty JSON.

use dap_core::evaluator::{EvalContext, EvaluationResult, evaluate_with};
use dap_core::formats::decode_criteria_json;
use dap_core::{
    AdoptionPlan, Catalog, CustomerProduct, CustomerTask, DapError, DataType, ImportSummary,
    RedbStore, SyncOutcome,
};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

// =============================================================================
// HELPERS
// =============================================================================

/// Open an existing database. A missing file is a usage error, not an empty store.
pub fn open_store(db: &Path) -> Result<RedbStore, DapError> {
    if !db.exists() {
        return Err(DapError::Invalid(format!(
            "database {} does not exist (run `dap init` first)",
            db.display()
        )));
    }
    RedbStore::open(db)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DapError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_sync(outcome: &SyncOutcome) {
    println!(
        "Plan {}: +{} added, -{} removed, ~{} updated",
        outcome.plan.id, outcome.tasks_added, outcome.tasks_removed, outcome.tasks_updated
    );
    print_plan_line(&outcome.plan);
}

fn print_plan_line(plan: &AdoptionPlan) {
    println!(
        "  {} [{}] {}/{} tasks complete ({}%)",
        plan.product_name,
        plan.license_level,
        plan.completed_tasks,
        plan.total_tasks,
        plan.progress_percentage
    );
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Create an empty database. Refuses to overwrite unless `force`.
pub fn cmd_init(db: &Path, force: bool) -> Result<(), DapError> {
    if db.exists() {
        if !force {
            return Err(DapError::Invalid(format!(
                "database {} already exists (use --force to overwrite)",
                db.display()
            )));
        }
        std::fs::remove_file(db)?;
    }
    RedbStore::open(db)?;
    info!(path = %db.display(), "database initialized");
    println!("Initialized {}", db.display());
    Ok(())
}

/// Load a catalog JSON file (`{"products": [...], "tasks": [...]}`).
pub fn cmd_seed(db: &Path, catalog_path: &Path, json: bool) -> Result<(), DapError> {
    let text = std::fs::read_to_string(catalog_path)?;
    let catalog: Catalog = serde_json::from_str(&text)?;
    let store = open_store(db)?;
    let (products, tasks) = store.seed(&catalog)?;

    if json {
        print_json(&serde_json::json!({ "products": products, "tasks": tasks }))
    } else {
        println!("Seeded {products} product(s), {tasks} task(s)");
        Ok(())
    }
}

/// Assign a product to a customer.
pub fn cmd_assign(
    db: &Path,
    customer_product: &CustomerProduct,
    json: bool,
) -> Result<(), DapError> {
    let store = open_store(db)?;
    store.put_customer_product(customer_product)?;

    if json {
        print_json(customer_product)
    } else {
        println!(
            "Assigned {} to customer {} as {} [{}]",
            customer_product.product_id,
            customer_product.customer_id,
            customer_product.id,
            customer_product.license_level
        );
        Ok(())
    }
}

/// Create the adoption plan of a customer product.
pub fn cmd_plan_create(db: &Path, customer_product_id: &str, json: bool) -> Result<(), DapError> {
    let store = open_store(db)?;
    let outcome = store.create_adoption_plan(customer_product_id, None)?;
    if json {
        print_json(&outcome)
    } else {
        print_sync(&outcome);
        Ok(())
    }
}

/// Reconcile a plan against the current product definition.
pub fn cmd_plan_sync(db: &Path, plan_id: &str, json: bool) -> Result<(), DapError> {
    let store = open_store(db)?;
    let outcome = store.sync_adoption_plan(plan_id)?;
    if json {
        print_json(&outcome)
    } else {
        print_sync(&outcome);
        Ok(())
    }
}

/// Show a plan and its tasks.
pub fn cmd_plan_show(
    db: &Path,
    plan_id: &str,
    include_removed: bool,
    json: bool,
) -> Result<(), DapError> {
    let store = open_store(db)?;
    let plan = store.adoption_plan(plan_id)?;
    let tasks = store.plan_tasks(plan_id, include_removed)?;

    if json {
        return print_json(&serde_json::json!({ "plan": plan, "tasks": tasks }));
    }
    println!("Plan {}", plan.id);
    print_plan_line(&plan);
    for task in &tasks {
        print_task_line(task);
    }
    Ok(())
}

fn print_task_line(task: &CustomerTask) {
    let removed = if task.is_live() { "" } else { " (removed)" };
    println!(
        "  #{:<3} {:<16} {}{}",
        task.sequence_number, task.status, task.name, removed
    );
}

/// Evaluate one value against criteria JSON (canonical or legacy shape).
///
/// A failed evaluation is a result, not an error: the command still succeeds.
pub fn cmd_evaluate(
    value: Option<&str>,
    data_type: DataType,
    criteria_json: &str,
    json: bool,
) -> Result<EvaluationResult, DapError> {
    let result = match decode_criteria_json(criteria_json)? {
        Some(criteria) => evaluate_with(&EvalContext::now(), value, data_type, &criteria),
        None => EvaluationResult::pass("no success criteria defined"),
    };

    if json {
        print_json(&result)?;
    } else {
        let verdict = if result.success { "PASS" } else { "FAIL" };
        let reason = result
            .error
            .as_deref()
            .or(result.details.as_deref())
            .unwrap_or_default();
        println!("{verdict}: {reason}");
    }
    Ok(result)
}

/// Import a telemetry rows file into a plan.
///
/// The file holds either a JSON array of rows or `{"rows": [...]}`.
pub fn cmd_import(
    db: &Path,
    plan_id: &str,
    rows_path: &Path,
    json: bool,
) -> Result<ImportSummary, DapError> {
    let text = std::fs::read_to_string(rows_path)?;
    let rows = match serde_json::from_str::<Value>(&text)? {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("rows") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(DapError::Invalid("expected a `rows` array".to_string())),
        },
        _ => return Err(DapError::Invalid("expected a JSON array of rows".to_string())),
    };

    let store = open_store(db)?;
    let summary = store.import_telemetry(plan_id, &rows)?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "Batch {}: {}/{} rows recorded, {} failed, {} task status change(s)",
            summary.batch_id,
            summary.values_recorded,
            summary.rows_total,
            summary.rows_failed,
            summary.tasks_status_changed
        );
        for err in &summary.errors {
            println!("  row {}: {}", err.row, err.message);
        }
        if let Some(plan) = &summary.plan {
            print_plan_line(plan);
        }
    }
    Ok(summary)
}

/// Rewrite stored legacy criteria JSON to the canonical shape.
pub fn cmd_migrate_criteria(db: &Path, json: bool) -> Result<(), DapError> {
    let store = open_store(db)?;
    let report = store.migrate_legacy_criteria()?;

    if json {
        return print_json(&report);
    }
    println!(
        "Rewrote {} task(s) of {} and {} customer task(s) of {}",
        report.tasks_rewritten,
        report.tasks_scanned,
        report.customer_tasks_rewritten,
        report.customer_tasks_scanned
    );
    for failure in &report.failures {
        println!("  skipped {failure}");
    }
    Ok(())
}
