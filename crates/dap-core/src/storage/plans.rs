//! Adoption plans: creation, synchronization, reads.

use super::RedbStore;
use super::redb_store::{
    append_audit, load_plan, load_plan_tasks, write_customer_task, write_plan,
};
use super::tables::{
    self, CUSTOMER_PRODUCTS, CUSTOMER_TASKS, PLAN_BY_CUSTOMER_PRODUCT, PLAN_TASKS, PLANS,
    PRODUCT_TASKS, PRODUCTS, TASKS,
};
use crate::eligibility::EligibilityFilter;
use crate::error::DapError;
use crate::model::{
    AdoptionPlan, AuditEntry, CustomerProduct, CustomerTask, Product, Task, Timestamp, new_id,
};
use crate::response::SyncOutcome;
use crate::sync::{compute_progress, plan_sync};
use chrono::Utc;
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde_json::json;
use tracing::{info, warn};

impl RedbStore {
    /// Create the adoption plan of a customer product and populate it.
    ///
    /// A customer product has at most one plan.
    pub fn create_adoption_plan(
        &self,
        customer_product_id: &str,
        actor: Option<&str>,
    ) -> Result<SyncOutcome, DapError> {
        self.create_adoption_plan_at(customer_product_id, Utc::now(), actor)
    }

    pub fn create_adoption_plan_at(
        &self,
        customer_product_id: &str,
        now: Timestamp,
        actor: Option<&str>,
    ) -> Result<SyncOutcome, DapError> {
        let txn = self.db().begin_write()?;
        let cp: CustomerProduct = {
            let table = txn.open_table(CUSTOMER_PRODUCTS)?;
            tables::require(&table, "customer product", customer_product_id)?
        };
        let product: Product = {
            let table = txn.open_table(PRODUCTS)?;
            tables::require(&table, "product", &cp.product_id)?
        };
        let plan_id = new_id();
        {
            let mut by_cp = txn.open_table(PLAN_BY_CUSTOMER_PRODUCT)?;
            if let Some(existing) = by_cp.get(customer_product_id)? {
                return Err(DapError::Invalid(format!(
                    "customer product {customer_product_id} already has adoption plan {}",
                    existing.value()
                )));
            }
            by_cp.insert(customer_product_id, plan_id.as_str())?;
        }
        write_plan(
            &txn,
            &AdoptionPlan {
                id: plan_id.clone(),
                customer_product_id: cp.id.clone(),
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                license_level: cp.license_level,
                selected_outcome_ids: cp.selected_outcome_ids.clone(),
                selected_release_ids: cp.selected_release_ids.clone(),
                total_tasks: 0,
                completed_tasks: 0,
                progress_percentage: 0.0,
                created_at: now,
                last_synced_at: None,
            },
        )?;
        append_audit(
            &txn,
            &AuditEntry::new(
                "CREATE_ADOPTION_PLAN",
                "AdoptionPlan",
                &plan_id,
                &json!({"customer_product_id": customer_product_id}),
                actor,
                now,
            ),
        )?;
        let outcome = sync_in_txn(&txn, &plan_id, now, actor)?;
        txn.commit()?;
        info!(plan = %plan_id, tasks = outcome.tasks_added, "adoption plan created");
        Ok(outcome)
    }

    /// Reconcile a plan against the current product definition.
    ///
    /// Runs in one write transaction: on any error nothing is committed.
    /// Concurrent calls serialize on redb's single writer.
    pub fn sync_adoption_plan(&self, plan_id: &str) -> Result<SyncOutcome, DapError> {
        self.sync_adoption_plan_at(plan_id, Utc::now(), None)
    }

    pub fn sync_adoption_plan_at(
        &self,
        plan_id: &str,
        now: Timestamp,
        actor: Option<&str>,
    ) -> Result<SyncOutcome, DapError> {
        let txn = self.db().begin_write()?;
        let outcome = sync_in_txn(&txn, plan_id, now, actor)?;
        txn.commit()?;
        info!(
            plan = %plan_id,
            added = outcome.tasks_added,
            removed = outcome.tasks_removed,
            updated = outcome.tasks_updated,
            progress = outcome.plan.progress_percentage,
            "adoption plan synced"
        );
        Ok(outcome)
    }

    pub fn adoption_plan(&self, plan_id: &str) -> Result<AdoptionPlan, DapError> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(PLANS)?;
        tables::require(&table, "adoption plan", plan_id)
    }

    pub fn plan_for_customer_product(
        &self,
        customer_product_id: &str,
    ) -> Result<Option<AdoptionPlan>, DapError> {
        let txn = self.db().begin_read()?;
        let by_cp = txn.open_table(PLAN_BY_CUSTOMER_PRODUCT)?;
        let Some(plan_id) = by_cp.get(customer_product_id)?.map(|g| g.value().to_string()) else {
            return Ok(None);
        };
        let plans = txn.open_table(PLANS)?;
        tables::load(&plans, &plan_id)
    }

    /// Tasks of a plan by sequence number. Removed tasks only on request.
    pub fn plan_tasks(
        &self,
        plan_id: &str,
        include_removed: bool,
    ) -> Result<Vec<CustomerTask>, DapError> {
        let txn = self.db().begin_read()?;
        let plans = txn.open_table(PLANS)?;
        if plans.get(plan_id)?.is_none() {
            return Err(DapError::not_found("adoption plan", plan_id));
        }
        let index = txn.open_multimap_table(PLAN_TASKS)?;
        let table = txn.open_table(CUSTOMER_TASKS)?;
        let ids = tables::children(&index, plan_id)?;
        let mut tasks: Vec<CustomerTask> = tables::load_many(&table, &ids)?;
        tasks.retain(|t| include_removed || t.is_live());
        tasks.sort_by(|a, b| {
            a.sequence_number
                .cmp(&b.sequence_number)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    pub fn customer_task(&self, task_id: &str) -> Result<CustomerTask, DapError> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(CUSTOMER_TASKS)?;
        tables::require(&table, "customer task", task_id)
    }
}

/// The sync algorithm against an open write transaction.
fn sync_in_txn(
    txn: &WriteTransaction,
    plan_id: &str,
    now: Timestamp,
    actor: Option<&str>,
) -> Result<SyncOutcome, DapError> {
    let mut plan = load_plan(txn, plan_id)?;
    let cp: CustomerProduct = {
        let table = txn.open_table(CUSTOMER_PRODUCTS)?;
        tables::require(&table, "customer product", &plan.customer_product_id)?
    };
    let product: Product = {
        let table = txn.open_table(PRODUCTS)?;
        tables::require(&table, "product", &cp.product_id)?
    };
    let product_tasks: Vec<Task> = {
        let index = txn.open_multimap_table(PRODUCT_TASKS)?;
        let table = txn.open_table(TASKS)?;
        let ids = tables::children(&index, &product.id)?;
        tables::load_many(&table, &ids)?
    };
    let mut tasks = load_plan_tasks(txn, plan_id)?;

    let filter = EligibilityFilter::from_customer_product(&cp);
    let changes = plan_sync(plan_id, &filter, &product_tasks, &tasks, now);

    for task in changes.changed() {
        write_customer_task(txn, task)?;
    }
    for task in &changes.to_remove {
        warn!(
            plan = %plan_id,
            task = %task.id,
            original = %task.original_task_id,
            "customer task removed from plan"
        );
        append_audit(
            txn,
            &AuditEntry::new(
                "REMOVE_CUSTOMER_TASK",
                "CustomerTask",
                &task.id,
                &json!({
                    "adoption_plan_id": plan_id,
                    "original_task_id": task.original_task_id,
                    "status": task.status,
                }),
                actor,
                now,
            ),
        )?;
    }
    changes.apply(&mut tasks);

    plan.product_id.clone_from(&product.id);
    plan.product_name.clone_from(&product.name);
    plan.license_level = cp.license_level;
    plan.selected_outcome_ids.clone_from(&cp.selected_outcome_ids);
    plan.selected_release_ids.clone_from(&cp.selected_release_ids);
    plan.last_synced_at = Some(now);
    compute_progress(&tasks).apply_to(&mut plan);
    write_plan(txn, &plan)?;

    let outcome = SyncOutcome {
        tasks_added: changes.to_add.len() as u32,
        tasks_removed: changes.to_remove.len() as u32,
        tasks_updated: changes.to_update.len() as u32,
        plan,
    };
    append_audit(
        txn,
        &AuditEntry::new(
            "SYNC_ADOPTION_PLAN",
            "AdoptionPlan",
            plan_id,
            &json!({
                "tasks_added": outcome.tasks_added,
                "tasks_removed": outcome.tasks_removed,
                "tasks_updated": outcome.tasks_updated,
                "total_tasks": outcome.plan.total_tasks,
                "completed_tasks": outcome.plan.completed_tasks,
            }),
            actor,
            now,
        ),
    )?;
    Ok(outcome)
}

// =============================================================================
// TESTS
// =============================================================================
