//! `RedbStore`: the database handle, catalog and customer-product records.
//!
//! Plan and telemetry operations live in sibling modules as further
//! `impl RedbStore` blocks.

use super::tables::{
    self, ATTRIBUTE_TASKS, AUDIT, CUSTOMER_PRODUCTS, CUSTOMER_TASKS, PLAN_BY_CUSTOMER_PRODUCT,
    PLAN_TASKS, PLANS, PRODUCT_TASKS, PRODUCTS, TASKS,
};
use crate::error::DapError;
use crate::model::{
    AdoptionPlan, AuditEntry, Catalog, CustomerProduct, CustomerProductUpdate, CustomerTask,
    Product, Task, Timestamp,
};
use crate::sync::compute_progress;
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// Embedded store for DAP records.
///
/// Cheap to share behind an `Arc`: redb admits many readers and serializes
/// writers internally.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    // =========================================================================
    // OPEN
    // =========================================================================

    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DapError> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        debug!(path = %path.display(), "database opened");
        Self::with_database(db)
    }

    /// A throwaway database held in memory.
    pub fn in_memory() -> Result<Self, DapError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::with_database(db)
    }

    fn with_database(db: Database) -> Result<Self, DapError> {
        let txn = db.begin_write()?;
        tables::create_all(&txn)?;
        txn.commit()?;
        Ok(Self { db })
    }

    pub(super) fn db(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // CATALOG
    // =========================================================================

    /// Insert or replace a product.
    pub fn put_product(&self, product: &Product) -> Result<(), DapError> {
        let txn = self.db.begin_write()?;
        write_product(&txn, product)?;
        txn.commit()?;
        Ok(())
    }

    /// Insert or replace a product task. Criteria are validated against
    /// each attribute's declared type.
    pub fn put_task(&self, task: &Task) -> Result<(), DapError> {
        let txn = self.db.begin_write()?;
        write_task(&txn, task)?;
        txn.commit()?;
        Ok(())
    }

    /// Load a whole catalog in one transaction. Returns `(products, tasks)` written.
    pub fn seed(&self, catalog: &Catalog) -> Result<(usize, usize), DapError> {
        let txn = self.db.begin_write()?;
        for product in &catalog.products {
            write_product(&txn, product)?;
        }
        for task in &catalog.tasks {
            write_task(&txn, task)?;
        }
        append_audit(
            &txn,
            &AuditEntry::new(
                "SEED_CATALOG",
                "Catalog",
                "catalog",
                &json!({"products": catalog.products.len(), "tasks": catalog.tasks.len()}),
                None,
                Utc::now(),
            ),
        )?;
        txn.commit()?;
        info!(
            products = catalog.products.len(),
            tasks = catalog.tasks.len(),
            "catalog seeded"
        );
        Ok((catalog.products.len(), catalog.tasks.len()))
    }

    /// Mark a product task deleted. It drops out of plans on their next sync.
    pub fn delete_task(&self, task_id: &str, now: Timestamp) -> Result<Task, DapError> {
        let txn = self.db.begin_write()?;
        let task = {
            let mut table = txn.open_table(TASKS)?;
            let mut task: Task = tables::require(&table, "task", task_id)?;
            task.deleted_at = Some(now);
            table.insert(task_id, tables::encode(&task)?.as_slice())?;
            task
        };
        append_audit(
            &txn,
            &AuditEntry::new("DELETE_TASK", "Task", task_id, &json!({}), None, now),
        )?;
        txn.commit()?;
        Ok(task)
    }

    pub fn product(&self, product_id: &str) -> Result<Product, DapError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PRODUCTS)?;
        tables::require(&table, "product", product_id)
    }

    /// All tasks of a product, deleted ones included, by sequence number.
    pub fn product_tasks(&self, product_id: &str) -> Result<Vec<Task>, DapError> {
        let txn = self.db.begin_read()?;
        let index = txn.open_multimap_table(PRODUCT_TASKS)?;
        let table = txn.open_table(TASKS)?;
        let ids = tables::children(&index, product_id)?;
        let mut tasks: Vec<Task> = tables::load_many(&table, &ids)?;
        tasks.sort_by_key(|t| t.sequence_number);
        Ok(tasks)
    }

    pub fn task(&self, task_id: &str) -> Result<Task, DapError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TASKS)?;
        tables::require(&table, "task", task_id)
    }

    // =========================================================================
    // CUSTOMER PRODUCTS
    // =========================================================================

    /// Assign a product to a customer. The product must exist.
    ///
    /// Re-assigning an existing id replaces the record, but its product
    /// cannot change once the customer product has an adoption plan.
    pub fn put_customer_product(&self, cp: &CustomerProduct) -> Result<(), DapError> {
        let txn = self.db.begin_write()?;
        {
            let products = txn.open_table(PRODUCTS)?;
            if products.get(cp.product_id.as_str())?.is_none() {
                return Err(DapError::not_found("product", cp.product_id.clone()));
            }
        }
        {
            let mut table = txn.open_table(CUSTOMER_PRODUCTS)?;
            let existing: Option<CustomerProduct> = tables::load(&table, &cp.id)?;
            if let Some(existing) = existing.filter(|e| e.product_id != cp.product_id) {
                let plans = txn.open_table(PLAN_BY_CUSTOMER_PRODUCT)?;
                if plans.get(cp.id.as_str())?.is_some() {
                    return Err(DapError::Invalid(format!(
                        "customer product {} has an adoption plan for product {}",
                        cp.id, existing.product_id
                    )));
                }
            }
            table.insert(cp.id.as_str(), tables::encode(cp)?.as_slice())?;
        }
        let details = json!({
            "customer_id": cp.customer_id,
            "product_id": cp.product_id,
            "license_level": cp.license_level,
        });
        append_audit(
            &txn,
            &AuditEntry::new(
                "ASSIGN_PRODUCT",
                "CustomerProduct",
                &cp.id,
                &details,
                None,
                Utc::now(),
            ),
        )?;
        txn.commit()?;
        Ok(())
    }

    pub fn customer_product(&self, id: &str) -> Result<CustomerProduct, DapError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CUSTOMER_PRODUCTS)?;
        tables::require(&table, "customer product", id)
    }

    /// Change license or selection. Plans pick the change up on their next sync.
    pub fn update_customer_product(
        &self,
        id: &str,
        update: &CustomerProductUpdate,
        actor: Option<&str>,
    ) -> Result<CustomerProduct, DapError> {
        let txn = self.db.begin_write()?;
        let cp = {
            let mut table = txn.open_table(CUSTOMER_PRODUCTS)?;
            let mut cp: CustomerProduct = tables::require(&table, "customer product", id)?;
            update.apply_to(&mut cp);
            table.insert(id, tables::encode(&cp)?.as_slice())?;
            cp
        };
        append_audit(
            &txn,
            &AuditEntry::new(
                "UPDATE_CUSTOMER_PRODUCT",
                "CustomerProduct",
                id,
                &serde_json::to_value(update)?,
                actor,
                Utc::now(),
            ),
        )?;
        txn.commit()?;
        Ok(cp)
    }

    // =========================================================================
    // AUDIT
    // =========================================================================

    /// Audit entries in time order, optionally for one entity.
    pub fn audit_log(&self, entity_id: Option<&str>) -> Result<Vec<AuditEntry>, DapError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(AUDIT)?;
        let mut entries = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let entry: AuditEntry = tables::decode(value.value())?;
            if entity_id.is_none_or(|id| entry.entity_id == id) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

// =============================================================================
// TRANSACTION HELPERS (shared by the impl blocks in sibling modules)
// =============================================================================

fn write_product(txn: &WriteTransaction, product: &Product) -> Result<(), DapError> {
    if product.id.trim().is_empty() {
        return Err(DapError::Invalid("product id must not be empty".into()));
    }
    let mut table = txn.open_table(PRODUCTS)?;
    table.insert(product.id.as_str(), tables::encode(product)?.as_slice())?;
    Ok(())
}

fn write_task(txn: &WriteTransaction, task: &Task) -> Result<(), DapError> {
    if task.id.trim().is_empty() {
        return Err(DapError::Invalid("task id must not be empty".into()));
    }
    for attr in &task.telemetry_attributes {
        if let Some(criteria) = &attr.success_criteria {
            criteria.validate(attr.data_type)?;
        }
    }
    {
        let products = txn.open_table(PRODUCTS)?;
        if products.get(task.product_id.as_str())?.is_none() {
            return Err(DapError::not_found("product", task.product_id.clone()));
        }
    }
    let previous: Option<Task> = {
        let mut table = txn.open_table(TASKS)?;
        let previous = tables::load(&table, &task.id)?;
        table.insert(task.id.as_str(), tables::encode(task)?.as_slice())?;
        previous
    };
    let mut index = txn.open_multimap_table(PRODUCT_TASKS)?;
    if let Some(previous) = previous.filter(|p| p.product_id != task.product_id) {
        index.remove(previous.product_id.as_str(), task.id.as_str())?;
        debug!(
            task = %task.id,
            from = %previous.product_id,
            to = %task.product_id,
            "task moved to another product"
        );
    }
    index.insert(task.product_id.as_str(), task.id.as_str())?;
    Ok(())
}

pub(super) fn append_audit(txn: &WriteTransaction, entry: &AuditEntry) -> Result<(), DapError> {
    let mut table = txn.open_table(AUDIT)?;
    table.insert(entry.key().as_str(), tables::encode(entry)?.as_slice())?;
    Ok(())
}

/// Write a customer task and keep the attribute index in step with it.
pub(super) fn write_customer_task(
    txn: &WriteTransaction,
    task: &CustomerTask,
) -> Result<(), DapError> {
    let previous: Option<CustomerTask> = {
        let mut table = txn.open_table(CUSTOMER_TASKS)?;
        let previous = tables::load(&table, &task.id)?;
        table.insert(task.id.as_str(), tables::encode(task)?.as_slice())?;
        previous
    };
    {
        let mut index = txn.open_multimap_table(PLAN_TASKS)?;
        index.insert(task.adoption_plan_id.as_str(), task.id.as_str())?;
    }
    let mut attributes = txn.open_table(ATTRIBUTE_TASKS)?;
    if let Some(previous) = previous {
        for attr in &previous.telemetry_attributes {
            if task.attribute(&attr.id).is_none() {
                attributes.remove(attr.id.as_str())?;
            }
        }
    }
    for attr in &task.telemetry_attributes {
        attributes.insert(attr.id.as_str(), task.id.as_str())?;
    }
    Ok(())
}

/// Every customer task of a plan, removed ones included, by sequence number.
pub(super) fn load_plan_tasks(
    txn: &WriteTransaction,
    plan_id: &str,
) -> Result<Vec<CustomerTask>, DapError> {
    let ids = {
        let index = txn.open_multimap_table(PLAN_TASKS)?;
        tables::children(&index, plan_id)?
    };
    let table = txn.open_table(CUSTOMER_TASKS)?;
    let mut tasks: Vec<CustomerTask> = tables::load_many(&table, &ids)?;
    tasks.sort_by(|a, b| {
        a.sequence_number
            .cmp(&b.sequence_number)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    Ok(tasks)
}

pub(super) fn load_plan(txn: &WriteTransaction, plan_id: &str) -> Result<AdoptionPlan, DapError> {
    let table = txn.open_table(PLANS)?;
    tables::require(&table, "adoption plan", plan_id)
}

pub(super) fn write_plan(txn: &WriteTransaction, plan: &AdoptionPlan) -> Result<(), DapError> {
    let mut table = txn.open_table(PLANS)?;
    table.insert(plan.id.as_str(), tables::encode(plan)?.as_slice())?;
    Ok(())
}

/// Recompute a plan's aggregates from its stored tasks and write it back.
pub(super) fn refresh_plan_progress(
    txn: &WriteTransaction,
    plan_id: &str,
) -> Result<AdoptionPlan, DapError> {
    let tasks = load_plan_tasks(txn, plan_id)?;
    let mut plan = load_plan(txn, plan_id)?;
    compute_progress(&tasks).apply_to(&mut plan);
    write_plan(txn, &plan)?;
    Ok(plan)
}

// =============================================================================
// TESTS
// =============================================================================
