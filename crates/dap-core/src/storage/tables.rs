//! Table layout and row codec.
//!
//! Every record table maps an id to a postcard-encoded row. Multimap tables
//! hold the parent/child indexes.

use crate::error::DapError;
use redb::{
    MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) const PRODUCTS: TableDefinition<&str, &[u8]> = TableDefinition::new("products");
pub(crate) const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
/// product id -> task ids
pub(crate) const PRODUCT_TASKS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("product_tasks");
pub(crate) const CUSTOMER_PRODUCTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("customer_products");
pub(crate) const PLANS: TableDefinition<&str, &[u8]> = TableDefinition::new("adoption_plans");
/// customer product id -> plan id (at most one plan per customer product)
pub(crate) const PLAN_BY_CUSTOMER_PRODUCT: TableDefinition<&str, &str> =
    TableDefinition::new("plan_by_customer_product");
pub(crate) const CUSTOMER_TASKS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("customer_tasks");
/// plan id -> customer task ids, removed ones included
pub(crate) const PLAN_TASKS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("plan_tasks");
/// customer attribute id -> customer task id
pub(crate) const ATTRIBUTE_TASKS: TableDefinition<&str, &str> =
    TableDefinition::new("attribute_tasks");
/// `AuditEntry::key()` -> entry
pub(crate) const AUDIT: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

/// Create every table so read transactions never see a missing one.
pub(crate) fn create_all(txn: &WriteTransaction) -> Result<(), DapError> {
    txn.open_table(PRODUCTS)?;
    txn.open_table(TASKS)?;
    txn.open_multimap_table(PRODUCT_TASKS)?;
    txn.open_table(CUSTOMER_PRODUCTS)?;
    txn.open_table(PLANS)?;
    txn.open_table(PLAN_BY_CUSTOMER_PRODUCT)?;
    txn.open_table(CUSTOMER_TASKS)?;
    txn.open_multimap_table(PLAN_TASKS)?;
    txn.open_table(ATTRIBUTE_TASKS)?;
    txn.open_table(AUDIT)?;
    Ok(())
}

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, DapError> {
    Ok(postcard::to_allocvec(record)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DapError> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Fetch and decode one row.
pub(crate) fn load<T, Tbl>(table: &Tbl, key: &str) -> Result<Option<T>, DapError>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Fetch and decode one row, or `NotFound`.
pub(crate) fn require<T, Tbl>(table: &Tbl, entity: &'static str, key: &str) -> Result<T, DapError>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    load(table, key)?.ok_or_else(|| DapError::not_found(entity, key))
}

/// Child ids of `parent` in a multimap index.
pub(crate) fn children<Tbl>(index: &Tbl, parent: &str) -> Result<Vec<String>, DapError>
where
    Tbl: ReadableMultimapTable<&'static str, &'static str>,
{
    let mut ids = Vec::new();
    for guard in index.get(parent)? {
        ids.push(guard?.value().to_string());
    }
    Ok(ids)
}

/// Decode every row referenced by `ids`, skipping dangling index entries.
pub(crate) fn load_many<T, Tbl>(table: &Tbl, ids: &[String]) -> Result<Vec<T>, DapError>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = load(table, id)? {
            rows.push(row);
        }
    }
    Ok(rows)
}
