//! # Storage Module
//!
//! Transactional store for catalogs, customer products and adoption plans,
//! backed by redb.
//!
//! Uses redb embedded database for:
//! - ACID transactions (a sync or an import commits entirely or not at all)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer: concurrent syncs serialize)

mod plans;
mod redb_store;
mod tables;
mod telemetry;

pub use redb_store::RedbStore;
