//! # DAP Core
//!
//! The rule engine behind DAP adoption plans.
//!
//! An adoption plan is a customer-specific checklist instantiated from a
//! product definition. This crate owns the two pieces of logic that keep such
//! plans honest:
//!
//! - the **success-criteria evaluator** ([`evaluator`]), which decides whether
//!   a telemetry value satisfies a typed criteria tree, and
//! - the **plan synchronizer** ([`sync`], applied by [`storage::RedbStore`]),
//!   which reconciles a plan's task membership against the current product
//!   definition without touching recorded progress.
//!
//! ## Layout
//!
//! ```text
//! criteria ──► formats (canonical + legacy JSON)
//!    │
//!    ▼
//! evaluator ──► status (task status from telemetry)
//!                  │
//! eligibility ──► sync (pure reconcile plan) ──► storage (redb txn) ◄── import
//! ```
//!
//! Everything here is synchronous and free of process-wide state: the store
//! and the evaluation clock are constructed by the caller and passed in.

pub mod criteria;
pub mod eligibility;
pub mod error;
pub mod evaluator;
pub mod formats;
pub mod import;
pub mod model;
pub mod response;
pub mod status;
pub mod storage;
pub mod sync;

pub use criteria::{
    CriteriaError, NumberOperator, StringMatchMode, SuccessCriteria, TimestampMode,
};
pub use eligibility::{Eligibility, EligibilityFilter};
pub use error::DapError;
pub use evaluator::{EvalContext, EvaluationResult, evaluate, evaluate_with};
pub use import::ImportRow;
pub use model::{
    AdoptionPlan, AuditEntry, Catalog, CustomerProduct, CustomerProductUpdate, CustomerTask,
    CustomerTelemetryAttribute, DataType, LicenseLevel, Product, StatusUpdateSource, Task,
    TaskStatus, TelemetryAttribute, TelemetryValue, Timestamp, ValueSource,
};
pub use response::{ImportSummary, MigrationReport, SyncOutcome, TaskEvaluation};
pub use status::{StatusAssessment, assess_task_status};
pub use storage::RedbStore;
pub use sync::{PlanProgress, SyncPlan, compute_progress, plan_sync};
