//! # Status Module
//!
//! Task status derived from telemetry.
//!
//! The derivation is pure: it reads a customer task, evaluates its attributes
//! at a given instant and proposes a status. Writing the result (and the
//! audit trail) is the store's job.

mod assessment;

pub use assessment::*;
