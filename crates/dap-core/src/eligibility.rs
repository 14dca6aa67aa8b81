//! # Eligibility
//!
//! Decides which product tasks belong in a customer's adoption plan.
//!
//! A task is eligible when all of these hold:
//!
//! 1. it is not deleted,
//! 2. its license rank is at most the customer's,
//! 3. if the customer selected outcomes AND the task has outcomes, they intersect,
//! 4. the same for releases, independently of outcomes.
//!
//! Tasks without outcome (or release) associations are always eligible on
//! that axis. An empty selection means "no filter".

use crate::model::{AdoptionPlan, CustomerProduct, LicenseLevel, Task};
use serde::Serialize;
use std::collections::HashSet;

/// Why a task is or is not in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    Deleted,
    LicenseTooLow {
        required: LicenseLevel,
        held: LicenseLevel,
    },
    OutcomeMismatch,
    ReleaseMismatch,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// The customer-side inputs of the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityFilter {
    pub license_level: LicenseLevel,
    pub outcomes: HashSet<String>,
    pub releases: HashSet<String>,
}

impl EligibilityFilter {
    pub fn new(
        license_level: LicenseLevel,
        outcomes: impl IntoIterator<Item = String>,
        releases: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            license_level,
            outcomes: outcomes.into_iter().collect(),
            releases: releases.into_iter().collect(),
        }
    }

    /// Filter from a customer product's current license and selection.
    pub fn from_customer_product(cp: &CustomerProduct) -> Self {
        Self::new(
            cp.license_level,
            cp.selected_outcome_ids.iter().cloned(),
            cp.selected_release_ids.iter().cloned(),
        )
    }

    /// Filter from the snapshot stored on a plan.
    pub fn from_plan(plan: &AdoptionPlan) -> Self {
        Self::new(
            plan.license_level,
            plan.selected_outcome_ids.iter().cloned(),
            plan.selected_release_ids.iter().cloned(),
        )
    }

    /// Classify one product task.
    pub fn check(&self, task: &Task) -> Eligibility {
        if !task.is_live() {
            return Eligibility::Deleted;
        }
        if task.license_level.rank() > self.license_level.rank() {
            return Eligibility::LicenseTooLow {
                required: task.license_level,
                held: self.license_level,
            };
        }
        if !passes_axis(&self.outcomes, &task.outcome_ids) {
            return Eligibility::OutcomeMismatch;
        }
        if !passes_axis(&self.releases, &task.release_ids) {
            return Eligibility::ReleaseMismatch;
        }
        Eligibility::Eligible
    }

    pub fn is_eligible(&self, task: &Task) -> bool {
        self.check(task).is_eligible()
    }
}

fn passes_axis(selected: &HashSet<String>, associated: &[String]) -> bool {
    selected.is_empty()
        || associated.is_empty()
        || associated.iter().any(|id| selected.contains(id))
}
