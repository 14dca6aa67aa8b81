//! Error type shared by the store and the planners.
//!
//! The evaluator never produces these: a bad value or a bad pattern becomes a
//! failed [`EvaluationResult`](crate::EvaluationResult) instead.

use crate::criteria::CriteriaError;
use thiserror::Error;

/// Errors from DAP core operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind ("adoption plan", "customer task", ...).
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// The request is well-formed but not acceptable.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// A success-criteria definition was rejected.
    #[error("criteria error: {0}")]
    Criteria(#[from] CriteriaError),

    /// The embedded database failed. The enclosing transaction was aborted.
    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    /// A stored record or a JSON payload could not be (de)serialized.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Filesystem error (catalog and row files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DapError {
    /// Shorthand for [`DapError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

// redb reports a different error type per stage (open, begin, table, read,
// commit). All of them fold into `redb::Error`.
macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for DapError {
                fn from(err: $ty) -> Self {
                    Self::Storage(redb::Error::from(err))
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<postcard::Error> for DapError {
    fn from(err: postcard::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for DapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}
