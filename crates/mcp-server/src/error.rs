//! Service-level error taxonomy.
//!
//! Domain services return `Result<T, ServiceError>`; the tool surface folds
//! every variant into the `{status, message}` envelope. Nothing in this crate
//! throws across the protocol boundary.

use note_format::ValidationError;

use crate::storage::StoreError;

/// One variant per envelope status the protocol can report for a failure.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad input; the message names the offending field.
    #[error("{0}")]
    Validation(String),

    /// Absent space, note, bank file, or backup.
    #[error("{0}")]
    NotFound(String),

    /// Permission or scope violation.
    #[error("{0}")]
    Forbidden(String),

    /// Consolidation already running, or similar contended state.
    #[error("{0}")]
    Conflict(String),

    /// Creation attempted over an existing resource.
    #[error("{0}")]
    AlreadyExists(String),

    /// Object-store or remote failure after bounded retries.
    #[error("{0}")]
    Upstream(String),

    /// Unparseable persisted JSON; never silently rewritten.
    #[error("{0}")]
    Corrupt(String),
}

impl ServiceError {
    /// The envelope `status` string for this error.
    pub fn status(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::AlreadyExists(_) => "already_exists",
            ServiceError::Upstream(_) => "error",
            ServiceError::Corrupt(_) => "error",
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { .. } => ServiceError::Corrupt(e.to_string()),
            _ => ServiceError::Upstream(e.to_string()),
        }
    }
}
