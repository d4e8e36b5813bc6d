use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;
use thiserror::Error;

/// Failures of scheduler operations.
///
/// `Display` is the short message shown to the caller. Storage detail is only carried for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    Validation(String),
    #[error("Please login first")]
    NotLoggedIn,
    #[error("{0}")]
    PermissionDenied(String),
    #[error("No caregiver is available")]
    NoAvailability,
    #[error("Vaccine not found")]
    VaccineNotFound,
    #[error("Not enough available doses")]
    InventoryExhausted,
    #[error("Appointment {0} not found")]
    NotFound(i32),
    #[error("concurrent update conflict")]
    ConcurrencyConflict,
    #[error("storage failure: {0}")]
    Persistence(String),
}

impl SchedulerError {
    pub fn validation(message: impl Into<String>) -> Self {
        SchedulerError::Validation(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        SchedulerError::PermissionDenied(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::ConcurrencyConflict)
    }

    /// Message safe to hand back to a user; internal failures collapse to a generic line.
    pub fn user_message(&self) -> String {
        match self {
            SchedulerError::ConcurrencyConflict | SchedulerError::Persistence(_) => {
                "Please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<DieselError> for SchedulerError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                SchedulerError::ConcurrencyConflict
            }
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
                if info.table_name() == Some("appointments") =>
            {
                SchedulerError::ConcurrencyConflict
            }
            other => SchedulerError::Persistence(other.to_string()),
        }
    }
}

impl From<bb8::RunError<PoolError>> for SchedulerError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        SchedulerError::Persistence(format!("connection pool: {}", err))
    }
}
