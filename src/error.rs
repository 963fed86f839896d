use crate::domain::ids::ShiftId;
use crate::domain::payment::PaymentState;
use thiserror::Error;

/// Failures reported by a payment provider adapter.
///
/// The variant decides what the caller may do next: `Auth` needs an operator,
/// `TransientNetwork` may be re-triggered explicitly, `Rejected` ends the attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider authentication failed: {0}")]
    Auth(String),
    #[error("Transient network error: {0}")]
    TransientNetwork(String),
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether an operator may safely re-trigger the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::TransientNetwork(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Rejected(format!("Malformed provider response: {}", err))
        } else {
            ProviderError::TransientNetwork(err.to_string())
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid transition from {current} to {requested}")]
    InvalidTransition {
        current: PaymentState,
        requested: PaymentState,
    },
    #[error("Shift {0} already has an active payment")]
    DuplicatePayment(ShiftId),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EscrowError {
    fn from(err: rocksdb::Error) -> Self {
        EscrowError::StorageError(err.to_string())
    }
}

impl EscrowError {
    /// Losing a compare-and-swap race: someone else is handling the payment.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EscrowError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
