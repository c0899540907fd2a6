//! Transaction Error Types

use thiserror::Error;

use crate::account_client::{AccountClientError, is_transient_message};

/// Transaction error kinds
///
/// `code()` values are stable across the RPC surface and logs.
#[derive(Error, Debug, Clone)]
pub enum TransactionError {
    // === Request Errors ===
    #[error("Missing required data: {0}")]
    MissingRequiredData(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid transaction type: {0}")]
    InvalidTransactionType(String),

    #[error("Invalid amount for transaction")]
    InvalidAmount,

    #[error("Cannot transfer amount to the same account")]
    SameAccount,

    #[error("Missing account info: {0}")]
    MissingAccountInfo(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    // === Balance Errors ===
    #[error("Source account has insufficient balance")]
    InsufficientBalance,

    #[error("Account has no balance to withdraw")]
    AccountEmpty,

    // === Account Service Errors ===
    #[error("account validation failed: {0}")]
    AccountValidationFailed(#[source] AccountClientError),

    #[error("account details missing for {0}")]
    AccountDetailsMissing(String),

    #[error("account locking failed: {0}")]
    AccountLockingFailed(#[source] AccountClientError),

    #[error("account unlocking failed: {0}")]
    AccountUnlockingFailed(#[source] AccountClientError),

    #[error("account balance update failed: {0}")]
    AccountService(#[source] AccountClientError),

    // === Lifecycle Errors ===
    #[error("{0}")]
    TransactionFailed(String),

    #[error("transaction status update failed: {0}")]
    TransactionStatusUpdateFailed(String),

    #[error("failed to mark transaction as failed: {0}")]
    FailedToMarkTransactionAsFailed(String),

    #[error("concurrent modification")]
    ConcurrentModification,

    #[error("transaction deadline passed")]
    DeadlineExceeded,

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    Database(String),
}

impl TransactionError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::MissingRequiredData(_) => "MISSING_REQUIRED_DATA",
            TransactionError::InvalidRequest(_) => "INVALID_REQUEST",
            TransactionError::InvalidTransactionType(_) => "INVALID_TRANSACTION_TYPE",
            TransactionError::InvalidAmount => "INVALID_AMOUNT",
            TransactionError::SameAccount => "SAME_ACCOUNT",
            TransactionError::MissingAccountInfo(_) => "MISSING_ACCOUNT_INFO",
            TransactionError::ValidationFailed(_) => "VALIDATION_FAILED",
            TransactionError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            TransactionError::AccountEmpty => "ACCOUNT_EMPTY",
            TransactionError::AccountValidationFailed(_) => "ACCOUNT_VALIDATION_FAILED",
            TransactionError::AccountDetailsMissing(_) => "ACCOUNT_DETAILS_MISSING",
            TransactionError::AccountLockingFailed(_) => "ACCOUNT_LOCKING_FAILED",
            TransactionError::AccountUnlockingFailed(_) => "ACCOUNT_UNLOCKING_FAILED",
            TransactionError::AccountService(_) => "TRANSACTION_FAILED",
            TransactionError::TransactionFailed(_) => "TRANSACTION_FAILED",
            TransactionError::TransactionStatusUpdateFailed(_) => {
                "TRANSACTION_STATUS_UPDATE_FAILED"
            }
            TransactionError::FailedToMarkTransactionAsFailed(_) => {
                "FAILED_TO_MARK_TRANSACTION_AS_FAILED"
            }
            TransactionError::ConcurrentModification => "CONCURRENT_MODIFICATION",
            TransactionError::DeadlineExceeded => "TRANSACTION_TIMEOUT",
            TransactionError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TransactionError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Whether the forward sequence may be retried after this error.
    ///
    /// Account service errors are classified by their transport tag; anything
    /// else that only carries a message falls back to the phrase classifier.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::AccountValidationFailed(e)
            | TransactionError::AccountLockingFailed(e)
            | TransactionError::AccountUnlockingFailed(e)
            | TransactionError::AccountService(e) => e.is_retryable(),
            TransactionError::Database(msg)
            | TransactionError::TransactionFailed(msg)
            | TransactionError::TransactionStatusUpdateFailed(msg) => is_transient_message(msg),
            _ => false,
        }
    }

    /// Short, stable message for end-user surfaces
    pub fn user_message(&self) -> String {
        match self {
            TransactionError::InvalidAmount
            | TransactionError::InsufficientBalance
            | TransactionError::SameAccount
            | TransactionError::AccountEmpty
            | TransactionError::MissingRequiredData(_)
            | TransactionError::InvalidTransactionType(_)
            | TransactionError::MissingAccountInfo(_) => self.to_string(),
            TransactionError::InvalidRequest(msg) => msg.clone(),
            other => format!("Transaction failed: {}", other.public_reason()),
        }
    }

    /// Reason safe to show to callers; internal details stay in logs.
    fn public_reason(&self) -> String {
        match self {
            TransactionError::AccountValidationFailed(e)
            | TransactionError::AccountLockingFailed(e)
            | TransactionError::AccountUnlockingFailed(e)
            | TransactionError::AccountService(e) => match e.remote_message() {
                Some(msg) => msg.to_string(),
                None => "account service unavailable".to_string(),
            },
            TransactionError::Database(_)
            | TransactionError::TransactionStatusUpdateFailed(_)
            | TransactionError::FailedToMarkTransactionAsFailed(_) => {
                "internal error".to_string()
            }
            TransactionError::ConcurrentModification => {
                "transaction was modified concurrently".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for TransactionError {
    fn from(e: sqlx::Error) -> Self {
        TransactionError::Database(e.to_string())
    }
}
