//! Transaction domain types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::TransactionError;
use crate::rpc::types::RequestMetadata;

/// Kind of balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Transfer,
    WithdrawFull,
    WithdrawAmount,
    AddAmount,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::WithdrawFull => "withdraw_full",
            TransactionType::WithdrawAmount => "withdraw_amount",
            TransactionType::AddAmount => "add_amount",
        }
    }

    /// Only transfers touch a second account
    #[inline]
    pub fn needs_destination(&self) -> bool {
        matches!(self, TransactionType::Transfer)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transfer" => Ok(TransactionType::Transfer),
            "withdraw_full" => Ok(TransactionType::WithdrawFull),
            "withdraw_amount" => Ok(TransactionType::WithdrawAmount),
            "add_amount" => Ok(TransactionType::AddAmount),
            _ => Err(TransactionError::InvalidTransactionType(s.to_string())),
        }
    }
}

/// Transaction status
///
/// `successful` means balances were applied but accounts are still locked;
/// `completed` means they were unlocked too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Successful,
    Completed,
    Failed,
    Recovering,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Successful => "successful",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Recovering => "recovering",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Terminal, or claimed by reconciliation; the orchestrator stops writing
    #[inline]
    pub fn is_claimed_or_terminal(&self) -> bool {
        self.is_terminal() || matches!(self, TransactionStatus::Recovering)
    }

    /// Statuses the reconciliation loop picks up once `timeout_at` has passed
    pub const RECOVERABLE: [TransactionStatus; 3] = [
        TransactionStatus::Pending,
        TransactionStatus::Recovering,
        TransactionStatus::Successful,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "successful" => Some(TransactionStatus::Successful),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "recovering" => Some(TransactionStatus::Recovering),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw `InitTransaction` input before validation
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub source_account_id: String,
    pub destination_account_id: Option<String>,
    pub amount: Decimal,
    pub transaction_type: String,
    pub reference_id: String,
    pub metadata: RequestMetadata,
}

/// Request that passed every local check
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub source_account_id: String,
    pub destination_account_id: Option<String>,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub reference_id: String,
    pub metadata: RequestMetadata,
}

impl TransactionRequest {
    /// Local validation, run before anything is persisted.
    pub fn validate(self) -> Result<ValidatedRequest, TransactionError> {
        let source = self.source_account_id.trim().to_string();
        if source.is_empty() {
            return Err(TransactionError::MissingRequiredData(
                "source_account_id".into(),
            ));
        }
        if self.reference_id.trim().is_empty() {
            return Err(TransactionError::MissingRequiredData("reference_id".into()));
        }
        if self.metadata.requester.trim().is_empty() {
            return Err(TransactionError::MissingRequiredData("requester".into()));
        }

        let transaction_type: TransactionType = self.transaction_type.parse()?;
        let destination = self
            .destination_account_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        if transaction_type.needs_destination() {
            match &destination {
                None => {
                    return Err(TransactionError::MissingAccountInfo(
                        "destination_account_id".into(),
                    ));
                }
                Some(dst) if *dst == source => return Err(TransactionError::SameAccount),
                Some(_) => {}
            }
        } else if destination.is_some() {
            return Err(TransactionError::InvalidRequest(format!(
                "destination account is not allowed for {transaction_type}"
            )));
        }

        let amount = match transaction_type {
            TransactionType::WithdrawFull => Decimal::ZERO,
            _ if self.amount <= Decimal::ZERO => return Err(TransactionError::InvalidAmount),
            _ => self.amount,
        };

        Ok(ValidatedRequest {
            source_account_id: source,
            destination_account_id: destination,
            amount,
            transaction_type,
            reference_id: self.reference_id.trim().to_string(),
            metadata: self.metadata,
        })
    }
}

/// Persisted transaction row
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub source_account_id: String,
    pub destination_account_id: Option<String>,
    pub source_customer_id: Option<String>,
    pub destination_customer_id: Option<String>,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub reference_id: String,
    pub status: TransactionStatus,
    pub timeout_at: DateTime<Utc>,
    pub version: i64,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(req: &ValidatedRequest, timeout: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_account_id: req.source_account_id.clone(),
            destination_account_id: req.destination_account_id.clone(),
            source_customer_id: None,
            destination_customer_id: None,
            amount: req.amount,
            transaction_type: req.transaction_type,
            reference_id: req.reference_id.clone(),
            status: TransactionStatus::Pending,
            timeout_at: now + timeout,
            version: 1,
            retry_count: 0,
            last_retry_at: None,
            error_reason: None,
            created_by: req.metadata.requester.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Account ids the saga must validate and lock
    pub fn account_ids(&self) -> Vec<String> {
        let mut ids = vec![self.source_account_id.clone()];
        if self.transaction_type.needs_destination()
            && let Some(dst) = &self.destination_account_id
        {
            ids.push(dst.clone());
        }
        ids
    }
}
