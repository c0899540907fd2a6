//! RPC wire types
//!
//! Every response carries a `response { message, success }` envelope; domain
//! failures are reported there with HTTP 200, never as transport errors.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Employee;
use crate::transaction::Transaction;

/// Result envelope attached to every response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResponseStatus {
    pub message: String,
    pub success: bool,
}

impl ResponseStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// Caller correlation data carried on every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RequestMetadata {
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub request_id: String,
}

impl RequestMetadata {
    pub fn new(requester: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            request_id: request_id.into(),
        }
    }

    /// Metadata used by background jobs
    pub fn system() -> Self {
        Self::new("system", Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HealthCheckRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthCheckResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Generic acknowledgement for write operations without a payload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AckResponse {
    pub response: ResponseStatus,
}

// ============================================================================
// Transaction service
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitTransactionRequest {
    pub source_account_id: String,
    #[serde(default)]
    pub destination_account_id: Option<String>,
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    #[serde(rename = "type")]
    #[schema(example = "transfer")]
    pub transaction_type: String,
    pub reference: String,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitTransactionResponse {
    pub transaction_id: String,
    pub status: String,
    pub response: ResponseStatus,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct PaginationRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct PaginationResponse {
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GetTransactionHistoryRequest {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// `asc` or `desc` (default)
    #[serde(default)]
    pub sort_order: String,
    #[serde(default)]
    pub pagination: PaginationRequest,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    pub id: String,
    pub source_account_id: String,
    pub destination_account_id: Option<String>,
    pub source_customer_id: Option<String>,
    pub destination_customer_id: Option<String>,
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub reference_id: String,
    pub status: String,
    pub error_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            source_account_id: tx.source_account_id.clone(),
            destination_account_id: tx.destination_account_id.clone(),
            source_customer_id: tx.source_customer_id.clone(),
            destination_customer_id: tx.destination_customer_id.clone(),
            amount: tx.amount,
            transaction_type: tx.transaction_type.as_str().to_string(),
            reference_id: tx.reference_id.clone(),
            status: tx.status.as_str().to_string(),
            error_reason: tx.error_reason.clone(),
            created_by: tx.created_by.clone(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GetTransactionHistoryResponse {
    pub transactions: Vec<TransactionView>,
    pub pagination: PaginationResponse,
    pub response: ResponseStatus,
}

// ============================================================================
// Auth service
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticateResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub response: ResponseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateEmployeeRequest {
    pub username: String,
    pub password: String,
    #[schema(example = "viewer")]
    pub role: String,
    /// Must match the bearer token's username when present
    #[serde(default)]
    pub requester: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmployeeView {
    pub id: String,
    pub username: String,
    pub role: String,
    pub status: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Employee> for EmployeeView {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id.to_string(),
            username: e.username.clone(),
            role: e.role.as_str().to_string(),
            status: e.status.as_str().to_string(),
            created_by: e.created_by.clone(),
            updated_by: e.updated_by.clone(),
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateEmployeeResponse {
    pub employee: Option<EmployeeView>,
    pub response: ResponseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub requester: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteEmployeeRequest {
    pub username: String,
    #[serde(default)]
    pub requester: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ListEmployeesRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListEmployeesResponse {
    pub employees: Vec<EmployeeView>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
    pub response: ResponseStatus,
}
