//! Transaction service handlers

use axum::{Extension, Json, extract::State};
use chrono::Utc;
use tracing::{info, warn};

use super::middleware::RequestId;
use super::state::TransactionState;
use super::types::{
    GetTransactionHistoryRequest, GetTransactionHistoryResponse, HealthCheckRequest,
    HealthCheckResponse, InitTransactionRequest, InitTransactionResponse, PaginationResponse,
    RequestMetadata, ResponseStatus, TransactionView,
};
use crate::auth::Claims;
use crate::transaction::{
    HistoryFilter, TransactionError, TransactionRequest, get_transaction_history,
};

/// The requester is always the token subject; a body value may only repeat it.
/// A blank request id is taken from the request id header.
fn resolve_metadata(
    mut metadata: RequestMetadata,
    claims: &Claims,
    request_id: &RequestId,
) -> Result<RequestMetadata, TransactionError> {
    let requester = metadata.requester.trim();
    if !requester.is_empty() && requester != claims.username {
        return Err(TransactionError::InvalidRequest(
            "requester does not match token".into(),
        ));
    }
    metadata.requester = claims.username.clone();
    if metadata.request_id.trim().is_empty() {
        metadata.request_id = request_id.0.clone();
    }
    Ok(metadata)
}

fn rejected(e: TransactionError) -> Json<InitTransactionResponse> {
    warn!(error = %e, code = e.code(), "InitTransaction rejected");
    Json(InitTransactionResponse {
        transaction_id: String::new(),
        status: String::new(),
        response: ResponseStatus::failed(e.user_message()),
    })
}

/// Start a money movement
///
/// Domain failures are reported in `response` with HTTP 200.
#[utoipa::path(
    post,
    path = "/transaction.v1.TransactionService/InitTransaction",
    request_body = InitTransactionRequest,
    responses(
        (status = 200, description = "Transaction outcome", body = InitTransactionResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "TransactionService"
)]
pub async fn init_transaction(
    State(state): State<TransactionState>,
    Extension(claims): Extension<Claims>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<InitTransactionRequest>,
) -> Json<InitTransactionResponse> {
    let metadata = match resolve_metadata(req.metadata, &claims, &request_id) {
        Ok(metadata) => metadata,
        Err(e) => return rejected(e),
    };
    let request = TransactionRequest {
        source_account_id: req.source_account_id,
        destination_account_id: req.destination_account_id,
        amount: req.amount,
        transaction_type: req.transaction_type,
        reference_id: req.reference,
        metadata,
    };

    match state.orchestrator.init_transaction(request).await {
        Ok(outcome) => {
            info!(
                transaction_id = %outcome.transaction.id,
                status = %outcome.transaction.status,
                success = outcome.is_success(),
                "InitTransaction handled"
            );
            let response = if outcome.is_success() {
                ResponseStatus::ok(outcome.message())
            } else {
                ResponseStatus::failed(outcome.message())
            };
            Json(InitTransactionResponse {
                transaction_id: outcome.transaction.id.to_string(),
                status: outcome.transaction.status.as_str().to_string(),
                response,
            })
        }
        Err(e) => rejected(e),
    }
}

/// Page through transactions of an account or a customer
#[utoipa::path(
    post,
    path = "/transaction.v1.TransactionService/GetTransactionHistory",
    request_body = GetTransactionHistoryRequest,
    responses(
        (status = 200, description = "Transaction page", body = GetTransactionHistoryResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "TransactionService"
)]
pub async fn get_transaction_history_handler(
    State(state): State<TransactionState>,
    Json(req): Json<GetTransactionHistoryRequest>,
) -> Json<GetTransactionHistoryResponse> {
    let filter = HistoryFilter {
        account_id: req.account_id,
        customer_id: req.customer_id,
        types: req.types,
        start_date: req.start_date,
        end_date: req.end_date,
        sort_order: req.sort_order,
        page: req.pagination.page,
        page_size: req.pagination.page_size,
    };

    match get_transaction_history(state.store.as_ref(), filter).await {
        Ok(page) => Json(GetTransactionHistoryResponse {
            transactions: page.transactions.iter().map(TransactionView::from).collect(),
            pagination: PaginationResponse {
                page: page.page.page,
                page_size: page.page.page_size,
                total_count: page.total_count,
                total_pages: page.total_pages,
            },
            response: ResponseStatus::ok("Transaction history retrieved"),
        }),
        Err(e) => {
            warn!(error = %e, code = e.code(), "GetTransactionHistory rejected");
            Json(GetTransactionHistoryResponse {
                transactions: Vec::new(),
                pagination: PaginationResponse::default(),
                response: ResponseStatus::failed(e.user_message()),
            })
        }
    }
}

/// Liveness over the RPC port
#[utoipa::path(
    post,
    path = "/transaction.v1.TransactionService/HealthCheck",
    request_body = HealthCheckRequest,
    responses((status = 200, description = "pong", body = HealthCheckResponse)),
    tag = "TransactionService"
)]
pub async fn health_check(Json(_req): Json<HealthCheckRequest>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        message: "pong".to_string(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            username: "ops_lead".into(),
            role: "editor".into(),
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_blank_metadata_filled() {
        let meta = resolve_metadata(
            RequestMetadata::default(),
            &claims(),
            &RequestId("req-9".into()),
        )
        .unwrap();
        assert_eq!(meta, RequestMetadata::new("ops_lead", "req-9"));
    }

    #[test]
    fn test_matching_requester_and_request_id_kept() {
        let meta = resolve_metadata(
            RequestMetadata::new(" ops_lead ", "req-1"),
            &claims(),
            &RequestId("req-9".into()),
        )
        .unwrap();
        assert_eq!(meta, RequestMetadata::new("ops_lead", "req-1"));
    }

    #[test]
    fn test_foreign_requester_rejected() {
        let err = resolve_metadata(
            RequestMetadata::new("system", "req-1"),
            &claims(),
            &RequestId("req-9".into()),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert_eq!(err.user_message(), "requester does not match token");
    }
}
