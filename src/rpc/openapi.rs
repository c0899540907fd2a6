//! OpenAPI documents for both RPC servers
//!
//! - Swagger UI: `http://<grpc.addr>/docs`
//! - OpenAPI JSON: `http://<grpc.addr>/api-docs/openapi.json`

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::types::{
    AckResponse, AuthenticateRequest, AuthenticateResponse, CreateEmployeeRequest,
    CreateEmployeeResponse, DeleteEmployeeRequest, EmployeeView, GetTransactionHistoryRequest,
    GetTransactionHistoryResponse, HealthCheckRequest, HealthCheckResponse, InitTransactionRequest,
    InitTransactionResponse, ListEmployeesRequest, ListEmployeesResponse, PaginationRequest,
    PaginationResponse, RequestMetadata, ResponseStatus, TransactionView, UpdateRoleRequest,
};

/// HS256 bearer token issued by `Authenticate`
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Transaction Service",
        version = "1.0.0",
        description = "Money movement between customer accounts, driven by a persisted saga."
    ),
    paths(
        super::transaction_handlers::init_transaction,
        super::transaction_handlers::get_transaction_history_handler,
        super::transaction_handlers::health_check,
    ),
    components(schemas(
        ResponseStatus,
        RequestMetadata,
        HealthCheckRequest,
        HealthCheckResponse,
        InitTransactionRequest,
        InitTransactionResponse,
        PaginationRequest,
        PaginationResponse,
        GetTransactionHistoryRequest,
        GetTransactionHistoryResponse,
        TransactionView,
    )),
    modifiers(&SecurityAddon),
    tags((name = "TransactionService", description = "transaction.v1.TransactionService"))
)]
pub struct TransactionApiDoc;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Auth Service",
        version = "1.0.0",
        description = "Operator authentication and employee management."
    ),
    paths(
        super::auth_handlers::authenticate,
        super::auth_handlers::create_employee,
        super::auth_handlers::update_role,
        super::auth_handlers::delete_employee,
        super::auth_handlers::list_employees,
        super::auth_handlers::health_check,
    ),
    components(schemas(
        ResponseStatus,
        AckResponse,
        HealthCheckRequest,
        HealthCheckResponse,
        AuthenticateRequest,
        AuthenticateResponse,
        CreateEmployeeRequest,
        CreateEmployeeResponse,
        UpdateRoleRequest,
        DeleteEmployeeRequest,
        ListEmployeesRequest,
        ListEmployeesResponse,
        EmployeeView,
    )),
    modifiers(&SecurityAddon),
    tags((name = "AuthService", description = "auth.v1.AuthService"))
)]
pub struct AuthApiDoc;
