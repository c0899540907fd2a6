//! Auth service handlers

use axum::{Extension, Json, extract::State};
use chrono::Utc;
use tracing::warn;

use super::state::AuthState;
use super::types::{
    AckResponse, AuthenticateRequest, AuthenticateResponse, CreateEmployeeRequest,
    CreateEmployeeResponse, DeleteEmployeeRequest, EmployeeView, HealthCheckRequest,
    HealthCheckResponse, ListEmployeesRequest, ListEmployeesResponse, ResponseStatus,
    UpdateRoleRequest,
};
use crate::auth::{AuthError, Claims, NewEmployee};

/// The acting employee is the token subject; a body `requester` may only repeat it.
fn resolve_requester(claims: &Claims, requester: Option<&str>) -> Result<String, AuthError> {
    match requester.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) if r != claims.username => Err(AuthError::InvalidRequest(
            "requester does not match token".into(),
        )),
        _ => Ok(claims.username.clone()),
    }
}

fn failure(method: &'static str, e: &AuthError) -> ResponseStatus {
    warn!(method, error = %e, code = e.code(), "Auth request failed");
    ResponseStatus::failed(e.user_message())
}

#[utoipa::path(
    post,
    path = "/auth.v1.AuthService/Authenticate",
    request_body = AuthenticateRequest,
    responses((status = 200, description = "Token pair or failure", body = AuthenticateResponse)),
    tag = "AuthService"
)]
pub async fn authenticate(
    State(state): State<AuthState>,
    Json(req): Json<AuthenticateRequest>,
) -> Json<AuthenticateResponse> {
    match state.service.authenticate(&req.username, &req.password).await {
        Ok(pair) => Json(AuthenticateResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            response: ResponseStatus::ok("authenticated"),
        }),
        Err(e) => Json(AuthenticateResponse {
            access_token: String::new(),
            refresh_token: String::new(),
            response: failure("Authenticate", &e),
        }),
    }
}

#[utoipa::path(
    post,
    path = "/auth.v1.AuthService/CreateEmployee",
    request_body = CreateEmployeeRequest,
    responses(
        (status = 200, description = "Created employee or failure", body = CreateEmployeeResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "AuthService"
)]
pub async fn create_employee(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateEmployeeRequest>,
) -> Json<CreateEmployeeResponse> {
    let result = async {
        let requester = resolve_requester(&claims, req.requester.as_deref())?;
        let new = NewEmployee {
            username: req.username,
            password: req.password,
            role: req.role,
        };
        state.service.create_employee(new, &requester).await
    }
    .await;

    match result {
        Ok(employee) => Json(CreateEmployeeResponse {
            employee: Some(EmployeeView::from(&employee)),
            response: ResponseStatus::ok("employee created"),
        }),
        Err(e) => Json(CreateEmployeeResponse {
            employee: None,
            response: failure("CreateEmployee", &e),
        }),
    }
}

#[utoipa::path(
    post,
    path = "/auth.v1.AuthService/UpdateRole",
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated employee or failure", body = CreateEmployeeResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "AuthService"
)]
pub async fn update_role(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateRoleRequest>,
) -> Json<CreateEmployeeResponse> {
    let result = async {
        let requester = resolve_requester(&claims, req.requester.as_deref())?;
        state
            .service
            .update_role(&req.username, &req.role, &requester)
            .await
    }
    .await;

    match result {
        Ok(employee) => Json(CreateEmployeeResponse {
            employee: Some(EmployeeView::from(&employee)),
            response: ResponseStatus::ok("role updated"),
        }),
        Err(e) => Json(CreateEmployeeResponse {
            employee: None,
            response: failure("UpdateRole", &e),
        }),
    }
}

#[utoipa::path(
    post,
    path = "/auth.v1.AuthService/DeleteEmployee",
    request_body = DeleteEmployeeRequest,
    responses(
        (status = 200, description = "Acknowledgement", body = AckResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "AuthService"
)]
pub async fn delete_employee(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DeleteEmployeeRequest>,
) -> Json<AckResponse> {
    let result = async {
        let requester = resolve_requester(&claims, req.requester.as_deref())?;
        state.service.delete_employee(&req.username, &requester).await
    }
    .await;

    let response = match result {
        Ok(()) => ResponseStatus::ok("employee deleted"),
        Err(e) => failure("DeleteEmployee", &e),
    };
    Json(AckResponse { response })
}

#[utoipa::path(
    post,
    path = "/auth.v1.AuthService/ListEmployees",
    request_body = ListEmployeesRequest,
    responses(
        (status = 200, description = "Employee page", body = ListEmployeesResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "AuthService"
)]
pub async fn list_employees(
    State(state): State<AuthState>,
    Json(req): Json<ListEmployeesRequest>,
) -> Json<ListEmployeesResponse> {
    match state.service.list_employees(req.page, req.page_size).await {
        Ok(page) => Json(ListEmployeesResponse {
            employees: page.employees.iter().map(EmployeeView::from).collect(),
            page: page.page,
            page_size: page.page_size,
            total_count: page.total_count,
            response: ResponseStatus::ok("employees listed"),
        }),
        Err(e) => Json(ListEmployeesResponse {
            employees: Vec::new(),
            page: req.page,
            page_size: req.page_size,
            total_count: 0,
            response: failure("ListEmployees", &e),
        }),
    }
}

#[utoipa::path(
    post,
    path = "/auth.v1.AuthService/HealthCheck",
    request_body = HealthCheckRequest,
    responses((status = 200, description = "pong", body = HealthCheckResponse)),
    tag = "AuthService"
)]
pub async fn health_check(Json(_req): Json<HealthCheckRequest>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        message: "pong".to_string(),
        timestamp: Utc::now(),
    })
}
