//! RPC surface: JSON over HTTP `POST /<package>.<Service>/<Method>`
//!
//! Both services share the envelope types, the middleware stack and the
//! sidecar router. Protected methods sit behind `require_bearer`.

pub mod auth_handlers;
pub mod health;
pub mod middleware;
pub mod openapi;
pub mod state;
pub mod transaction_handlers;
pub mod types;

use std::time::Duration;

use axum::{Router, middleware::from_fn_with_state, routing::post};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use health::health_router;
pub use middleware::{REQUEST_ID_HEADER, RequestId};
pub use state::{AuthState, HealthState, TransactionState};

use openapi::{AuthApiDoc, TransactionApiDoc};

pub const TRANSACTION_SERVICE_PATH: &str = "/transaction.v1.TransactionService";
pub const AUTH_SERVICE_PATH: &str = "/auth.v1.AuthService";

/// Settings shared by both routers
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub request_timeout: Duration,
    pub tracing_enabled: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            tracing_enabled: false,
        }
    }
}

fn method_path(service: &str, method: &str) -> String {
    format!("{service}/{method}")
}

pub fn transaction_router(state: TransactionState, options: RouterOptions) -> Router {
    let path = |m: &str| method_path(TRANSACTION_SERVICE_PATH, m);

    let protected = Router::new()
        .route(
            &path("InitTransaction"),
            post(transaction_handlers::init_transaction),
        )
        .route(
            &path("GetTransactionHistory"),
            post(transaction_handlers::get_transaction_history_handler),
        )
        .route_layer(from_fn_with_state(
            state.tokens.clone(),
            middleware::require_bearer,
        ));

    let app = Router::new()
        .route(&path("HealthCheck"), post(transaction_handlers::health_check))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", TransactionApiDoc::openapi()));

    middleware::with_common_layers(
        app,
        "transaction",
        options.request_timeout,
        options.tracing_enabled,
    )
}

pub fn auth_router(state: AuthState, options: RouterOptions) -> Router {
    let path = |m: &str| method_path(AUTH_SERVICE_PATH, m);

    let protected = Router::new()
        .route(&path("CreateEmployee"), post(auth_handlers::create_employee))
        .route(&path("UpdateRole"), post(auth_handlers::update_role))
        .route(&path("DeleteEmployee"), post(auth_handlers::delete_employee))
        .route(&path("ListEmployees"), post(auth_handlers::list_employees))
        .route_layer(from_fn_with_state(
            state.tokens.clone(),
            middleware::require_bearer,
        ));

    let app = Router::new()
        .route(&path("Authenticate"), post(auth_handlers::authenticate))
        .route(&path("HealthCheck"), post(auth_handlers::health_check))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", AuthApiDoc::openapi()));

    middleware::with_common_layers(app, "auth", options.request_timeout, options.tracing_enabled)
}

/// Bind `addr` and serve `app` until `shutdown` is cancelled
pub async fn serve(
    name: &'static str,
    addr: &str,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(server = name, addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!(server = name, "stopped");
    Ok(())
}

/// Run [`serve`] in the background. A server that fails to bind or crashes
/// cancels `root` so the whole process shuts down.
pub fn spawn_server(
    name: &'static str,
    addr: String,
    app: Router,
    root: &CancellationToken,
) -> JoinHandle<()> {
    let root = root.clone();
    tokio::spawn(async move {
        if let Err(e) = serve(name, &addr, app, root.child_token()).await {
            error!(server = name, addr = %addr, error = %e, "server failed");
            root.cancel();
        }
    })
}
