//! Auth service
//!
//! Operator authentication and employee management over RPC, plus the
//! liveness sidecar. The configured admin is provisioned at boot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use ledger_saga::auth::{AuthService, DataHasher, PgEmployeeStore, TokenIssuer};
use ledger_saga::config::{AppConfig, ServiceKind};
use ledger_saga::db::{Database, schema};
use ledger_saga::rpc::{self, AuthState, HealthState, RouterOptions};
use ledger_saga::{build_version, logging, metrics, runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(ServiceKind::Auth).context("loading configuration")?;
    let _log_guard = logging::init_logging(&config.logging);
    info!(version = %build_version(), env = %config.env, "starting auth service");

    let metrics_handle = if config.observability.metrics.enabled {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let db = Arc::new(
        Database::connect(&config.db.dsn)
            .await
            .context("connecting to PostgreSQL")?,
    );
    schema::init_auth_schema(db.pool())
        .await
        .context("initializing auth schema")?;

    let service = Arc::new(AuthService::new(
        Arc::new(PgEmployeeStore::new(db.pool().clone())),
        DataHasher::new(&config.auth.hash_key)?,
        TokenIssuer::new(&config.auth.jwt_secret, config.auth.jwt_token_duration)?,
    ));

    if service
        .provision_admin(&config.user)
        .await
        .context("provisioning admin employee")?
    {
        info!(username = %config.user.admin_username, "admin provisioned");
    }

    let shutdown = runtime::install_signal_handler();

    let options = RouterOptions {
        request_timeout: Duration::from_secs(config.http.request_timeout_seconds),
        tracing_enabled: config.observability.tracing.enabled,
    };
    let app = rpc::auth_router(AuthState::new(service), options);
    let sidecar = rpc::health_router(HealthState {
        db: Some(db.clone()),
        metrics: metrics_handle,
    });

    let tasks = vec![
        (
            "rpc_server",
            rpc::spawn_server("rpc", config.grpc.addr.clone(), app, &shutdown),
        ),
        (
            "sidecar",
            rpc::spawn_server("sidecar", config.http.addr.clone(), sidecar, &shutdown),
        ),
    ];

    shutdown.cancelled().await;
    info!("shutting down auth service");

    let unfinished = runtime::drain(
        tasks,
        Duration::from_secs(config.http.shutdown_timeout_seconds),
    )
    .await;
    if unfinished > 0 {
        warn!(unfinished, "some tasks were still running at exit");
    }

    db.pool().close().await;
    info!("auth service stopped");
    Ok(())
}
