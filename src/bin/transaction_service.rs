//! Transaction service
//!
//! RPC server, reconciliation loop, Account Service monitor, publisher
//! health monitor and the liveness sidecar, all stopped by SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use ledger_saga::account_client::AccountClient;
use ledger_saga::auth::TokenIssuer;
use ledger_saga::config::{AppConfig, ServiceKind};
use ledger_saga::db::{Database, schema};
use ledger_saga::publisher::MessagePublisher;
use ledger_saga::rpc::{self, HealthState, RouterOptions, TransactionState};
use ledger_saga::transaction::{
    OrchestratorConfig, PgTransactionStore, RecoveryWorker, TransactionOrchestrator,
    TransactionStore, WorkerConfig,
};
use ledger_saga::{build_version, logging, metrics, runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(ServiceKind::Transaction).context("loading configuration")?;
    let _log_guard = logging::init_logging(&config.logging);
    info!(version = %build_version(), env = %config.env, "starting transaction service");

    let metrics_handle = if config.observability.metrics.enabled {
        Some(metrics::install_recorder()?)
    } else {
        None
    };
    if config.observability.tracing.enabled {
        info!(
            protocol = %config.observability.tracing.protocol,
            endpoint = %config.observability.tracing.endpoint,
            "request tracing enabled"
        );
    }

    let db = Arc::new(
        Database::connect(&config.db.dsn)
            .await
            .context("connecting to PostgreSQL")?,
    );
    schema::init_transaction_schema(db.pool())
        .await
        .context("initializing transaction schema")?;

    let shutdown = runtime::install_signal_handler();

    let accounts = Arc::new(AccountClient::new(&config.account_service));
    let publisher = Arc::new(
        MessagePublisher::connect(&config.message_publisher)
            .await
            .context("configuring message publisher")?,
    );
    let store: Arc<dyn TransactionStore> = Arc::new(PgTransactionStore::new(db.pool().clone()));
    let tokens = Arc::new(TokenIssuer::new(
        &config.auth.jwt_secret,
        config.auth.jwt_token_duration,
    )?);

    let orchestrator = Arc::new(TransactionOrchestrator::new(
        store.clone(),
        accounts.clone(),
        publisher.clone(),
        OrchestratorConfig {
            transaction_timeout: config.recovery.transaction_timeout(),
            ..Default::default()
        },
    ));
    let worker = RecoveryWorker::new(
        store,
        accounts.clone(),
        publisher.clone(),
        WorkerConfig {
            scan_interval: config.recovery.interval(),
            ..Default::default()
        },
    );

    let mut tasks = Vec::new();

    let token = shutdown.child_token();
    tasks.push(("recovery", tokio::spawn(async move { worker.run(token).await })));

    let token = shutdown.child_token();
    let monitor = accounts.clone();
    tasks.push((
        "account_monitor",
        tokio::spawn(async move { monitor.run_monitor(token).await }),
    ));

    let token = shutdown.child_token();
    let health = publisher.clone();
    tasks.push((
        "publisher_health",
        tokio::spawn(async move { health.run_health_monitor(token).await }),
    ));

    let options = RouterOptions {
        request_timeout: Duration::from_secs(config.http.request_timeout_seconds),
        tracing_enabled: config.observability.tracing.enabled,
    };
    let app = rpc::transaction_router(TransactionState::new(orchestrator, tokens), options);
    tasks.push((
        "rpc_server",
        rpc::spawn_server("rpc", config.grpc.addr.clone(), app, &shutdown),
    ));

    let sidecar = rpc::health_router(HealthState {
        db: Some(db.clone()),
        metrics: metrics_handle,
    });
    tasks.push((
        "sidecar",
        rpc::spawn_server("sidecar", config.http.addr.clone(), sidecar, &shutdown),
    ));

    shutdown.cancelled().await;
    info!("shutting down transaction service");

    let unfinished = runtime::drain(
        tasks,
        Duration::from_secs(config.http.shutdown_timeout_seconds),
    )
    .await;
    if unfinished > 0 {
        warn!(unfinished, "some tasks were still running at exit");
    }

    db.pool().close().await;
    info!("transaction service stopped");
    Ok(())
}
