//! ledger_saga - saga-orchestrated money movement
//!
//! Two services share this library:
//!
//! - `transaction_service` moves balances between accounts owned by a remote
//!   Account Service. Each movement is a persisted saga
//!   (validate → lock → process → complete) with compensation, and a
//!   reconciliation loop finishes whatever a crash left behind.
//! - `auth_service` authenticates operators and manages employee records.
//!
//! # Modules
//!
//! - [`config`] - Layered configuration (defaults, YAML, dotenv, `_FILE` secrets, env)
//! - [`logging`] - `tracing` subscriber setup
//! - [`metrics`] - Prometheus recorder and named metrics
//! - [`runtime`] - Signal handling and graceful drain
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`transaction`] - Saga orchestrator, reconciliation, history
//! - [`account_client`] - Client for the remote Account Service
//! - [`publisher`] - Outbox event publisher (Redis Streams)
//! - [`auth`] - Hashing, tokens, employees
//! - [`rpc`] - Routers, handlers and middleware for both services

pub mod config;
pub mod logging;
pub mod metrics;
pub mod runtime;

pub mod db;

pub mod account_client;
pub mod auth;
pub mod publisher;
pub mod transaction;

pub mod rpc;

pub use config::{AppConfig, ServiceKind};
pub use transaction::{TransactionError, TransactionOrchestrator, TransactionOutcome};

/// Version string logged at startup: `<crate version>+<git hash>`
pub fn build_version() -> String {
    format!("{}+{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))
}
