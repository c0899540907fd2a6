//! Shared handler state for the RPC routers

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::{AuthService, TokenIssuer};
use crate::db::Database;
use crate::transaction::{TransactionOrchestrator, TransactionStore};

/// Transaction service state
#[derive(Clone)]
pub struct TransactionState {
    pub orchestrator: Arc<TransactionOrchestrator>,
    /// History reads bypass the orchestrator
    pub store: Arc<dyn TransactionStore>,
    pub tokens: Arc<TokenIssuer>,
}

impl TransactionState {
    pub fn new(orchestrator: Arc<TransactionOrchestrator>, tokens: Arc<TokenIssuer>) -> Self {
        let store = orchestrator.store().clone();
        Self {
            orchestrator,
            store,
            tokens,
        }
    }
}

/// Auth service state
#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AuthService>,
    pub tokens: Arc<TokenIssuer>,
}

impl AuthState {
    pub fn new(service: Arc<AuthService>) -> Self {
        let tokens = Arc::new(service.tokens().clone());
        Self { service, tokens }
    }
}

/// Sidecar state. Without a database the service always reports ready.
#[derive(Clone, Default)]
pub struct HealthState {
    pub db: Option<Arc<Database>>,
    pub metrics: Option<PrometheusHandle>,
}
