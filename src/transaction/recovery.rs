//! Reconciliation Worker
//!
//! Background worker that drives timed-out transactions to `failed`.
//!
//! A stuck transaction is never completed on the orchestrator's behalf: it
//! is unlocked as `system`, failed with `recovery: transaction timeout`, and
//! the emitted event lets downstream systems reconcile any applied balances.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::TransactionError;
use super::events::{self, Event, EventType};
use super::saga::TransactionSaga;
use super::state::SagaState;
use super::store::TransactionStore;
use super::types::{Transaction, TransactionStatus};
use crate::account_client::AccountService;
use crate::metrics;
use crate::publisher::EventPublisher;
use crate::rpc::types::RequestMetadata;

pub const RECOVERY_REASON: &str = "recovery: transaction timeout";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// Maximum rows of each kind handled per scan
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions unlocked and failed
    pub recovered: usize,
    /// Sagas closed because their transaction was already terminal
    pub orphans_closed: usize,
    /// Left for the next tick (unlock failed or lost a CAS)
    pub deferred: usize,
}

pub struct RecoveryWorker {
    store: Arc<dyn TransactionStore>,
    accounts: Arc<dyn AccountService>,
    publisher: Arc<dyn EventPublisher>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        accounts: Arc<dyn AccountService>,
        publisher: Arc<dyn EventPublisher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            accounts,
            publisher,
            config,
        }
    }

    /// Scan on every tick until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting recovery worker"
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Recovery worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_and_recover().await {
                        error!(error = %e, "Recovery scan failed");
                    }
                }
            }
        }
    }

    /// Run a single scan and recovery cycle
    pub async fn scan_and_recover(&self) -> Result<RecoveryReport, TransactionError> {
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        let stuck = self
            .store
            .find_stuck_transactions(now, self.config.batch_size)
            .await?;
        if !stuck.is_empty() {
            info!(count = stuck.len(), "Found stuck transactions to recover");
        }

        for tx in stuck {
            let id = tx.id;
            match self.recover_transaction(tx).await {
                Ok(true) => report.recovered += 1,
                Ok(false) => report.deferred += 1,
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, "Recovery attempt failed, will retry next tick");
                    report.deferred += 1;
                }
            }
        }

        let orphans = self
            .store
            .find_orphan_sagas(now, self.config.batch_size)
            .await?;
        for mut saga in orphans {
            match self.close_saga(&mut saga).await {
                Ok(()) => report.orphans_closed += 1,
                Err(TransactionError::ConcurrentModification) => {
                    debug!(transaction_id = %saga.transaction_id, "Orphan saga moved under us");
                    report.deferred += 1;
                }
                Err(e) => {
                    warn!(transaction_id = %saga.transaction_id, error = %e, "Could not close orphan saga");
                    report.deferred += 1;
                }
            }
        }

        if report.recovered > 0 || report.orphans_closed > 0 {
            metrics::record_reconciled((report.recovered + report.orphans_closed) as u64);
            info!(
                recovered = report.recovered,
                orphans_closed = report.orphans_closed,
                deferred = report.deferred,
                "Recovery scan complete"
            );
        } else {
            debug!(deferred = report.deferred, "Recovery scan found nothing to close");
        }

        Ok(report)
    }

    /// Claim, unlock and fail one stuck transaction.
    ///
    /// `Ok(false)` means it stays for the next tick.
    async fn recover_transaction(&self, mut tx: Transaction) -> Result<bool, TransactionError> {
        debug!(
            transaction_id = %tx.id,
            status = %tx.status,
            timeout_at = %tx.timeout_at,
            "Recovering transaction"
        );

        // Claim first so a still-running orchestrator loses its next CAS
        if tx.status != TransactionStatus::Recovering {
            tx.status = TransactionStatus::Recovering;
            match self.store.update_transaction(&mut tx).await {
                Ok(()) => {}
                Err(TransactionError::ConcurrentModification) => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        let system = RequestMetadata::system();
        if let Err(e) = self.accounts.unlock_accounts(tx.id, &system).await {
            warn!(transaction_id = %tx.id, error = %e, "Recovery unlock failed");
            return Ok(false);
        }

        tx.status = TransactionStatus::Failed;
        tx.error_reason = Some(RECOVERY_REASON.to_string());
        let event = Event::for_transaction(EventType::TransactionFailed, &tx, &system.requester);
        match self.store.finalize_transaction(&mut tx, &event).await {
            Ok(()) => {}
            Err(TransactionError::ConcurrentModification) => return Ok(false),
            Err(e) => return Err(e),
        }

        if let Some(mut saga) = self.store.get_saga(tx.id).await?
            && !saga.current_state.is_terminal()
            && let Err(e) = self.close_saga(&mut saga).await
        {
            // Picked up as an orphan on a later tick
            debug!(transaction_id = %tx.id, error = %e, "Saga not closed with its transaction");
        }

        events::relay(self.store.as_ref(), self.publisher.as_ref(), &event).await;
        info!(transaction_id = %tx.id, "Transaction failed by recovery");
        Ok(true)
    }

    async fn close_saga(&self, saga: &mut TransactionSaga) -> Result<(), TransactionError> {
        saga.fail(SagaState::Failed);
        if saga.compensation_reason.is_none() {
            saga.compensation_reason = Some(RECOVERY_REASON.to_string());
        }
        self.store.update_saga(saga).await
    }
}
