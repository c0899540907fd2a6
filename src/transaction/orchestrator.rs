//! Transaction Saga Orchestrator
//!
//! Drives one transaction through Validate -> Lock -> Process -> Complete,
//! retrying the forward sequence on transient failure and running the single
//! compensating step (unlock + mark failed) on anything else.
//!
//! There is no in-process lock per saga. Every write is a version CAS, so the
//! reconciliation loop can race this code safely; whoever loses re-reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::balance;
use super::error::TransactionError;
use super::events::{self, Event, EventType};
use super::saga::TransactionSaga;
use super::state::{SagaState, SagaStep};
use super::store::TransactionStore;
use super::types::{Transaction, TransactionRequest, TransactionStatus};
use crate::account_client::{AccountDetails, AccountService};
use crate::metrics;
use crate::publisher::EventPublisher;
use crate::rpc::types::RequestMetadata;

/// Re-read/re-apply rounds before a CAS conflict is surfaced
const CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Forward-sequence retries after the first attempt
    pub max_retries: u32,
    /// Linear back-off unit: retry `i` waits `i * retry_backoff`
    pub retry_backoff: Duration,
    /// Wall-clock budget from creation until reconciliation takes over
    pub transaction_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            transaction_timeout: Duration::from_secs(300),
        }
    }
}

/// What the caller of `InitTransaction` gets back
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub transaction: Transaction,
    pub failure: Option<TransactionError>,
    /// The reference id was already known; nothing new was run
    pub duplicate: bool,
}

impl TransactionOutcome {
    fn new(transaction: Transaction, failure: Option<TransactionError>) -> Self {
        Self {
            transaction,
            failure,
            duplicate: false,
        }
    }

    /// Outcome reflecting an already persisted transaction
    fn from_persisted(transaction: Transaction, fallback: Option<TransactionError>) -> Self {
        let failure = match transaction.status {
            TransactionStatus::Failed => Some(TransactionError::TransactionFailed(
                transaction
                    .error_reason
                    .clone()
                    .unwrap_or_else(|| "transaction failed".to_string()),
            )),
            TransactionStatus::Completed | TransactionStatus::Successful => None,
            TransactionStatus::Pending | TransactionStatus::Recovering => fallback,
        };
        Self::new(transaction, failure)
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn message(&self) -> String {
        if let Some(err) = &self.failure {
            return err.user_message();
        }
        if self.duplicate {
            return format!(
                "Transaction with this reference already exists ({})",
                self.transaction.status
            );
        }
        match self.transaction.status {
            TransactionStatus::Completed => "Transaction completed successfully".to_string(),
            TransactionStatus::Successful => {
                "Transaction applied, account unlock pending".to_string()
            }
            TransactionStatus::Pending | TransactionStatus::Recovering => {
                "Transaction is being processed".to_string()
            }
            TransactionStatus::Failed => "Transaction failed".to_string(),
        }
    }

    fn metric_label(&self) -> &'static str {
        match (&self.failure, self.transaction.status) {
            (Some(_), _) | (None, TransactionStatus::Failed) => "failed",
            (None, TransactionStatus::Completed) => "completed",
            (None, TransactionStatus::Successful) => "successful",
            (None, _) => "pending",
        }
    }
}

/// Balances read by Validate and consumed by Process
#[derive(Default)]
struct SagaContext {
    accounts: HashMap<String, AccountDetails>,
}

pub struct TransactionOrchestrator {
    store: Arc<dyn TransactionStore>,
    accounts: Arc<dyn AccountService>,
    publisher: Arc<dyn EventPublisher>,
    config: OrchestratorConfig,
}

impl TransactionOrchestrator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        accounts: Arc<dyn AccountService>,
        publisher: Arc<dyn EventPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            accounts,
            publisher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Validate, persist and run a new transaction.
    ///
    /// `Err` means the request was rejected before anything was persisted.
    /// Failures after persistence come back as an outcome with `failure` set.
    pub async fn init_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionOutcome, TransactionError> {
        let req = request.validate()?;

        if let Some(existing) = self.store.get_by_reference(&req.reference_id).await? {
            info!(
                transaction_id = %existing.id,
                reference_id = %req.reference_id,
                "Transaction with reference already exists - returning existing record (idempotent)"
            );
            return Ok(self.duplicate_outcome(existing));
        }

        let timeout = chrono::Duration::from_std(self.config.transaction_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let tx = Transaction::new(&req, timeout);
        let mut saga = TransactionSaga::for_transaction(&tx);
        saga.max_retries = self.config.max_retries as i32;

        if !self.store.create_with_saga(&tx, &saga).await? {
            let existing = self
                .store
                .get_by_reference(&req.reference_id)
                .await?
                .ok_or_else(|| TransactionError::TransactionNotFound(req.reference_id.clone()))?;
            return Ok(self.duplicate_outcome(existing));
        }

        info!(
            transaction_id = %tx.id,
            saga_id = %saga.id,
            transaction_type = %tx.transaction_type,
            amount = %tx.amount,
            "Transaction created"
        );

        let span = info_span!(
            "saga",
            transaction_id = %tx.id,
            request_id = %req.metadata.request_id
        );
        let outcome = self
            .run_saga(tx, saga, &req.metadata)
            .instrument(span)
            .await;

        metrics::record_transaction(
            outcome.transaction.transaction_type.as_str(),
            outcome.metric_label(),
        );
        Ok(outcome)
    }

    fn duplicate_outcome(&self, existing: Transaction) -> TransactionOutcome {
        let mut outcome = TransactionOutcome::from_persisted(existing, None);
        outcome.duplicate = true;
        outcome
    }

    async fn run_saga(
        &self,
        mut tx: Transaction,
        mut saga: TransactionSaga,
        meta: &RequestMetadata,
    ) -> TransactionOutcome {
        let mut ctx = SagaContext::default();
        let max_retries = saga.max_retries.max(0) as u32;
        let mut attempt: u32 = 0;

        loop {
            let err = match self.run_forward(&mut tx, &mut saga, &mut ctx, meta).await {
                Ok(()) => {
                    info!(status = %tx.status, "Transaction completed");
                    return TransactionOutcome::new(tx, None);
                }
                Err(e) => e,
            };

            if matches!(err, TransactionError::ConcurrentModification) {
                warn!("Saga was taken over by another writer, reporting persisted state");
                return self.persisted_outcome(tx, err).await;
            }

            let timed_out = matches!(err, TransactionError::DeadlineExceeded)
                || saga.is_timed_out(Utc::now());
            if err.is_retryable() && attempt < max_retries && !timed_out {
                attempt += 1;
                warn!(
                    attempt,
                    max_retries,
                    state = %saga.current_state,
                    error = %err,
                    "Transient saga failure, retrying"
                );
                if let Err(e) = self.record_retry(&mut tx, &mut saga, attempt).await {
                    return self.persisted_outcome(tx, e).await;
                }
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
                continue;
            }

            if saga.has_succeeded(SagaStep::Process) {
                // Balances are applied; only the unlock is outstanding
                warn!(
                    error = %err,
                    "Unlock failed after balances were applied, leaving it to reconciliation"
                );
                return TransactionOutcome::new(tx, None);
            }

            if timed_out {
                warn!(error = %err, "Saga deadline passed, leaving it to reconciliation");
                return TransactionOutcome::new(tx, Some(err));
            }

            return self.compensate(tx, saga, err, meta).await;
        }
    }

    async fn run_forward(
        &self,
        tx: &mut Transaction,
        saga: &mut TransactionSaga,
        ctx: &mut SagaContext,
        meta: &RequestMetadata,
    ) -> Result<(), TransactionError> {
        check_deadline(saga)?;
        self.validate_step(tx, saga, ctx, meta).await?;
        check_deadline(saga)?;
        self.lock_step(tx, saga, meta).await?;
        check_deadline(saga)?;
        self.process_step(tx, saga, ctx, meta).await?;
        check_deadline(saga)?;
        self.complete_step(tx, saga, meta).await
    }

    // ========================================================================
    // Forward steps
    // ========================================================================

    async fn validate_step(
        &self,
        tx: &mut Transaction,
        saga: &mut TransactionSaga,
        ctx: &mut SagaContext,
        meta: &RequestMetadata,
    ) -> Result<(), TransactionError> {
        if saga.has_succeeded(SagaStep::Validate) {
            return Ok(());
        }
        self.save_saga(saga, |s| s.begin(SagaStep::Validate, SagaState::Validating))
            .await?;

        let ids = tx.account_ids();
        let accounts = match self.accounts.validate_and_get_accounts(&ids, meta).await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.save_saga(saga, |s| s.fail(SagaState::ValidationFailed))
                    .await?;
                return Err(TransactionError::AccountValidationFailed(e));
            }
        };

        let by_id: HashMap<String, AccountDetails> = accounts
            .into_iter()
            .map(|a| (a.account_id.clone(), a))
            .collect();
        if let Some(missing) = ids.iter().find(|id| !by_id.contains_key(*id)) {
            self.save_saga(saga, |s| s.fail(SagaState::ValidationFailed))
                .await?;
            return Err(TransactionError::AccountDetailsMissing(missing.clone()));
        }

        let source_customer = by_id
            .get(&tx.source_account_id)
            .map(|a| a.customer_id.clone());
        let destination_customer = tx
            .destination_account_id
            .as_ref()
            .and_then(|d| by_id.get(d))
            .map(|a| a.customer_id.clone());
        self.save_transaction(tx, |t| {
            t.source_customer_id = source_customer.clone();
            t.destination_customer_id = destination_customer.clone();
        })
        .await?;

        ctx.accounts = by_id;
        self.save_saga(saga, |s| s.succeed(SagaStep::Validate, SagaState::Validated))
            .await?;
        debug!("Accounts validated");
        Ok(())
    }

    async fn lock_step(
        &self,
        tx: &Transaction,
        saga: &mut TransactionSaga,
        meta: &RequestMetadata,
    ) -> Result<(), TransactionError> {
        if saga.has_succeeded(SagaStep::Lock) {
            return Ok(());
        }
        self.save_saga(saga, |s| s.begin(SagaStep::Lock, SagaState::Locking))
            .await?;

        if let Err(e) = self
            .accounts
            .lock_accounts(&tx.account_ids(), tx.id, meta)
            .await
        {
            self.save_saga(saga, |s| s.fail(SagaState::LockFailed)).await?;
            return Err(TransactionError::AccountLockingFailed(e));
        }

        self.save_saga(saga, |s| s.succeed(SagaStep::Lock, SagaState::Locked))
            .await?;
        debug!("Accounts locked");
        Ok(())
    }

    async fn process_step(
        &self,
        tx: &mut Transaction,
        saga: &mut TransactionSaga,
        ctx: &mut SagaContext,
        meta: &RequestMetadata,
    ) -> Result<(), TransactionError> {
        if saga.has_succeeded(SagaStep::Process) {
            return Ok(());
        }
        self.save_saga(saga, |s| s.begin(SagaStep::Process, SagaState::Processing))
            .await?;

        if ctx.accounts.is_empty() {
            let accounts = self
                .accounts
                .validate_and_get_accounts(&tx.account_ids(), meta)
                .await
                .map_err(TransactionError::AccountValidationFailed)?;
            ctx.accounts = accounts
                .into_iter()
                .map(|a| (a.account_id.clone(), a))
                .collect();
        }

        let source = ctx
            .accounts
            .get(&tx.source_account_id)
            .ok_or_else(|| TransactionError::AccountDetailsMissing(tx.source_account_id.clone()))?;
        let destination = match &tx.destination_account_id {
            Some(id) => Some(
                ctx.accounts
                    .get(id)
                    .ok_or_else(|| TransactionError::AccountDetailsMissing(id.clone()))?,
            ),
            None => None,
        };

        let updates =
            balance::compute_updates(tx.transaction_type, tx.amount, source, destination)?;

        // Balances cannot be taken back by recovery, so re-check ownership
        let current = self.reload_transaction(tx.id).await?;
        if current.status.is_claimed_or_terminal() {
            *tx = current;
            return Err(TransactionError::ConcurrentModification);
        }

        self.accounts
            .update_accounts_balance(tx.id, &updates, meta)
            .await
            .map_err(TransactionError::AccountService)?;

        self.save_transaction(tx, |t| t.status = TransactionStatus::Successful)
            .await
            .map_err(|e| match e {
                TransactionError::ConcurrentModification => e,
                other => TransactionError::TransactionStatusUpdateFailed(other.to_string()),
            })?;
        self.save_saga(saga, |s| s.succeed(SagaStep::Process, SagaState::Processing))
            .await?;
        debug!(updates = updates.len(), "Balances applied");
        Ok(())
    }

    async fn complete_step(
        &self,
        tx: &mut Transaction,
        saga: &mut TransactionSaga,
        meta: &RequestMetadata,
    ) -> Result<(), TransactionError> {
        if saga.has_succeeded(SagaStep::Complete) {
            return Ok(());
        }
        self.save_saga(saga, |s| s.begin(SagaStep::Complete, SagaState::Processing))
            .await?;

        self.accounts
            .unlock_accounts(tx.id, meta)
            .await
            .map_err(TransactionError::AccountUnlockingFailed)?;

        let event = self
            .finalize(
                tx,
                |t| t.status = TransactionStatus::Completed,
                EventType::TransactionCompleted,
                &meta.requester,
            )
            .await?;
        self.save_saga(saga, |s| s.succeed(SagaStep::Complete, SagaState::Completed))
            .await?;

        events::relay(self.store.as_ref(), self.publisher.as_ref(), &event).await;
        Ok(())
    }

    // ========================================================================
    // Compensation
    // ========================================================================

    async fn compensate(
        &self,
        mut tx: Transaction,
        mut saga: TransactionSaga,
        cause: TransactionError,
        meta: &RequestMetadata,
    ) -> TransactionOutcome {
        let reason = cause.to_string();
        warn!(
            state = %saga.current_state,
            code = cause.code(),
            error = %reason,
            "Running compensation"
        );

        if let Err(e) = self
            .save_saga(&mut saga, |s| {
                s.require_compensation(&reason);
                s.begin(SagaStep::Compensate, SagaState::Compensating);
            })
            .await
        {
            return self.persisted_outcome(tx, e).await;
        }

        if let Err(e) = self.accounts.unlock_accounts(tx.id, meta).await {
            error!(error = %e, "Compensating unlock failed, leaving saga for reconciliation");
            if let Err(e) = self
                .save_saga(&mut saga, |s| s.fail(SagaState::CompensateFailed))
                .await
            {
                warn!(error = %e, "Could not record compensate_failed");
            }
            return TransactionOutcome::new(tx, Some(cause));
        }

        let error_reason = format!("compensated: {reason}");
        let finalized = self
            .finalize(
                &mut tx,
                |t| {
                    t.status = TransactionStatus::Failed;
                    t.error_reason = Some(error_reason.clone());
                },
                EventType::TransactionFailed,
                &meta.requester,
            )
            .await;

        match finalized {
            Ok(event) => {
                if let Err(e) = self
                    .save_saga(&mut saga, |s| {
                        s.succeed(SagaStep::Compensate, SagaState::Compensated)
                    })
                    .await
                {
                    warn!(error = %e, "Could not record compensated saga state");
                }
                events::relay(self.store.as_ref(), self.publisher.as_ref(), &event).await;
                info!(error_reason = %error_reason, "Transaction compensated");
            }
            Err(TransactionError::ConcurrentModification) => {
                return self
                    .persisted_outcome(tx, TransactionError::ConcurrentModification)
                    .await;
            }
            Err(e) => {
                let e = TransactionError::FailedToMarkTransactionAsFailed(e.to_string());
                error!(error = %e, "Compensation could not persist failure");
            }
        }

        TransactionOutcome::new(tx, Some(cause))
    }

    // ========================================================================
    // CAS helpers
    // ========================================================================

    /// Apply `change` and write the saga. On a version conflict, re-read and
    /// re-apply unless the stored saga has become terminal.
    async fn save_saga<F>(&self, saga: &mut TransactionSaga, change: F) -> Result<(), TransactionError>
    where
        F: Fn(&mut TransactionSaga),
    {
        let mut next = saga.clone();
        change(&mut next);

        for _ in 0..CAS_ATTEMPTS {
            match self.store.update_saga(&mut next).await {
                Ok(()) => {
                    *saga = next;
                    return Ok(());
                }
                Err(TransactionError::ConcurrentModification) => {
                    let current = self.reload_saga(saga.transaction_id).await?;
                    if current.current_state.is_terminal() {
                        *saga = current;
                        return Err(TransactionError::ConcurrentModification);
                    }
                    debug!(version = current.version, "Saga version moved, re-applying change");
                    *saga = current;
                    next = saga.clone();
                    change(&mut next);
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransactionError::ConcurrentModification)
    }

    async fn save_transaction<F>(&self, tx: &mut Transaction, change: F) -> Result<(), TransactionError>
    where
        F: Fn(&mut Transaction),
    {
        let mut next = tx.clone();
        change(&mut next);

        for _ in 0..CAS_ATTEMPTS {
            match self.store.update_transaction(&mut next).await {
                Ok(()) => {
                    *tx = next;
                    return Ok(());
                }
                Err(TransactionError::ConcurrentModification) => {
                    let current = self.reload_transaction(tx.id).await?;
                    if current.status.is_claimed_or_terminal() {
                        *tx = current;
                        return Err(TransactionError::ConcurrentModification);
                    }
                    *tx = current;
                    next = tx.clone();
                    change(&mut next);
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransactionError::ConcurrentModification)
    }

    /// Terminal status change plus its outbox event, written together
    async fn finalize<F>(
        &self,
        tx: &mut Transaction,
        change: F,
        event_type: EventType,
        created_by: &str,
    ) -> Result<Event, TransactionError>
    where
        F: Fn(&mut Transaction),
    {
        let mut next = tx.clone();
        change(&mut next);

        for _ in 0..CAS_ATTEMPTS {
            let event = Event::for_transaction(event_type, &next, created_by);
            match self.store.finalize_transaction(&mut next, &event).await {
                Ok(()) => {
                    *tx = next;
                    return Ok(event);
                }
                Err(TransactionError::ConcurrentModification) => {
                    let current = self.reload_transaction(tx.id).await?;
                    if current.status.is_claimed_or_terminal() {
                        *tx = current;
                        return Err(TransactionError::ConcurrentModification);
                    }
                    *tx = current;
                    next = tx.clone();
                    change(&mut next);
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransactionError::ConcurrentModification)
    }

    async fn record_retry(
        &self,
        tx: &mut Transaction,
        saga: &mut TransactionSaga,
        attempt: u32,
    ) -> Result<(), TransactionError> {
        metrics::record_saga_retry();
        let backoff = self.config.retry_backoff;
        self.save_saga(saga, |s| s.record_retry(attempt, backoff)).await?;
        self.save_transaction(tx, |t| {
            t.retry_count += 1;
            t.last_retry_at = Some(Utc::now());
        })
        .await
    }

    async fn reload_saga(&self, transaction_id: Uuid) -> Result<TransactionSaga, TransactionError> {
        self.store
            .get_saga(transaction_id)
            .await?
            .ok_or_else(|| TransactionError::TransactionNotFound(transaction_id.to_string()))
    }

    async fn reload_transaction(&self, id: Uuid) -> Result<Transaction, TransactionError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| TransactionError::TransactionNotFound(id.to_string()))
    }

    /// Outcome from whatever is stored now; falls back to `tx` if the read fails
    async fn persisted_outcome(&self, tx: Transaction, cause: TransactionError) -> TransactionOutcome {
        match self.reload_transaction(tx.id).await {
            Ok(current) => TransactionOutcome::from_persisted(current, Some(cause)),
            Err(e) => {
                warn!(error = %e, "Could not re-read transaction");
                TransactionOutcome::new(tx, Some(cause))
            }
        }
    }
}

/// Past `timeout_at` the transaction belongs to reconciliation
fn check_deadline(saga: &TransactionSaga) -> Result<(), TransactionError> {
    if saga.is_timed_out(Utc::now()) {
        return Err(TransactionError::DeadlineExceeded);
    }
    Ok(())
}
