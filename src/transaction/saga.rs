//! Persisted saga record

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::state::{SagaState, SagaStep};
use super::types::{Transaction, TransactionType};

pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Saga row, 1:1 with a transaction.
///
/// Carries its own snapshot of the transaction inputs so recovery never has
/// to join back to `transactions` to know what to undo.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSaga {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub current_state: SagaState,
    pub current_step: Option<SagaStep>,
    pub successful_steps: Vec<SagaStep>,
    pub source_account_id: String,
    pub destination_account_id: Option<String>,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub reference_id: String,
    pub compensation_required: bool,
    pub compensation_reason: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub timeout_at: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionSaga {
    pub fn for_transaction(tx: &Transaction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id: tx.id,
            current_state: SagaState::Initiated,
            current_step: None,
            successful_steps: Vec::new(),
            source_account_id: tx.source_account_id.clone(),
            destination_account_id: tx.destination_account_id.clone(),
            amount: tx.amount,
            transaction_type: tx.transaction_type,
            reference_id: tx.reference_id.clone(),
            compensation_required: false,
            compensation_reason: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_retry_at: None,
            next_retry_at: None,
            timeout_at: tx.timeout_at,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn has_succeeded(&self, step: SagaStep) -> bool {
        self.successful_steps.contains(&step)
    }

    /// Enter `step` in `state`
    pub fn begin(&mut self, step: SagaStep, state: SagaState) {
        self.current_step = Some(step);
        self.current_state = state;
    }

    /// Record `step` as done and move to `state`
    pub fn succeed(&mut self, step: SagaStep, state: SagaState) {
        if !self.has_succeeded(step) {
            self.successful_steps.push(step);
        }
        self.current_step = Some(step);
        self.current_state = state;
    }

    pub fn fail(&mut self, state: SagaState) {
        self.current_state = state;
    }

    pub fn require_compensation(&mut self, reason: &str) {
        self.compensation_required = true;
        self.compensation_reason = Some(reason.to_string());
    }

    /// Stamp a forward retry; `attempt` is 1-based
    pub fn record_retry(&mut self, attempt: u32, backoff: std::time::Duration) {
        let now = Utc::now();
        self.retry_count += 1;
        self.last_retry_at = Some(now);
        self.next_retry_at = chrono::Duration::from_std(backoff * attempt)
            .ok()
            .map(|d| now + d);
    }

    #[inline]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at < now
    }

    /// Whether recorded steps follow the forward order with no gaps.
    pub fn steps_form_forward_prefix(&self) -> bool {
        self.successful_steps.len() <= SagaStep::FORWARD.len()
            && self
                .successful_steps
                .iter()
                .zip(SagaStep::FORWARD.iter())
                .all(|(a, b)| a == b)
    }

    /// Step labels as stored in the `TEXT[]` column
    pub fn step_labels(&self) -> Vec<String> {
        self.successful_steps
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::RequestMetadata;
    use crate::transaction::types::TransactionRequest;

    fn saga() -> TransactionSaga {
        let req = TransactionRequest {
            source_account_id: "acc-A".into(),
            destination_account_id: Some("acc-B".into()),
            amount: Decimal::from(100),
            transaction_type: "transfer".into(),
            reference_id: "r1".into(),
            metadata: RequestMetadata::new("u1", "req-1"),
        }
        .validate()
        .unwrap();
        TransactionSaga::for_transaction(&Transaction::new(&req, chrono::Duration::minutes(5)))
    }

    #[test]
    fn test_snapshot_copies_inputs() {
        let s = saga();
        assert_eq!(s.current_state, SagaState::Initiated);
        assert_eq!(s.source_account_id, "acc-A");
        assert_eq!(s.destination_account_id.as_deref(), Some("acc-B"));
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.version, 1);
    }

    #[test]
    fn test_succeed_is_idempotent() {
        let mut s = saga();
        s.succeed(SagaStep::Validate, SagaState::Validated);
        s.succeed(SagaStep::Validate, SagaState::Validated);
        assert_eq!(s.successful_steps, vec![SagaStep::Validate]);
        assert!(s.has_succeeded(SagaStep::Validate));
        assert!(!s.has_succeeded(SagaStep::Lock));
    }

    #[test]
    fn test_forward_prefix() {
        let mut s = saga();
        assert!(s.steps_form_forward_prefix());

        s.successful_steps = vec![SagaStep::Validate, SagaStep::Lock];
        assert!(s.steps_form_forward_prefix());

        s.successful_steps = vec![SagaStep::Validate, SagaStep::Process];
        assert!(!s.steps_form_forward_prefix());
    }

    #[test]
    fn test_record_retry() {
        let mut s = saga();
        s.record_retry(2, std::time::Duration::from_secs(1));
        assert_eq!(s.retry_count, 1);
        let last = s.last_retry_at.unwrap();
        let next = s.next_retry_at.unwrap();
        assert_eq!((next - last).num_seconds(), 2);
    }

    #[test]
    fn test_timeout() {
        let s = saga();
        assert!(!s.is_timed_out(Utc::now()));
        assert!(s.is_timed_out(Utc::now() + chrono::Duration::minutes(6)));
    }
}
