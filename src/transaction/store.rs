//! Transaction persistence seam
//!
//! Every update is compare-and-set on `version`: it succeeds only when the
//! stored version equals the caller's, bumps it by exactly one, and otherwise
//! writes nothing and returns [`TransactionError::ConcurrentModification`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::TransactionError;
use super::events::Event;
use super::history::HistoryQuery;
use super::saga::TransactionSaga;
use super::types::Transaction;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a transaction and its saga together.
    ///
    /// Returns `false` without writing anything when `reference_id` is taken.
    async fn create_with_saga(
        &self,
        tx: &Transaction,
        saga: &TransactionSaga,
    ) -> Result<bool, TransactionError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, TransactionError>;

    async fn get_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, TransactionError>;

    async fn get_saga(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionSaga>, TransactionError>;

    /// CAS update; on success `saga.version` is the new stored version
    async fn update_saga(&self, saga: &mut TransactionSaga) -> Result<(), TransactionError>;

    /// CAS update; on success `tx.version` is the new stored version
    async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), TransactionError>;

    /// CAS update of a terminal status and insert of its event, atomically
    async fn finalize_transaction(
        &self,
        tx: &mut Transaction,
        event: &Event,
    ) -> Result<(), TransactionError>;

    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), TransactionError>;

    /// Pending, recovering or successful transactions whose deadline passed
    async fn find_stuck_transactions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, TransactionError>;

    /// Non-terminal sagas past their deadline whose transaction is terminal
    async fn find_orphan_sagas(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionSaga>, TransactionError>;

    /// One page of matching transactions plus the total match count
    async fn history(&self, query: &HistoryQuery)
    -> Result<(Vec<Transaction>, i64), TransactionError>;
}

#[cfg(test)]
pub mod memory {
    //! In-memory store honouring the same CAS contract as Postgres

    use super::*;
    use crate::transaction::history::SortOrder;
    use crate::transaction::types::TransactionStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        transactions: HashMap<Uuid, Transaction>,
        sagas: HashMap<Uuid, TransactionSaga>,
        events: Vec<Event>,
        status_log: Vec<(Uuid, TransactionStatus)>,
        saga_writes: usize,
    }

    #[derive(Default)]
    pub struct InMemoryTransactionStore {
        state: Mutex<State>,
    }

    impl InMemoryTransactionStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed rows directly, bypassing reference checks
        pub fn insert(&self, tx: Transaction, saga: TransactionSaga) {
            let mut state = self.state.lock().unwrap();
            state.status_log.push((tx.id, tx.status));
            state.sagas.insert(saga.transaction_id, saga);
            state.transactions.insert(tx.id, tx);
        }

        pub fn transaction(&self, id: Uuid) -> Option<Transaction> {
            self.state.lock().unwrap().transactions.get(&id).cloned()
        }

        pub fn saga(&self, transaction_id: Uuid) -> Option<TransactionSaga> {
            self.state.lock().unwrap().sagas.get(&transaction_id).cloned()
        }

        pub fn events(&self) -> Vec<Event> {
            self.state.lock().unwrap().events.clone()
        }

        pub fn events_for(&self, transaction_id: Uuid) -> Vec<Event> {
            let id = transaction_id.to_string();
            self.events()
                .into_iter()
                .filter(|e| e.aggregate_id == id)
                .collect()
        }

        /// Every status a transaction was written with, in order
        pub fn status_history(&self, transaction_id: Uuid) -> Vec<TransactionStatus> {
            self.state
                .lock()
                .unwrap()
                .status_log
                .iter()
                .filter(|(id, _)| *id == transaction_id)
                .map(|(_, s)| *s)
                .collect()
        }

        pub fn saga_writes(&self) -> usize {
            self.state.lock().unwrap().saga_writes
        }

        /// Mutate a stored saga out of band, bumping its version like a
        /// competing writer would
        pub fn tamper_saga(&self, transaction_id: Uuid, f: impl FnOnce(&mut TransactionSaga)) {
            let mut state = self.state.lock().unwrap();
            if let Some(saga) = state.sagas.get_mut(&transaction_id) {
                f(saga);
                saga.version += 1;
            }
        }

        pub fn tamper_transaction(&self, id: Uuid, f: impl FnOnce(&mut Transaction)) {
            let mut state = self.state.lock().unwrap();
            if let Some(tx) = state.transactions.get_mut(&id) {
                f(tx);
                tx.version += 1;
                let status = tx.status;
                state.status_log.push((id, status));
            }
        }

        fn matches(tx: &Transaction, q: &HistoryQuery) -> bool {
            if let Some(account) = &q.account_id
                && tx.source_account_id != *account
                && tx.destination_account_id.as_ref() != Some(account)
            {
                return false;
            }
            if let Some(customer) = &q.customer_id
                && tx.source_customer_id.as_ref() != Some(customer)
                && tx.destination_customer_id.as_ref() != Some(customer)
            {
                return false;
            }
            if !q.types.is_empty() && !q.types.contains(&tx.transaction_type) {
                return false;
            }
            if q.start_date.is_some_and(|s| tx.created_at < s) {
                return false;
            }
            if q.end_date.is_some_and(|e| tx.created_at > e) {
                return false;
            }
            true
        }
    }

    #[async_trait]
    impl TransactionStore for InMemoryTransactionStore {
        async fn create_with_saga(
            &self,
            tx: &Transaction,
            saga: &TransactionSaga,
        ) -> Result<bool, TransactionError> {
            let mut state = self.state.lock().unwrap();
            if state
                .transactions
                .values()
                .any(|t| t.reference_id == tx.reference_id)
            {
                return Ok(false);
            }
            state.status_log.push((tx.id, tx.status));
            state.transactions.insert(tx.id, tx.clone());
            state.sagas.insert(saga.transaction_id, saga.clone());
            Ok(true)
        }

        async fn get_transaction(
            &self,
            id: Uuid,
        ) -> Result<Option<Transaction>, TransactionError> {
            Ok(self.transaction(id))
        }

        async fn get_by_reference(
            &self,
            reference_id: &str,
        ) -> Result<Option<Transaction>, TransactionError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .transactions
                .values()
                .find(|t| t.reference_id == reference_id)
                .cloned())
        }

        async fn get_saga(
            &self,
            transaction_id: Uuid,
        ) -> Result<Option<TransactionSaga>, TransactionError> {
            Ok(self.saga(transaction_id))
        }

        async fn update_saga(&self, saga: &mut TransactionSaga) -> Result<(), TransactionError> {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .sagas
                .get_mut(&saga.transaction_id)
                .ok_or(TransactionError::ConcurrentModification)?;
            if stored.version != saga.version {
                return Err(TransactionError::ConcurrentModification);
            }
            saga.version += 1;
            saga.updated_at = Utc::now();
            *stored = saga.clone();
            state.saga_writes += 1;
            Ok(())
        }

        async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), TransactionError> {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .transactions
                .get_mut(&tx.id)
                .ok_or(TransactionError::ConcurrentModification)?;
            if stored.version != tx.version {
                return Err(TransactionError::ConcurrentModification);
            }
            tx.version += 1;
            tx.updated_at = Utc::now();
            *stored = tx.clone();
            state.status_log.push((tx.id, tx.status));
            Ok(())
        }

        async fn finalize_transaction(
            &self,
            tx: &mut Transaction,
            event: &Event,
        ) -> Result<(), TransactionError> {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .transactions
                .get_mut(&tx.id)
                .ok_or(TransactionError::ConcurrentModification)?;
            if stored.version != tx.version {
                return Err(TransactionError::ConcurrentModification);
            }
            tx.version += 1;
            tx.updated_at = Utc::now();
            *stored = tx.clone();
            state.status_log.push((tx.id, tx.status));
            state.events.push(event.clone());
            Ok(())
        }

        async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), TransactionError> {
            let mut state = self.state.lock().unwrap();
            if let Some(event) = state.events.iter_mut().find(|e| e.id == event_id) {
                event.processed = true;
            }
            Ok(())
        }

        async fn find_stuck_transactions(
            &self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Transaction>, TransactionError> {
            let state = self.state.lock().unwrap();
            let mut stuck: Vec<_> = state
                .transactions
                .values()
                .filter(|t| TransactionStatus::RECOVERABLE.contains(&t.status) && t.timeout_at < now)
                .cloned()
                .collect();
            stuck.sort_by_key(|t| t.timeout_at);
            stuck.truncate(limit.max(0) as usize);
            Ok(stuck)
        }

        async fn find_orphan_sagas(
            &self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<TransactionSaga>, TransactionError> {
            let state = self.state.lock().unwrap();
            let mut orphans: Vec<_> = state
                .sagas
                .values()
                .filter(|s| !s.current_state.is_terminal() && s.timeout_at < now)
                .filter(|s| {
                    state
                        .transactions
                        .get(&s.transaction_id)
                        .is_some_and(|t| t.status.is_terminal())
                })
                .cloned()
                .collect();
            orphans.sort_by_key(|s| s.timeout_at);
            orphans.truncate(limit.max(0) as usize);
            Ok(orphans)
        }

        async fn history(
            &self,
            query: &HistoryQuery,
        ) -> Result<(Vec<Transaction>, i64), TransactionError> {
            let state = self.state.lock().unwrap();
            let mut rows: Vec<_> = state
                .transactions
                .values()
                .filter(|t| Self::matches(t, query))
                .cloned()
                .collect();
            rows.sort_by(|a, b| match query.sort_order {
                SortOrder::Asc => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
                SortOrder::Desc => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
            });
            let total = rows.len() as i64;
            let page: Vec<_> = rows
                .into_iter()
                .skip(query.page.offset() as usize)
                .take(query.page.limit() as usize)
                .collect();
            Ok((page, total))
        }
    }
}
