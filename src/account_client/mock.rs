//! In-memory Account Service for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{AccountBalance, AccountClientError, AccountDetails, AccountService, BalanceUpdate};
use crate::rpc::types::RequestMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Validate,
    Lock,
    Unlock,
    Update,
}

pub struct MockAccountService {
    accounts: Mutex<HashMap<String, AccountDetails>>,
    /// account id -> owning transaction
    locks: Mutex<HashMap<String, Uuid>>,
    /// Queued failures, consumed one per call
    failures: Mutex<HashMap<MockOp, VecDeque<AccountClientError>>>,
    update_log: Mutex<Vec<(Uuid, Vec<BalanceUpdate>)>>,
    unlock_log: Mutex<Vec<(Uuid, String)>>,
    validate_count: AtomicUsize,
    lock_count: AtomicUsize,
    unlock_count: AtomicUsize,
    update_count: AtomicUsize,
    healthy: AtomicBool,
}

impl MockAccountService {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            update_log: Mutex::new(Vec::new()),
            unlock_log: Mutex::new(Vec::new()),
            validate_count: AtomicUsize::new(0),
            lock_count: AtomicUsize::new(0),
            unlock_count: AtomicUsize::new(0),
            update_count: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_account(self, account_id: &str, customer_id: &str, balance: i64) -> Self {
        self.accounts.lock().unwrap().insert(
            account_id.to_string(),
            AccountDetails {
                account_id: account_id.to_string(),
                customer_id: customer_id.to_string(),
                balance: Decimal::from(balance),
                version: 1,
            },
        );
        self
    }

    pub fn account(&self, account_id: &str) -> Option<AccountDetails> {
        self.accounts.lock().unwrap().get(account_id).cloned()
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: MockOp, err: AccountClientError) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_locked(&self, account_id: &str) -> bool {
        self.locks.lock().unwrap().contains_key(account_id)
    }

    pub fn lock_owner(&self, account_id: &str) -> Option<Uuid> {
        self.locks.lock().unwrap().get(account_id).copied()
    }

    pub fn validate_count(&self) -> usize {
        self.validate_count.load(Ordering::SeqCst)
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::SeqCst)
    }

    pub fn unlock_count(&self) -> usize {
        self.unlock_count.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<(Uuid, Vec<BalanceUpdate>)> {
        self.update_log.lock().unwrap().clone()
    }

    /// (transaction id, requester) of every unlock call
    pub fn unlocks(&self) -> Vec<(Uuid, String)> {
        self.unlock_log.lock().unwrap().clone()
    }

    fn take_failure(&self, op: MockOp) -> Result<(), AccountClientError> {
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(|q| q.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn gate(&self) -> Result<(), AccountClientError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AccountClientError::ConnectionFailed(
                "account service channel is not ready".into(),
            ))
        }
    }
}

impl Default for MockAccountService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountService for MockAccountService {
    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn validate_and_get_accounts(
        &self,
        account_ids: &[String],
        _meta: &RequestMetadata,
    ) -> Result<Vec<AccountDetails>, AccountClientError> {
        self.validate_count.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.take_failure(MockOp::Validate)?;

        let accounts = self.accounts.lock().unwrap();
        Ok(account_ids
            .iter()
            .filter_map(|id| accounts.get(id).cloned())
            .collect())
    }

    async fn lock_accounts(
        &self,
        account_ids: &[String],
        transaction_id: Uuid,
        _meta: &RequestMetadata,
    ) -> Result<(), AccountClientError> {
        self.lock_count.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.take_failure(MockOp::Lock)?;

        let mut locks = self.locks.lock().unwrap();
        for id in account_ids {
            if let Some(owner) = locks.get(id)
                && *owner != transaction_id
            {
                return Err(AccountClientError::Rejected {
                    message: format!("account {id} is locked by another transaction"),
                });
            }
        }
        for id in account_ids {
            locks.insert(id.clone(), transaction_id);
        }
        Ok(())
    }

    async fn unlock_accounts(
        &self,
        transaction_id: Uuid,
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError> {
        self.unlock_count.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.take_failure(MockOp::Unlock)?;

        self.unlock_log
            .lock()
            .unwrap()
            .push((transaction_id, meta.requester.clone()));
        self.locks
            .lock()
            .unwrap()
            .retain(|_, owner| *owner != transaction_id);
        Ok(())
    }

    async fn update_accounts_balance(
        &self,
        transaction_id: Uuid,
        updates: &[BalanceUpdate],
        _meta: &RequestMetadata,
    ) -> Result<(), AccountClientError> {
        self.update_count.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.take_failure(MockOp::Update)?;

        let mut accounts = self.accounts.lock().unwrap();
        for update in updates {
            match accounts.get(&update.account_id) {
                Some(current) if current.version == update.version => {}
                Some(_) => {
                    return Err(AccountClientError::Rejected {
                        message: format!("version mismatch for {}", update.account_id),
                    });
                }
                None => {
                    return Err(AccountClientError::Rejected {
                        message: format!("account {} not found", update.account_id),
                    });
                }
            }
        }
        for update in updates {
            if let Some(account) = accounts.get_mut(&update.account_id) {
                account.balance = update.balance;
                account.version += 1;
            }
        }
        self.update_log
            .lock()
            .unwrap()
            .push((transaction_id, updates.to_vec()));
        Ok(())
    }

    async fn get_balance(
        &self,
        account_id: &str,
        _meta: &RequestMetadata,
    ) -> Result<AccountBalance, AccountClientError> {
        self.gate()?;
        self.accounts
            .lock()
            .unwrap()
            .get(account_id)
            .map(|a| AccountBalance {
                account_id: a.account_id.clone(),
                balance: a.balance,
                version: a.version,
            })
            .ok_or_else(|| AccountClientError::Rejected {
                message: format!("account {account_id} not found"),
            })
    }
}
