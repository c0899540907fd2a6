//! Account Service client
//!
//! The transaction service never stores balances; it reads and mutates them
//! through this seam.

mod client;
mod error;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use client::{AccountClient, ChannelState};
pub use error::{AccountClientError, is_transient_message};
pub use types::{AccountBalance, AccountDetails, BalanceUpdate};

use async_trait::async_trait;
use uuid::Uuid;

use crate::rpc::types::RequestMetadata;

/// Remote account operations used by the saga.
///
/// Locks are keyed by transaction id on the remote side, so `lock_accounts`
/// and `unlock_accounts` MUST be idempotent for a given transaction.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Whether the underlying channel is ready for calls
    async fn is_healthy(&self) -> bool;

    /// Fetch current state of every requested account
    async fn validate_and_get_accounts(
        &self,
        account_ids: &[String],
        meta: &RequestMetadata,
    ) -> Result<Vec<AccountDetails>, AccountClientError>;

    async fn lock_accounts(
        &self,
        account_ids: &[String],
        transaction_id: Uuid,
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError>;

    /// Release every lock held by `transaction_id`; succeeds when none are held
    async fn unlock_accounts(
        &self,
        transaction_id: Uuid,
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError>;

    /// Apply new balances; the remote rejects the batch if any version drifted
    async fn update_accounts_balance(
        &self,
        transaction_id: Uuid,
        updates: &[BalanceUpdate],
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError>;

    async fn get_balance(
        &self,
        account_id: &str,
        meta: &RequestMetadata,
    ) -> Result<AccountBalance, AccountClientError>;
}
