//! Balance rules
//!
//! Pure functions: given the cached account state, compute the new balances
//! the Process step sends to the Account Service.

use rust_decimal::Decimal;

use super::error::TransactionError;
use super::types::TransactionType;
use crate::account_client::{AccountDetails, BalanceUpdate};

/// Compute new balances for `transaction_type`.
///
/// Each update carries the version the balance was read at, so the remote
/// rejects it if the account moved in between.
pub fn compute_updates(
    transaction_type: TransactionType,
    amount: Decimal,
    source: &AccountDetails,
    destination: Option<&AccountDetails>,
) -> Result<Vec<BalanceUpdate>, TransactionError> {
    let update = |account: &AccountDetails, balance: Decimal| BalanceUpdate {
        account_id: account.account_id.clone(),
        balance,
        version: account.version,
    };

    match transaction_type {
        TransactionType::Transfer => {
            let destination = destination.ok_or_else(|| {
                TransactionError::MissingAccountInfo("destination account".into())
            })?;
            if source.balance < amount {
                return Err(TransactionError::InsufficientBalance);
            }
            let credited = destination
                .balance
                .checked_add(amount)
                .ok_or(TransactionError::InvalidAmount)?;
            Ok(vec![
                update(source, source.balance - amount),
                update(destination, credited),
            ])
        }
        TransactionType::WithdrawFull => {
            if source.balance <= Decimal::ZERO {
                return Err(TransactionError::AccountEmpty);
            }
            Ok(vec![update(source, Decimal::ZERO)])
        }
        TransactionType::WithdrawAmount => {
            if source.balance < amount {
                return Err(TransactionError::InsufficientBalance);
            }
            Ok(vec![update(source, source.balance - amount)])
        }
        TransactionType::AddAmount => {
            let credited = source
                .balance
                .checked_add(amount)
                .ok_or(TransactionError::InvalidAmount)?;
            Ok(vec![update(source, credited)])
        }
    }
}
