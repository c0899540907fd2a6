//! Account Service wire types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rpc::types::{RequestMetadata, ResponseStatus};

/// Account state as returned by `ValidateAndGetAccounts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_id: String,
    pub customer_id: String,
    pub balance: Decimal,
    pub version: i64,
}

/// New balance for one account, guarded by the version it was read at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub account_id: String,
    pub balance: Decimal,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub balance: Decimal,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ValidateAndGetAccountsRequest<'a> {
    pub account_ids: &'a [String],
    pub metadata: &'a RequestMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidateAndGetAccountsResponse {
    #[serde(default)]
    pub accounts: Vec<AccountDetails>,
    pub response: ResponseStatus,
}

#[derive(Debug, Serialize)]
pub(crate) struct LockAccountsRequest<'a> {
    pub account_ids: &'a [String],
    pub transaction_id: String,
    pub metadata: &'a RequestMetadata,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnlockAccountsRequest<'a> {
    pub transaction_id: String,
    pub metadata: &'a RequestMetadata,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateAccountsBalanceRequest<'a> {
    pub transaction_id: String,
    pub updates: &'a [BalanceUpdate],
    pub metadata: &'a RequestMetadata,
}

#[derive(Debug, Serialize)]
pub(crate) struct GetBalanceRequest<'a> {
    pub account_id: &'a str,
    pub metadata: &'a RequestMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetBalanceResponse {
    #[serde(flatten)]
    pub balance: Option<AccountBalance>,
    pub response: ResponseStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AckResponse {
    pub response: ResponseStatus,
}

/// Anything carrying the standard result envelope
pub(crate) trait Enveloped {
    fn status(&self) -> &ResponseStatus;
}

impl Enveloped for ValidateAndGetAccountsResponse {
    fn status(&self) -> &ResponseStatus {
        &self.response
    }
}

impl Enveloped for GetBalanceResponse {
    fn status(&self) -> &ResponseStatus {
        &self.response
    }
}

impl Enveloped for AckResponse {
    fn status(&self) -> &ResponseStatus {
        &self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_response_decodes() {
        let json = r#"{
            "accounts": [
                {"account_id": "acc-A", "customer_id": "c-1", "balance": "500", "version": 1}
            ],
            "response": {"message": "ok", "success": true}
        }"#;
        let resp: ValidateAndGetAccountsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.accounts.len(), 1);
        assert_eq!(resp.accounts[0].balance, Decimal::from(500));
        assert!(resp.status().success);
    }

    #[test]
    fn test_balance_response_without_payload() {
        let json = r#"{"response": {"message": "account not found", "success": false}}"#;
        let resp: GetBalanceResponse = serde_json::from_str(json).unwrap();
        assert!(resp.balance.is_none());
        assert!(!resp.status().success);
    }

    #[test]
    fn test_lock_request_encodes_metadata() {
        let ids = vec!["acc-A".to_string()];
        let meta = RequestMetadata::new("u1", "req-1");
        let req = LockAccountsRequest {
            account_ids: &ids,
            transaction_id: "tx-1".into(),
            metadata: &meta,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["metadata"]["requester"], "u1");
        assert_eq!(json["transaction_id"], "tx-1");
    }
}
