//! Outbox events
//!
//! The row in `events` is the canonical record; the broker publish that
//! follows it is best-effort.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::TransactionStore;
use super::types::Transaction;
use crate::publisher::{Delivery, EventPublisher};

pub const AGGREGATE_TRANSACTION: &str = "transaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TransactionCompleted,
    TransactionFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransactionCompleted => "transaction_completed",
            EventType::TransactionFailed => "transaction_failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub data: serde_json::Value,
    pub processed: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Terminal event for `tx`, snapshotting its final state
    pub fn for_transaction(event_type: EventType, tx: &Transaction, created_by: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.as_str().to_string(),
            aggregate_id: tx.id.to_string(),
            aggregate_type: AGGREGATE_TRANSACTION.to_string(),
            data: json!({
                "transaction_id": tx.id,
                "reference_id": tx.reference_id,
                "type": tx.transaction_type.as_str(),
                "amount": tx.amount.to_string(),
                "source_account_id": tx.source_account_id,
                "destination_account_id": tx.destination_account_id,
                "source_customer_id": tx.source_customer_id,
                "destination_customer_id": tx.destination_customer_id,
                "status": tx.status.as_str(),
                "error_reason": tx.error_reason,
            }),
            processed: false,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Publish a stored event and flag it processed on success.
///
/// Never fails the caller: a missed publish leaves `processed = false`.
pub async fn relay(store: &dyn TransactionStore, publisher: &dyn EventPublisher, event: &Event) {
    match publisher.publish(event).await {
        Ok(Delivery::Skipped) => {}
        Ok(Delivery::Published) => {
            if let Err(e) = store.mark_event_processed(event.id).await {
                warn!(event_id = %event.id, error = %e, "failed to flag event as processed");
            } else {
                debug!(event_id = %event.id, event_type = %event.event_type, "event published");
            }
        }
        Err(e) => {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "event publish skipped, row kept for downstream reconciliation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::RequestMetadata;
    use crate::transaction::types::{TransactionRequest, TransactionStatus};
    use rust_decimal::Decimal;

    #[test]
    fn test_event_snapshot() {
        let req = TransactionRequest {
            source_account_id: "acc-A".into(),
            destination_account_id: None,
            amount: Decimal::from(25),
            transaction_type: "add_amount".into(),
            reference_id: "r9".into(),
            metadata: RequestMetadata::new("u1", "req-1"),
        }
        .validate()
        .unwrap();
        let mut tx = Transaction::new(&req, chrono::Duration::minutes(5));
        tx.status = TransactionStatus::Failed;
        tx.error_reason = Some("compensated: boom".into());

        let event = Event::for_transaction(EventType::TransactionFailed, &tx, "system");

        assert_eq!(event.event_type, "transaction_failed");
        assert_eq!(event.aggregate_type, "transaction");
        assert_eq!(event.aggregate_id, tx.id.to_string());
        assert_eq!(event.data["status"], "failed");
        assert_eq!(event.data["amount"], "25");
        assert_eq!(event.data["error_reason"], "compensated: boom");
        assert!(!event.processed);
    }
}
