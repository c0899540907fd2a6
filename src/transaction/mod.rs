//! Transaction Saga
//!
//! Moves money between externally owned accounts. Balances live in the
//! Account Service; this module owns only the transaction, its saga, and the
//! outbox events.
//!
//! # State Machine
//!
//! ```text
//! initiated → validating → validated → locking → locked → processing → completed
//!                 ↓                        ↓                  ↓
//!         validation_failed           lock_failed          failed
//!                 └────────────┬───────────┴─────────────────┘
//!                        compensating → compensated
//!                              ↓
//!                      compensate_failed
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Version CAS**: every saga and transaction write is guarded by `version`
//! 2. **Idempotent steps**: a step recorded in `successful_steps` is never re-run
//! 3. **Funds before status**: `successful` only after the balance update is acknowledged
//! 4. **Timeouts fail**: past `timeout_at`, reconciliation fails the transaction and unlocks

pub mod balance;
pub mod db;
pub mod error;
pub mod events;
pub mod history;
pub mod orchestrator;
pub mod recovery;
pub mod saga;
pub mod state;
pub mod store;
pub mod types;


pub use db::PgTransactionStore;
pub use error::TransactionError;
pub use events::{Event, EventType};
pub use history::{HistoryFilter, HistoryPage, get_transaction_history};
pub use orchestrator::{OrchestratorConfig, TransactionOrchestrator, TransactionOutcome};
pub use recovery::{RecoveryReport, RecoveryWorker, WorkerConfig};
pub use saga::TransactionSaga;
pub use state::{SagaState, SagaStep};
pub use store::TransactionStore;
pub use types::{Transaction, TransactionRequest, TransactionStatus, TransactionType};
