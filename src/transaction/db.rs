//! Transaction Database Layer
//!
//! PostgreSQL persistence for transactions, sagas and outbox events.
//! Every update is a CAS on `version`: `UPDATE ... WHERE id = $1 AND version = $2`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::error::TransactionError;
use super::events::Event;
use super::history::HistoryQuery;
use super::saga::TransactionSaga;
use super::state::{SagaState, SagaStep};
use super::store::TransactionStore;
use super::types::{Transaction, TransactionStatus, TransactionType};

const TRANSACTION_COLUMNS: &str = r#"
    id, source_account_id, destination_account_id, source_customer_id,
    destination_customer_id, amount, transaction_type, reference_id, status,
    timeout_at, version, retry_count, last_retry_at, error_reason, created_by,
    created_at, updated_at
"#;

const SAGA_COLUMNS: &str = r#"
    id, transaction_id, current_state, current_step, successful_steps,
    source_account_id, destination_account_id, amount, transaction_type,
    reference_id, compensation_required, compensation_reason, retry_count,
    max_retries, last_retry_at, next_retry_at, timeout_at, version,
    created_at, updated_at
"#;

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &PgRow) -> Result<Transaction, TransactionError> {
        let type_str: String = row.try_get("transaction_type")?;
        let transaction_type: TransactionType = type_str.parse().map_err(|_| {
            TransactionError::Database(format!("Invalid transaction_type: {type_str}"))
        })?;

        let status_str: String = row.try_get("status")?;
        let status = TransactionStatus::parse(&status_str)
            .ok_or_else(|| TransactionError::Database(format!("Invalid status: {status_str}")))?;

        Ok(Transaction {
            id: row.try_get("id")?,
            source_account_id: row.try_get("source_account_id")?,
            destination_account_id: row.try_get("destination_account_id")?,
            source_customer_id: row.try_get("source_customer_id")?,
            destination_customer_id: row.try_get("destination_customer_id")?,
            amount: row.try_get("amount")?,
            transaction_type,
            reference_id: row.try_get("reference_id")?,
            status,
            timeout_at: row.try_get("timeout_at")?,
            version: row.try_get("version")?,
            retry_count: row.try_get("retry_count")?,
            last_retry_at: row.try_get("last_retry_at")?,
            error_reason: row.try_get("error_reason")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_saga(row: &PgRow) -> Result<TransactionSaga, TransactionError> {
        let state_str: String = row.try_get("current_state")?;
        let current_state = SagaState::parse(&state_str)
            .ok_or_else(|| TransactionError::Database(format!("Invalid saga state: {state_str}")))?;

        let step_str: Option<String> = row.try_get("current_step")?;
        let current_step = match step_str {
            Some(s) => Some(
                SagaStep::parse(&s)
                    .ok_or_else(|| TransactionError::Database(format!("Invalid saga step: {s}")))?,
            ),
            None => None,
        };

        let labels: Vec<String> = row.try_get("successful_steps")?;
        let successful_steps = labels
            .iter()
            .map(|s| {
                SagaStep::parse(s)
                    .ok_or_else(|| TransactionError::Database(format!("Invalid saga step: {s}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let type_str: String = row.try_get("transaction_type")?;
        let transaction_type: TransactionType = type_str.parse().map_err(|_| {
            TransactionError::Database(format!("Invalid transaction_type: {type_str}"))
        })?;

        Ok(TransactionSaga {
            id: row.try_get("id")?,
            transaction_id: row.try_get("transaction_id")?,
            current_state,
            current_step,
            successful_steps,
            source_account_id: row.try_get("source_account_id")?,
            destination_account_id: row.try_get("destination_account_id")?,
            amount: row.try_get("amount")?,
            transaction_type,
            reference_id: row.try_get("reference_id")?,
            compensation_required: row.try_get("compensation_required")?,
            compensation_reason: row.try_get("compensation_reason")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            last_retry_at: row.try_get("last_retry_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            timeout_at: row.try_get("timeout_at")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Shared CAS statement for `update_transaction` and `finalize_transaction`
    async fn cas_transaction<'e, E>(
        executor: E,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<u64, TransactionError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET source_customer_id = $1, destination_customer_id = $2, status = $3,
                retry_count = $4, last_retry_at = $5, error_reason = $6,
                version = version + 1, updated_at = $7
            WHERE id = $8 AND version = $9
            "#,
        )
        .bind(&tx.source_customer_id)
        .bind(&tx.destination_customer_id)
        .bind(tx.status.as_str())
        .bind(tx.retry_count)
        .bind(tx.last_retry_at)
        .bind(&tx.error_reason)
        .bind(now)
        .bind(tx.id)
        .bind(tx.version)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    fn push_history_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &HistoryQuery) {
        builder.push(" WHERE TRUE");
        if let Some(account) = &query.account_id {
            builder
                .push(" AND (source_account_id = ")
                .push_bind(account.clone())
                .push(" OR destination_account_id = ")
                .push_bind(account.clone())
                .push(")");
        }
        if let Some(customer) = &query.customer_id {
            builder
                .push(" AND (source_customer_id = ")
                .push_bind(customer.clone())
                .push(" OR destination_customer_id = ")
                .push_bind(customer.clone())
                .push(")");
        }
        if !query.types.is_empty() {
            let types: Vec<String> = query.types.iter().map(|t| t.as_str().to_string()).collect();
            builder
                .push(" AND transaction_type = ANY(")
                .push_bind(types)
                .push(")");
        }
        if let Some(start) = query.start_date {
            builder.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = query.end_date {
            builder.push(" AND created_at <= ").push_bind(end);
        }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create_with_saga(
        &self,
        tx: &Transaction,
        saga: &TransactionSaga,
    ) -> Result<bool, TransactionError> {
        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions
                (id, source_account_id, destination_account_id, source_customer_id,
                 destination_customer_id, amount, transaction_type, reference_id, status,
                 timeout_at, version, retry_count, last_retry_at, error_reason, created_by,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (reference_id) DO NOTHING
            "#,
        )
        .bind(tx.id)
        .bind(&tx.source_account_id)
        .bind(&tx.destination_account_id)
        .bind(&tx.source_customer_id)
        .bind(&tx.destination_customer_id)
        .bind(tx.amount)
        .bind(tx.transaction_type.as_str())
        .bind(&tx.reference_id)
        .bind(tx.status.as_str())
        .bind(tx.timeout_at)
        .bind(tx.version)
        .bind(tx.retry_count)
        .bind(tx.last_retry_at)
        .bind(&tx.error_reason)
        .bind(&tx.created_by)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&mut *db_tx)
        .await?;

        if inserted.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO transaction_sagas
                (id, transaction_id, current_state, current_step, successful_steps,
                 source_account_id, destination_account_id, amount, transaction_type,
                 reference_id, compensation_required, compensation_reason, retry_count,
                 max_retries, last_retry_at, next_retry_at, timeout_at, version,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20)
            "#,
        )
        .bind(saga.id)
        .bind(saga.transaction_id)
        .bind(saga.current_state.as_str())
        .bind(saga.current_step.map(|s| s.as_str()))
        .bind(saga.step_labels())
        .bind(&saga.source_account_id)
        .bind(&saga.destination_account_id)
        .bind(saga.amount)
        .bind(saga.transaction_type.as_str())
        .bind(&saga.reference_id)
        .bind(saga.compensation_required)
        .bind(&saga.compensation_reason)
        .bind(saga.retry_count)
        .bind(saga.max_retries)
        .bind(saga.last_retry_at)
        .bind(saga.next_retry_at)
        .bind(saga.timeout_at)
        .bind(saga.version)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(true)
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, TransactionError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    async fn get_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, TransactionError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference_id = $1");
        let row = sqlx::query(&sql)
            .bind(reference_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    async fn get_saga(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionSaga>, TransactionError> {
        let sql = format!("SELECT {SAGA_COLUMNS} FROM transaction_sagas WHERE transaction_id = $1");
        let row = sqlx::query(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_saga).transpose()
    }

    async fn update_saga(&self, saga: &mut TransactionSaga) -> Result<(), TransactionError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE transaction_sagas
            SET current_state = $1, current_step = $2, successful_steps = $3,
                compensation_required = $4, compensation_reason = $5, retry_count = $6,
                last_retry_at = $7, next_retry_at = $8, version = version + 1, updated_at = $9
            WHERE id = $10 AND version = $11
            "#,
        )
        .bind(saga.current_state.as_str())
        .bind(saga.current_step.map(|s| s.as_str()))
        .bind(saga.step_labels())
        .bind(saga.compensation_required)
        .bind(&saga.compensation_reason)
        .bind(saga.retry_count)
        .bind(saga.last_retry_at)
        .bind(saga.next_retry_at)
        .bind(now)
        .bind(saga.id)
        .bind(saga.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TransactionError::ConcurrentModification);
        }
        saga.version += 1;
        saga.updated_at = now;
        Ok(())
    }

    async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), TransactionError> {
        let now = Utc::now();
        if Self::cas_transaction(&self.pool, tx, now).await? == 0 {
            return Err(TransactionError::ConcurrentModification);
        }
        tx.version += 1;
        tx.updated_at = now;
        Ok(())
    }

    async fn finalize_transaction(
        &self,
        tx: &mut Transaction,
        event: &Event,
    ) -> Result<(), TransactionError> {
        let now = Utc::now();
        let mut db_tx = self.pool.begin().await?;

        if Self::cas_transaction(&mut *db_tx, tx, now).await? == 0 {
            db_tx.rollback().await?;
            return Err(TransactionError::ConcurrentModification);
        }

        sqlx::query(
            r#"
            INSERT INTO events
                (id, event_type, aggregate_id, aggregate_type, data, processed, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.data)
        .bind(event.processed)
        .bind(&event.created_by)
        .bind(event.created_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        tx.version += 1;
        tx.updated_at = now;
        Ok(())
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), TransactionError> {
        sqlx::query("UPDATE events SET processed = TRUE WHERE id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_stuck_transactions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, TransactionError> {
        let statuses: Vec<String> = TransactionStatus::RECOVERABLE
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE status = ANY($1) AND timeout_at < $2
            ORDER BY timeout_at ASC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(statuses)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    async fn find_orphan_sagas(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionSaga>, TransactionError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM transaction_sagas s
            JOIN transactions t ON t.id = s.transaction_id
            WHERE s.current_state NOT IN ($1, $2, $3)
              AND s.timeout_at < $4
              AND t.status IN ($5, $6)
            ORDER BY s.timeout_at ASC
            LIMIT $7
            "#,
            SAGA_COLUMNS
                .split(',')
                .map(|c| format!("s.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(SagaState::Completed.as_str())
            .bind(SagaState::Failed.as_str())
            .bind(SagaState::Compensated.as_str())
            .bind(now)
            .bind(TransactionStatus::Completed.as_str())
            .bind(TransactionStatus::Failed.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_saga).collect()
    }

    async fn history(
        &self,
        query: &HistoryQuery,
    ) -> Result<(Vec<Transaction>, i64), TransactionError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        Self::push_history_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions"
        ));
        Self::push_history_filters(&mut select, query);
        select
            .push(format!(
                " ORDER BY created_at {0}, id {0}",
                query.sort_order.as_sql()
            ))
            .push(" LIMIT ")
            .push_bind(query.page.limit())
            .push(" OFFSET ")
            .push_bind(query.page.offset());

        let rows = select.build().fetch_all(&self.pool).await?;
        let transactions = rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((transactions, total))
    }
}
