//! Idempotent schema bootstrap, run on every boot.

use sqlx::PgPool;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id                      UUID PRIMARY KEY,
    source_account_id       TEXT NOT NULL,
    destination_account_id  TEXT,
    source_customer_id      TEXT,
    destination_customer_id TEXT,
    amount                  NUMERIC(38, 8) NOT NULL CHECK (amount >= 0),
    transaction_type        TEXT NOT NULL,
    reference_id            TEXT NOT NULL,
    status                  TEXT NOT NULL,
    timeout_at              TIMESTAMPTZ NOT NULL,
    version                 BIGINT NOT NULL DEFAULT 1,
    retry_count             INTEGER NOT NULL DEFAULT 0,
    last_retry_at           TIMESTAMPTZ,
    error_reason            TEXT,
    created_by              TEXT NOT NULL,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const TRANSACTION_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_reference_id ON transactions (reference_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_source_account ON transactions (source_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_destination_account ON transactions (destination_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_source_customer ON transactions (source_customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_destination_customer ON transactions (destination_customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions (status)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_timeout_at ON transactions (timeout_at)",
];

const CREATE_SAGAS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_sagas (
    id                      UUID PRIMARY KEY,
    transaction_id          UUID NOT NULL UNIQUE REFERENCES transactions (id),
    current_state           TEXT NOT NULL,
    current_step            TEXT,
    successful_steps        TEXT[] NOT NULL DEFAULT '{}',
    source_account_id       TEXT NOT NULL,
    destination_account_id  TEXT,
    amount                  NUMERIC(38, 8) NOT NULL,
    transaction_type        TEXT NOT NULL,
    reference_id            TEXT NOT NULL,
    compensation_required   BOOLEAN NOT NULL DEFAULT FALSE,
    compensation_reason     TEXT,
    retry_count             INTEGER NOT NULL DEFAULT 0,
    max_retries             INTEGER NOT NULL DEFAULT 3,
    last_retry_at           TIMESTAMPTZ,
    next_retry_at           TIMESTAMPTZ,
    timeout_at              TIMESTAMPTZ NOT NULL,
    version                 BIGINT NOT NULL DEFAULT 1,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const SAGA_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sagas_current_state ON transaction_sagas (current_state)",
    "CREATE INDEX IF NOT EXISTS idx_sagas_timeout_at ON transaction_sagas (timeout_at)",
];

const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id              UUID PRIMARY KEY,
    event_type      TEXT NOT NULL,
    aggregate_id    TEXT NOT NULL,
    aggregate_type  TEXT NOT NULL,
    data            JSONB NOT NULL,
    processed       BOOLEAN NOT NULL DEFAULT FALSE,
    created_by      TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const EVENT_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_aggregate_id ON events (aggregate_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_unprocessed ON events (created_at) WHERE processed = FALSE",
];

const CREATE_EMPLOYEES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    id              UUID PRIMARY KEY,
    username        TEXT NOT NULL,
    password_hash   TEXT NOT NULL,
    role            TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_by      TEXT NOT NULL,
    updated_by      TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const EMPLOYEE_INDEXES: &[&str] = &[
    // A soft-deleted username may be recreated
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_employees_valid_username ON employees (username) WHERE status = 'valid'",
    "CREATE INDEX IF NOT EXISTS idx_employees_status ON employees (status)",
];

/// Create the transaction service tables and indexes.
pub async fn init_transaction_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing transaction schema...");

    for ddl in [CREATE_TRANSACTIONS_TABLE, CREATE_SAGAS_TABLE, CREATE_EVENTS_TABLE]
        .into_iter()
        .chain(TRANSACTION_INDEXES.iter().copied())
        .chain(SAGA_INDEXES.iter().copied())
        .chain(EVENT_INDEXES.iter().copied())
    {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Transaction schema initialized");
    Ok(())
}

/// Create the auth service tables and indexes.
pub async fn init_auth_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing auth schema...");

    sqlx::query(CREATE_EMPLOYEES_TABLE).execute(pool).await?;
    for ddl in EMPLOYEE_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Auth schema initialized");
    Ok(())
}
