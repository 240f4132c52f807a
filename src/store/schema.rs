use sqlx::SqlitePool;

/// Create all tables at startup. Every statement is idempotent; there is no
/// separate migration tooling at this layer.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS accounts (
            account_id           TEXT PRIMARY KEY,
            tier                 TEXT NOT NULL DEFAULT 'free',
            monthly_tokens_used  INTEGER NOT NULL DEFAULT 0
                                 CHECK (monthly_tokens_used >= 0),
            daily_messages_sent  INTEGER NOT NULL DEFAULT 0
                                 CHECK (daily_messages_sent >= 0),
            billing_period_start TEXT NOT NULL,
            last_daily_reset     TEXT,
            last_monthly_reset   TEXT,
            created_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_credentials (
            token_hash TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(account_id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id  TEXT PRIMARY KEY,
            owner_account_id TEXT NOT NULL,
            title            TEXT NOT NULL,
            model_history    TEXT NOT NULL DEFAULT '[]',
            last_sequence    INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_owner
            ON conversations(owner_account_id);

        CREATE TABLE IF NOT EXISTS messages (
            message_id      TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id),
            role            TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            model_used      TEXT,
            input_tokens    INTEGER NOT NULL DEFAULT 0,
            output_tokens   INTEGER NOT NULL DEFAULT 0,
            total_tokens    INTEGER NOT NULL DEFAULT 0,
            sequence_number INTEGER NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE (conversation_id, sequence_number)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, sequence_number);

        CREATE TABLE IF NOT EXISTS usage_tracking (
            account_id           TEXT NOT NULL,
            date                 TEXT NOT NULL,
            tokens_used          INTEGER NOT NULL DEFAULT 0,
            messages_sent        INTEGER NOT NULL DEFAULT 0,
            models_used          TEXT NOT NULL DEFAULT '{}',
            cost_incurred_micros INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (account_id, date)
        );",
    )
    .execute(pool)
    .await?;

    Ok(())
}
