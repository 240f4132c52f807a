use crate::error::{GatewayError, Result};
use sqlx::SqlitePool;

/// Title assigned at creation, replaced by the first real exchange.
pub const PLACEHOLDER_TITLE: &str = "New conversation";

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredRole {
    User,
    Assistant,
}

impl StoredRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

pub struct NewMessage<'a> {
    pub conversation_id: &'a str,
    pub role: StoredRole,
    pub content: &'a str,
    /// None for user messages.
    pub model_used: Option<&'a str>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub sequence_number: u64,
}

/// Idempotent get-or-create. Concurrent callers for the same id race on the
/// primary key; the losers fall through to the ownership check.
pub async fn ensure(pool: &SqlitePool, conversation_id: &str, owner_id: &str) -> Result<()> {
    let now = super::now_timestamp();
    sqlx::query(
        "INSERT INTO conversations
             (conversation_id, owner_account_id, title, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(conversation_id) DO NOTHING",
    )
    .bind(conversation_id)
    .bind(owner_id)
    .bind(PLACEHOLDER_TITLE)
    .bind(&now)
    .execute(pool)
    .await?;

    let (owner,): (String,) =
        sqlx::query_as("SELECT owner_account_id FROM conversations WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(pool)
            .await?;

    if owner != owner_id {
        return Err(GatewayError::invalid_request(
            "conversation belongs to another account",
        ));
    }
    Ok(())
}

/// Allocate the next per-conversation sequence number.
///
/// One UPDATE .. RETURNING statement: the database is the only arbiter, so
/// concurrent exchanges on the same conversation can never observe the same
/// value. A read-then-insert here is the classic duplicate-sequence hazard.
pub async fn next_sequence(pool: &SqlitePool, conversation_id: &str) -> Result<u64> {
    let (sequence,): (i64,) = sqlx::query_as(
        "UPDATE conversations
         SET last_sequence = last_sequence + 1, updated_at = ?2
         WHERE conversation_id = ?1
         RETURNING last_sequence",
    )
    .bind(conversation_id)
    .bind(super::now_timestamp())
    .fetch_one(pool)
    .await?;
    Ok(u64::try_from(sequence).unwrap_or(0))
}

/// Insert-only; the total-token column is derived here, never accepted from
/// a caller.
pub async fn persist_message(pool: &SqlitePool, message: NewMessage<'_>) -> Result<String> {
    let message_id = uuid::Uuid::new_v4().to_string();
    let input = i64::try_from(message.input_tokens).unwrap_or(i64::MAX);
    let output = i64::try_from(message.output_tokens).unwrap_or(i64::MAX);

    sqlx::query(
        "INSERT INTO messages
             (message_id, conversation_id, role, content, model_used,
              input_tokens, output_tokens, total_tokens, sequence_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&message_id)
    .bind(message.conversation_id)
    .bind(message.role.as_str())
    .bind(message.content)
    .bind(message.model_used)
    .bind(input)
    .bind(output)
    .bind(input.saturating_add(output))
    .bind(i64::try_from(message.sequence_number).unwrap_or(i64::MAX))
    .bind(super::now_timestamp())
    .execute(pool)
    .await?;

    Ok(message_id)
}

fn title_snippet(text: &str) -> String {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let snippet: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{snippet}…")
    } else {
        snippet
    }
}

/// First-write-wins: replaces the placeholder with a snippet of the first
/// real user text, and never overwrites an already-set title.
pub async fn update_title_if_default(
    pool: &SqlitePool,
    conversation_id: &str,
    candidate_text: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE conversations
         SET title = ?2, updated_at = ?3
         WHERE conversation_id = ?1 AND title = ?4",
    )
    .bind(conversation_id)
    .bind(title_snippet(candidate_text))
    .bind(super::now_timestamp())
    .bind(PLACEHOLDER_TITLE)
    .execute(pool)
    .await?;
    Ok(())
}

/// Add a model id to the conversation's ordered history if absent.
pub async fn append_model_history(
    pool: &SqlitePool,
    conversation_id: &str,
    model_id: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let (raw_history,): (String,) =
        sqlx::query_as("SELECT model_history FROM conversations WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(&mut *tx)
            .await?;

    let mut history: Vec<String> = serde_json::from_str(&raw_history).unwrap_or_default();
    if history.iter().any(|entry| entry == model_id) {
        return Ok(());
    }
    history.push(model_id.to_string());

    sqlx::query(
        "UPDATE conversations SET model_history = ?2, updated_at = ?3 WHERE conversation_id = ?1",
    )
    .bind(conversation_id)
    .bind(serde_json::to_string(&history).unwrap_or_else(|_| "[]".to_string()))
    .bind(super::now_timestamp())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn model_history(pool: &SqlitePool, conversation_id: &str) -> Result<Vec<String>> {
    let (raw,): (String,) =
        sqlx::query_as("SELECT model_history FROM conversations WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(pool)
            .await?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

pub async fn title(pool: &SqlitePool, conversation_id: &str) -> Result<String> {
    let (title,): (String,) =
        sqlx::query_as("SELECT title FROM conversations WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(pool)
            .await?;
    Ok(title)
}
