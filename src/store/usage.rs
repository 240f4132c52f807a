use super::accounts;
use crate::error::Result;
use crate::pricing::{ModelPricing, lookup_pricing};
use crate::providers::TokenUsage;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// One row of the per-day usage breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyUsage {
    pub tokens_used: u64,
    pub messages_sent: u64,
    pub models_used: BTreeMap<String, u64>,
    pub cost_incurred_micros: i64,
}

/// Record a completed exchange: bump the account counters atomically, then
/// fold the exchange into today's breakdown row.
///
/// Callers treat failure as a logged warning — the response has already been
/// delivered and is never rolled back.
pub async fn record(
    pool: &SqlitePool,
    account_id: &str,
    model: &str,
    usage: TokenUsage,
    messages_added: u64,
    pricing: &[ModelPricing],
    date: NaiveDate,
) -> Result<()> {
    accounts::increment_usage_counters(pool, account_id, usage.total(), messages_added).await?;

    let cost_micros = lookup_pricing(model, pricing)
        .map_or(0, |entry| {
            entry.estimate_cost_micros(usage.prompt_tokens, usage.completion_tokens)
        });

    upsert_daily_breakdown(
        pool,
        account_id,
        model,
        usage.total(),
        messages_added,
        cost_micros,
        date,
    )
    .await
}

async fn upsert_daily_breakdown(
    pool: &SqlitePool,
    account_id: &str,
    model: &str,
    tokens: u64,
    messages: u64,
    cost_micros: i64,
    date: NaiveDate,
) -> Result<()> {
    let date_key = accounts::encode_date(date);
    let mut tx = pool.begin().await?;

    let existing: Option<(i64, i64, String, i64)> = sqlx::query_as(
        "SELECT tokens_used, messages_sent, models_used, cost_incurred_micros
         FROM usage_tracking WHERE account_id = ?1 AND date = ?2",
    )
    .bind(account_id)
    .bind(&date_key)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((tokens_used, messages_sent, raw_models, cost_total)) = existing {
        let mut models: BTreeMap<String, u64> =
            serde_json::from_str(&raw_models).unwrap_or_default();
        *models.entry(model.to_string()).or_insert(0) += 1;

        sqlx::query(
            "UPDATE usage_tracking
             SET tokens_used = ?3, messages_sent = ?4, models_used = ?5,
                 cost_incurred_micros = ?6
             WHERE account_id = ?1 AND date = ?2",
        )
        .bind(account_id)
        .bind(&date_key)
        .bind(tokens_used.saturating_add(i64::try_from(tokens).unwrap_or(i64::MAX)))
        .bind(messages_sent.saturating_add(i64::try_from(messages).unwrap_or(i64::MAX)))
        .bind(serde_json::to_string(&models).unwrap_or_else(|_| "{}".to_string()))
        .bind(cost_total.saturating_add(cost_micros))
        .execute(&mut *tx)
        .await?;
    } else {
        let models = BTreeMap::from([(model.to_string(), 1_u64)]);
        sqlx::query(
            "INSERT INTO usage_tracking
                 (account_id, date, tokens_used, messages_sent, models_used,
                  cost_incurred_micros)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(account_id)
        .bind(&date_key)
        .bind(i64::try_from(tokens).unwrap_or(i64::MAX))
        .bind(i64::try_from(messages).unwrap_or(i64::MAX))
        .bind(serde_json::to_string(&models).unwrap_or_else(|_| "{}".to_string()))
        .bind(cost_micros)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn daily_usage(
    pool: &SqlitePool,
    account_id: &str,
    date: NaiveDate,
) -> Result<Option<DailyUsage>> {
    let row: Option<(i64, i64, String, i64)> = sqlx::query_as(
        "SELECT tokens_used, messages_sent, models_used, cost_incurred_micros
         FROM usage_tracking WHERE account_id = ?1 AND date = ?2",
    )
    .bind(account_id)
    .bind(accounts::encode_date(date))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(tokens, messages, raw_models, cost)| DailyUsage {
        tokens_used: u64::try_from(tokens).unwrap_or(0),
        messages_sent: u64::try_from(messages).unwrap_or(0),
        models_used: serde_json::from_str(&raw_models).unwrap_or_default(),
        cost_incurred_micros: cost,
    }))
}
