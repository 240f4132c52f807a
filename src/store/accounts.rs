use crate::error::{ErrorKind, GatewayError, Result};
use crate::quota::Tier;
use chrono::NaiveDate;
use sqlx::SqlitePool;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A caller's account row with tier and consumption counters.
#[derive(Debug, Clone)]
pub struct Account {
    pub account_id: String,
    pub tier: Tier,
    pub monthly_tokens_used: u64,
    pub daily_messages_sent: u64,
    pub billing_period_start: NaiveDate,
    pub last_daily_reset: Option<NaiveDate>,
    pub last_monthly_reset: Option<NaiveDate>,
}

pub(crate) fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn decode_date(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|error| {
        GatewayError::new(
            ErrorKind::InternalError,
            format!("stored {field} date {raw:?} is unreadable: {error}"),
        )
    })
}

pub async fn create_account(
    pool: &SqlitePool,
    account_id: &str,
    tier: Tier,
    billing_period_start: NaiveDate,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO accounts
             (account_id, tier, billing_period_start, created_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(account_id)
    .bind(tier.to_string())
    .bind(encode_date(billing_period_start))
    .bind(super::now_timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_account(pool: &SqlitePool, account_id: &str) -> Result<Option<Account>> {
    let row: Option<(String, String, i64, i64, String, Option<String>, Option<String>)> =
        sqlx::query_as(
            "SELECT account_id, tier, monthly_tokens_used, daily_messages_sent,
                    billing_period_start, last_daily_reset, last_monthly_reset
             FROM accounts WHERE account_id = ?1",
        )
        .bind(account_id)
        .fetch_optional(pool)
        .await?;

    let Some((id, tier, monthly, daily, billing_start, daily_reset, monthly_reset)) = row else {
        return Ok(None);
    };

    Ok(Some(Account {
        account_id: id,
        tier: Tier::from_stored(&tier),
        monthly_tokens_used: u64::try_from(monthly).unwrap_or(0),
        daily_messages_sent: u64::try_from(daily).unwrap_or(0),
        billing_period_start: decode_date("billing_period_start", &billing_start)?,
        last_daily_reset: daily_reset
            .map(|raw| decode_date("last_daily_reset", &raw))
            .transpose()?,
        last_monthly_reset: monthly_reset
            .map(|raw| decode_date("last_monthly_reset", &raw))
            .transpose()?,
    }))
}

/// Zero the daily counter iff no reset has been recorded for `today` yet.
///
/// The staleness predicate lives in the WHERE clause, so two concurrent
/// callers race to a single applied reset; the loser sees zero rows changed
/// and re-reads the already-reset row. ISO dates compare lexicographically.
pub async fn apply_daily_reset(
    pool: &SqlitePool,
    account_id: &str,
    today: NaiveDate,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE accounts
         SET daily_messages_sent = 0, last_daily_reset = ?1
         WHERE account_id = ?2
           AND (last_daily_reset IS NULL OR last_daily_reset < ?1)",
    )
    .bind(encode_date(today))
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Zero the monthly counter iff no reset covers the given anniversary. The
/// reset marker records the anniversary it applied, which makes the guard a
/// natural compare-and-swap.
pub async fn apply_monthly_reset(
    pool: &SqlitePool,
    account_id: &str,
    anniversary: NaiveDate,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE accounts
         SET monthly_tokens_used = 0, last_monthly_reset = ?1
         WHERE account_id = ?2
           AND (last_monthly_reset IS NULL OR last_monthly_reset < ?1)",
    )
    .bind(encode_date(anniversary))
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Post-exchange counter increments, expressed in SQL so concurrent
/// exchanges never clobber each other's writes.
pub async fn increment_usage_counters(
    pool: &SqlitePool,
    account_id: &str,
    tokens: u64,
    messages: u64,
) -> Result<()> {
    sqlx::query(
        "UPDATE accounts
         SET monthly_tokens_used = monthly_tokens_used + ?1,
             daily_messages_sent = daily_messages_sent + ?2
         WHERE account_id = ?3",
    )
    .bind(i64::try_from(tokens).unwrap_or(i64::MAX))
    .bind(i64::try_from(messages).unwrap_or(i64::MAX))
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn account_id_for_token_hash(
    pool: &SqlitePool,
    token_hash: &str,
) -> Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT account_id FROM api_credentials WHERE token_hash = ?1")
            .bind(token_hash)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(account_id,)| account_id))
}

pub async fn insert_credential(
    pool: &SqlitePool,
    token_hash: &str,
    account_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO api_credentials (token_hash, account_id, created_at) VALUES (?1, ?2, ?3)",
    )
    .bind(token_hash)
    .bind(account_id)
    .bind(super::now_timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn create_and_load_round_trip() {
        let pool = test_pool().await;
        create_account(&pool, "acct-1", Tier::Basic, date(2026, 3, 15))
            .await
            .unwrap();

        let account = load_account(&pool, "acct-1").await.unwrap().unwrap();
        assert_eq!(account.tier, Tier::Basic);
        assert_eq!(account.monthly_tokens_used, 0);
        assert_eq!(account.daily_messages_sent, 0);
        assert_eq!(account.billing_period_start, date(2026, 3, 15));
        assert!(account.last_daily_reset.is_none());
    }

    #[tokio::test]
    async fn missing_account_loads_none() {
        let pool = test_pool().await;
        assert!(load_account(&pool, "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn daily_reset_applies_once_per_day() {
        let pool = test_pool().await;
        create_account(&pool, "acct-1", Tier::Free, date(2026, 1, 1))
            .await
            .unwrap();
        increment_usage_counters(&pool, "acct-1", 0, 9).await.unwrap();

        assert!(apply_daily_reset(&pool, "acct-1", date(2026, 6, 2)).await.unwrap());
        // Same-day second attempt is a no-op.
        assert!(!apply_daily_reset(&pool, "acct-1", date(2026, 6, 2)).await.unwrap());

        let account = load_account(&pool, "acct-1").await.unwrap().unwrap();
        assert_eq!(account.daily_messages_sent, 0);
        assert_eq!(account.last_daily_reset, Some(date(2026, 6, 2)));
    }

    #[tokio::test]
    async fn monthly_reset_guarded_by_anniversary_marker() {
        let pool = test_pool().await;
        create_account(&pool, "acct-1", Tier::Free, date(2026, 1, 10))
            .await
            .unwrap();
        increment_usage_counters(&pool, "acct-1", 4_000, 0).await.unwrap();

        assert!(
            apply_monthly_reset(&pool, "acct-1", date(2026, 6, 10))
                .await
                .unwrap()
        );
        assert!(
            !apply_monthly_reset(&pool, "acct-1", date(2026, 6, 10))
                .await
                .unwrap()
        );

        let account = load_account(&pool, "acct-1").await.unwrap().unwrap();
        assert_eq!(account.monthly_tokens_used, 0);
        assert_eq!(account.last_monthly_reset, Some(date(2026, 6, 10)));
    }

    #[tokio::test]
    async fn increments_accumulate() {
        let pool = test_pool().await;
        create_account(&pool, "acct-1", Tier::Pro, date(2026, 1, 1))
            .await
            .unwrap();

        increment_usage_counters(&pool, "acct-1", 120, 1).await.unwrap();
        increment_usage_counters(&pool, "acct-1", 80, 1).await.unwrap();

        let account = load_account(&pool, "acct-1").await.unwrap().unwrap();
        assert_eq!(account.monthly_tokens_used, 200);
        assert_eq!(account.daily_messages_sent, 2);
    }

    #[tokio::test]
    async fn credential_lookup_round_trip() {
        let pool = test_pool().await;
        create_account(&pool, "acct-1", Tier::Free, date(2026, 1, 1))
            .await
            .unwrap();
        insert_credential(&pool, "hash-abc", "acct-1").await.unwrap();

        assert_eq!(
            account_id_for_token_hash(&pool, "hash-abc").await.unwrap(),
            Some("acct-1".to_string())
        );
        assert!(
            account_id_for_token_hash(&pool, "hash-xyz")
                .await
                .unwrap()
                .is_none()
        );
    }
}
