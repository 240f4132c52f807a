pub mod tiers;

pub use tiers::{Tier, TierLimits};

use crate::error::{ErrorKind, GatewayError, Result};
use crate::store::accounts::{self, Account};
use chrono::{Datelike, NaiveDate, Utc};
use sqlx::SqlitePool;

/// Post-reset view of an account handed to the orchestrator. Returning it
/// reserves nothing: counters move only after a real exchange completes, so
/// a request that dies mid-stream never pays for tokens it never received.
#[derive(Debug, Clone)]
pub struct QuotaSnapshot {
    pub tier: Tier,
    pub monthly_tokens_used: u64,
    pub daily_messages_sent: u64,
}

/// Owns tier limits, consumption counters, and the reset calendar.
#[derive(Clone)]
pub struct QuotaLedger {
    pool: SqlitePool,
}

impl QuotaLedger {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn check_and_reserve(
        &self,
        account_id: &str,
        requested_model: &str,
    ) -> Result<QuotaSnapshot> {
        self.check_at(account_id, requested_model, Utc::now().date_naive())
            .await
    }

    /// Date-injectable core of the pre-flight check.
    pub async fn check_at(
        &self,
        account_id: &str,
        requested_model: &str,
        today: NaiveDate,
    ) -> Result<QuotaSnapshot> {
        let account = self.load(account_id).await?;

        // Resets run before any limit is inspected. Both are conditional
        // updates: under two concurrent requests at most one applies, the
        // other re-reads the already-reset row below.
        accounts::apply_daily_reset(&self.pool, account_id, today).await?;

        let anniversary = last_anniversary(account.billing_period_start, today);
        accounts::apply_monthly_reset(&self.pool, account_id, anniversary).await?;

        let account = self.load(account_id).await?;
        let limits = account.tier.limits();

        if !limits.allows_model(requested_model) {
            return Err(GatewayError::new(
                ErrorKind::ModelNotAllowed,
                format!(
                    "Model {requested_model} is not available on the {} tier. \
                     Choose one of: {} — or upgrade your plan.",
                    account.tier,
                    limits.allowed_models.join(", ")
                ),
            )
            .with_details(serde_json::json!({
                "tier": account.tier,
                "allowedModels": limits.allowed_models,
            })));
        }

        if let Some(limit) = limits.daily_message_limit
            && account.daily_messages_sent >= limit
        {
            let resets_at = midnight_after(today);
            return Err(GatewayError::new(
                ErrorKind::DailyLimitExceeded,
                format!(
                    "Daily message limit reached ({}/{limit}). It resets at {resets_at}.",
                    account.daily_messages_sent
                ),
            )
            .with_details(serde_json::json!({
                "usage": { "current": account.daily_messages_sent, "limit": limit },
                "resetsAt": resets_at,
            })));
        }

        if let Some(limit) = limits.monthly_token_limit
            && account.monthly_tokens_used >= limit
        {
            let resets_at = start_of(next_anniversary(account.billing_period_start, today));
            return Err(GatewayError::new(
                ErrorKind::MonthlyLimitExceeded,
                format!(
                    "Monthly token budget exhausted ({}/{limit}). It resets at {resets_at} — \
                     consider a cheaper model or an upgraded plan.",
                    account.monthly_tokens_used
                ),
            )
            .with_details(serde_json::json!({
                "usage": { "current": account.monthly_tokens_used, "limit": limit },
                "resetsAt": resets_at,
            })));
        }

        Ok(QuotaSnapshot {
            tier: account.tier,
            monthly_tokens_used: account.monthly_tokens_used,
            daily_messages_sent: account.daily_messages_sent,
        })
    }

    async fn load(&self, account_id: &str) -> Result<Account> {
        accounts::load_account(&self.pool, account_id)
            .await?
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::AuthenticationFailed,
                    "no account exists for this credential",
                )
            })
    }
}

// ─── Anniversary calendar ────────────────────────────────────────────────────

/// Day `day` anchored into (year, month), clamped into short months so a
/// billing start on the 31st lands on Feb 28/29, Apr 30, and so on.
fn anchor_in_month(year: i32, month: u32, day: u32) -> NaiveDate {
    let mut candidate = day.min(31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, candidate) {
            return date;
        }
        candidate -= 1;
    }
}

fn month_before(year: i32, month: u32) -> (i32, u32) {
    if month == 1 { (year - 1, 12) } else { (year, month - 1) }
}

fn month_after(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

/// The most recently passed anniversary (on or before `today`).
fn last_anniversary(billing_start: NaiveDate, today: NaiveDate) -> NaiveDate {
    let this_month = anchor_in_month(today.year(), today.month(), billing_start.day());
    if this_month <= today {
        this_month
    } else {
        let (year, month) = month_before(today.year(), today.month());
        anchor_in_month(year, month, billing_start.day())
    }
}

/// The next anniversary (strictly after `today`).
fn next_anniversary(billing_start: NaiveDate, today: NaiveDate) -> NaiveDate {
    let this_month = anchor_in_month(today.year(), today.month(), billing_start.day());
    if this_month > today {
        this_month
    } else {
        let (year, month) = month_after(today.year(), today.month());
        anchor_in_month(year, month, billing_start.day())
    }
}

fn midnight_after(today: NaiveDate) -> String {
    start_of(today.succ_opt().unwrap_or(today))
}

fn start_of(date: NaiveDate) -> String {
    format!("{date}T00:00:00Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── calendar math ────────────────────────────────────────────────────

    #[test]
    fn anniversary_before_day_of_month_uses_previous_month() {
        let billing = date(2026, 1, 15);
        assert_eq!(last_anniversary(billing, date(2026, 6, 10)), date(2026, 5, 15));
        assert_eq!(next_anniversary(billing, date(2026, 6, 10)), date(2026, 6, 15));
    }

    #[test]
    fn anniversary_on_the_day_counts_as_passed() {
        let billing = date(2026, 1, 15);
        assert_eq!(last_anniversary(billing, date(2026, 6, 15)), date(2026, 6, 15));
        assert_eq!(next_anniversary(billing, date(2026, 6, 15)), date(2026, 7, 15));
    }

    #[test]
    fn short_months_clamp_the_anchor_day() {
        let billing = date(2026, 1, 31);
        assert_eq!(last_anniversary(billing, date(2026, 3, 1)), date(2026, 2, 28));
        assert_eq!(next_anniversary(billing, date(2026, 2, 10)), date(2026, 2, 28));
        assert_eq!(next_anniversary(billing, date(2026, 3, 31)), date(2026, 4, 30));
    }

    #[test]
    fn year_boundary_wraps() {
        let billing = date(2025, 6, 20);
        assert_eq!(last_anniversary(billing, date(2026, 1, 5)), date(2025, 12, 20));
        assert_eq!(next_anniversary(billing, date(2025, 12, 25)), date(2026, 1, 20));
    }

    // ── ledger behavior ──────────────────────────────────────────────────

    async fn seeded_ledger(tier: Tier, billing_start: NaiveDate) -> (QuotaLedger, SqlitePool) {
        let pool = test_pool().await;
        accounts::create_account(&pool, "acct-1", tier, billing_start)
            .await
            .unwrap();
        (QuotaLedger::new(pool.clone()), pool)
    }

    #[tokio::test]
    async fn allowed_model_passes_with_snapshot() {
        let (ledger, _pool) = seeded_ledger(Tier::Free, date(2026, 1, 1)).await;
        let snapshot = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 1))
            .await
            .unwrap();
        assert_eq!(snapshot.tier, Tier::Free);
        assert_eq!(snapshot.daily_messages_sent, 0);
    }

    #[tokio::test]
    async fn free_tier_rejects_gpt_4o_with_allowed_list() {
        let (ledger, _pool) = seeded_ledger(Tier::Free, date(2026, 1, 1)).await;
        let err = ledger
            .check_at("acct-1", "gpt-4o", date(2026, 6, 1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ModelNotAllowed);
        let details = err.details.unwrap();
        assert_eq!(details["tier"], "free");
        assert!(
            details["allowedModels"]
                .as_array()
                .unwrap()
                .iter()
                .any(|model| model == "gpt-4o-mini")
        );
    }

    #[tokio::test]
    async fn daily_limit_at_exactly_25_rejects() {
        let (ledger, pool) = seeded_ledger(Tier::Free, date(2026, 1, 1)).await;
        accounts::increment_usage_counters(&pool, "acct-1", 0, 25)
            .await
            .unwrap();
        accounts::apply_daily_reset(&pool, "acct-1", date(2026, 6, 1))
            .await
            .unwrap();
        accounts::increment_usage_counters(&pool, "acct-1", 0, 25)
            .await
            .unwrap();

        let err = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DailyLimitExceeded);
        let details = err.details.unwrap();
        assert_eq!(details["usage"]["current"], 25);
        assert_eq!(details["usage"]["limit"], 25);
        assert_eq!(details["resetsAt"], "2026-06-02T00:00:00Z");
    }

    #[tokio::test]
    async fn stale_daily_counter_resets_before_check() {
        let (ledger, pool) = seeded_ledger(Tier::Free, date(2026, 1, 1)).await;
        // Saturate yesterday's counter.
        accounts::apply_daily_reset(&pool, "acct-1", date(2026, 6, 1))
            .await
            .unwrap();
        accounts::increment_usage_counters(&pool, "acct-1", 0, 25)
            .await
            .unwrap();

        // A new day passes the check and shows a zeroed counter.
        let snapshot = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 2))
            .await
            .unwrap();
        assert_eq!(snapshot.daily_messages_sent, 0);

        let account = accounts::load_account(&pool, "acct-1").await.unwrap().unwrap();
        assert_eq!(account.last_daily_reset, Some(date(2026, 6, 2)));
    }

    #[tokio::test]
    async fn monthly_limit_rejects_with_anniversary_instant() {
        let (ledger, pool) = seeded_ledger(Tier::Free, date(2026, 1, 10)).await;
        // Counter accumulated after this period's anniversary.
        ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 12))
            .await
            .unwrap();
        accounts::increment_usage_counters(&pool, "acct-1", 50_000, 0)
            .await
            .unwrap();

        let err = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 12))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MonthlyLimitExceeded);
        assert_eq!(err.details.unwrap()["resetsAt"], "2026-07-10T00:00:00Z");
    }

    #[tokio::test]
    async fn monthly_reset_applies_once_per_anniversary_period() {
        let (ledger, pool) = seeded_ledger(Tier::Free, date(2026, 1, 10)).await;
        ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 5, 20))
            .await
            .unwrap();
        accounts::increment_usage_counters(&pool, "acct-1", 10_000, 0)
            .await
            .unwrap();

        // Still inside the same period: counter untouched.
        let snapshot = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 5))
            .await
            .unwrap();
        assert_eq!(snapshot.monthly_tokens_used, 10_000);

        // Anniversary passed: exactly one reset, repeated checks keep zero.
        let snapshot = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 10))
            .await
            .unwrap();
        assert_eq!(snapshot.monthly_tokens_used, 0);

        accounts::increment_usage_counters(&pool, "acct-1", 777, 0)
            .await
            .unwrap();
        let snapshot = ledger
            .check_at("acct-1", "gpt-4o-mini", date(2026, 6, 20))
            .await
            .unwrap();
        assert_eq!(snapshot.monthly_tokens_used, 777);
    }

    #[tokio::test]
    async fn unknown_stored_tier_falls_back_to_free() {
        let pool = test_pool().await;
        accounts::create_account(&pool, "acct-1", Tier::Free, date(2026, 1, 1))
            .await
            .unwrap();
        sqlx::query("UPDATE accounts SET tier = 'enterprise' WHERE account_id = 'acct-1'")
            .execute(&pool)
            .await
            .unwrap();

        let ledger = QuotaLedger::new(pool);
        let err = ledger
            .check_at("acct-1", "gpt-4o", date(2026, 6, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelNotAllowed);
        assert_eq!(err.details.unwrap()["tier"], "free");
    }

    #[tokio::test]
    async fn missing_account_fails_authentication() {
        let pool = test_pool().await;
        let ledger = QuotaLedger::new(pool);
        let err = ledger
            .check_at("ghost", "gpt-4o-mini", date(2026, 6, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn pro_tier_ignores_limits() {
        let (ledger, pool) = seeded_ledger(Tier::Pro, date(2026, 1, 1)).await;
        accounts::increment_usage_counters(&pool, "acct-1", 10_000_000, 10_000)
            .await
            .unwrap();

        ledger
            .check_at("acct-1", "o1", date(2026, 6, 1))
            .await
            .unwrap();
    }
}
