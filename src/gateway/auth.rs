use crate::error::{ErrorKind, GatewayError, Result};
use crate::store::accounts;
use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// Credentials are stored as SHA-256 hex digests; the raw token is only ever
/// seen at issue time and on the wire.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Mint a fresh bearer token for an account (CLI issue path).
#[must_use]
pub fn generate_token() -> String {
    format!("tg_{}", uuid::Uuid::new_v4().simple())
}

/// Map a bearer credential to an account id.
pub async fn authenticate(pool: &SqlitePool, headers: &HeaderMap) -> Result<String> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            GatewayError::new(
                ErrorKind::AuthenticationFailed,
                "missing Authorization header; send \"Authorization: Bearer <token>\"",
            )
        })?;

    let token = authorization.strip_prefix("Bearer ").ok_or_else(|| {
        GatewayError::new(
            ErrorKind::AuthenticationFailed,
            "malformed Authorization header; expected a bearer token",
        )
    })?;

    accounts::account_id_for_token_hash(pool, &hash_token(token.trim()))
        .await?
        .ok_or_else(|| {
            GatewayError::new(
                ErrorKind::AuthenticationFailed,
                "unknown credential; check the token or issue a new one",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::Tier;
    use crate::store::test_pool;
    use axum::http::HeaderValue;
    use chrono::NaiveDate;

    async fn pool_with_credential(token: &str) -> SqlitePool {
        let pool = test_pool().await;
        accounts::create_account(
            &pool,
            "acct-1",
            Tier::Free,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        )
        .await
        .unwrap();
        accounts::insert_credential(&pool, &hash_token(token), "acct-1")
            .await
            .unwrap();
        pool
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn hashing_is_stable_and_hex() {
        let hash = hash_token("tg_sample");
        assert_eq!(hash, hash_token("tg_sample"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[tokio::test]
    async fn valid_bearer_resolves_account() {
        let pool = pool_with_credential("tg_good").await;
        let account = authenticate(&pool, &bearer("tg_good")).await.unwrap();
        assert_eq!(account, "acct-1");
    }

    #[tokio::test]
    async fn unknown_token_fails_authentication() {
        let pool = pool_with_credential("tg_good").await;
        let err = authenticate(&pool, &bearer("tg_wrong")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn missing_and_malformed_headers_fail() {
        let pool = pool_with_credential("tg_good").await;

        let err = authenticate(&pool, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        let err = authenticate(&pool, &headers).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
    }
}
