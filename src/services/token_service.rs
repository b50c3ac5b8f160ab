use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::SqlitePool;

use crate::db::{now_rfc3339, to_rfc3339};
use crate::models::{ClientInfo, MagicLink, RegistrationRequest};

/// Lifetime of a magic login link.
pub const MAGIC_LINK_TTL_MINUTES: i64 = 15;
/// Lifetime of a registration verification link.
pub const REGISTRATION_TOKEN_TTL_HOURS: i64 = 48;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,
    #[error("Token expired")]
    Expired,
    #[error("Token already used")]
    AlreadyUsed,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a registration verification lookup.
#[derive(Debug)]
pub struct RegistrationVerification {
    pub request: RegistrationRequest,
    /// True when the link had already been confirmed before this visit.
    pub already_verified: bool,
}

/// Persistence of single-use, time-limited tokens: magic login links and
/// registration verification tokens. Tokens are opaque 256-bit random
/// values; nothing about the subject is derivable from the string.
pub struct TokenService {
    pool: SqlitePool,
}

impl TokenService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 32 random bytes, hex encoded (64 characters).
    pub fn generate_token() -> String {
        let mut rng = rand::thread_rng();
        let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        hex::encode(bytes)
    }

    /// Create a magic login token for a member, capturing the requesting
    /// client for the audit trail.
    pub async fn issue_magic_link(
        &self,
        user_id: i64,
        client: &ClientInfo,
    ) -> Result<String, sqlx::Error> {
        let token = Self::generate_token();
        let expires_at = to_rfc3339(Utc::now() + Duration::minutes(MAGIC_LINK_TTL_MINUTES));

        sqlx::query(
            "INSERT INTO magic_links \
             (user_id, token, created_at, expires_at, request_ip, request_user_agent) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&token)
        .bind(now_rfc3339())
        .bind(expires_at)
        .bind(&client.ip)
        .bind(&client.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    /// Redeem a magic link, marking it used in the same statement that
    /// checks validity. Of two concurrent redemptions exactly one sees a
    /// row update; the loser gets the already-used/expired diagnosis from
    /// the follow-up lookup.
    pub async fn redeem_magic_link(&self, token: &str) -> Result<MagicLink, TokenError> {
        let now = now_rfc3339();
        let updated = sqlx::query(
            "UPDATE magic_links SET used_at = ? \
             WHERE token = ? AND used_at IS NULL AND expires_at > ?",
        )
        .bind(&now)
        .bind(token)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            let link = sqlx::query_as::<_, MagicLink>(
                "SELECT id, user_id, token, created_at, expires_at, used_at, \
                 request_ip, request_user_agent \
                 FROM magic_links WHERE token = ?",
            )
            .bind(token)
            .fetch_one(&self.pool)
            .await?;
            return Ok(link);
        }

        // No row was claimed: distinguish why, for the log only.
        let existing = sqlx::query_as::<_, MagicLink>(
            "SELECT id, user_id, token, created_at, expires_at, used_at, \
             request_ip, request_user_agent \
             FROM magic_links WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            None => Err(TokenError::NotFound),
            Some(link) if link.used_at.is_some() => Err(TokenError::AlreadyUsed),
            Some(_) => Err(TokenError::Expired),
        }
    }

    /// Insert a pending registration request with a fresh verification
    /// token. Uniqueness against existing users and pending requests is the
    /// caller's concern; the partial unique index backs it up.
    pub async fn create_registration_request(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<String, sqlx::Error> {
        let token = Self::generate_token();
        let expires_at = to_rfc3339(Utc::now() + Duration::hours(REGISTRATION_TOKEN_TTL_HOURS));

        sqlx::query(
            "INSERT INTO registration_requests \
             (email, first_name, last_name, token, status, created_at, expires_at) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(&token)
        .bind(now_rfc3339())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    /// Confirm a registration verification link. Repeat visits after a
    /// successful confirmation are reported as already verified so the
    /// caller can answer idempotently.
    pub async fn verify_registration_token(
        &self,
        token: &str,
    ) -> Result<RegistrationVerification, TokenError> {
        let request = sqlx::query_as::<_, RegistrationRequest>(
            "SELECT id, email, first_name, last_name, token, status, \
             email_verified_at, created_at, expires_at \
             FROM registration_requests WHERE token = ? AND status = 'pending'",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TokenError::NotFound)?;

        if request.email_verified_at.is_some() {
            return Ok(RegistrationVerification {
                request,
                already_verified: true,
            });
        }

        if request.expires_at < now_rfc3339() {
            return Err(TokenError::Expired);
        }

        let verified_at = now_rfc3339();
        sqlx::query(
            "UPDATE registration_requests SET email_verified_at = ? \
             WHERE id = ? AND email_verified_at IS NULL",
        )
        .bind(&verified_at)
        .bind(request.id)
        .execute(&self.pool)
        .await?;

        let mut request = request;
        request.email_verified_at = Some(verified_at);
        Ok(RegistrationVerification {
            request,
            already_verified: false,
        })
    }

    /// Delete expired and long-since-used tokens. Invoked by the
    /// maintenance CLI, never from the request path.
    pub async fn cleanup_expired(&self, used_retention_days: i64) -> Result<u64, sqlx::Error> {
        let now = now_rfc3339();
        let used_cutoff = to_rfc3339(Utc::now() - Duration::days(used_retention_days));
        let mut removed = 0;

        let result = sqlx::query("DELETE FROM magic_links WHERE expires_at < ?")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        removed += result.rows_affected();

        let result = sqlx::query("DELETE FROM magic_links WHERE used_at IS NOT NULL AND used_at < ?")
            .bind(&used_cutoff)
            .execute(&self.pool)
            .await?;
        removed += result.rows_affected();

        // Verified requests stay until the admin decision, however old.
        let result = sqlx::query(
            "DELETE FROM registration_requests \
             WHERE status = 'pending' AND email_verified_at IS NULL AND expires_at < ?",
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;
        removed += result.rows_affected();

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_shape() {
        let token = TokenService::generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(TokenService::generate_token(), TokenService::generate_token());
    }
}
