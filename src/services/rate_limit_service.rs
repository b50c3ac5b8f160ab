use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use crate::db::{now_rfc3339, to_rfc3339};

/// Public actions throttled independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAction {
    ContactForm,
    Registration,
    MagicLinkRequest,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::ContactForm => "contact_form",
            RateLimitAction::Registration => "registration",
            RateLimitAction::MagicLinkRequest => "magic_link_request",
        }
    }

    /// Per-IP policy for this action.
    pub fn policy(&self) -> RateLimitPolicy {
        match self {
            RateLimitAction::ContactForm => RateLimitPolicy::new(3, 3600),
            RateLimitAction::Registration => RateLimitPolicy::new(3, 3600),
            RateLimitAction::MagicLinkRequest => RateLimitPolicy::new(10, 900),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: i64,
    pub window_seconds: i64,
}

impl RateLimitPolicy {
    pub const fn new(max_attempts: i64, window_seconds: i64) -> Self {
        Self {
            max_attempts,
            window_seconds,
        }
    }

    /// Finer per-email+IP policy for login and magic-link requests,
    /// evaluated against the login attempt history.
    pub const fn per_email() -> Self {
        Self::new(3, 900)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: i64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

/// Trailing-window limiter over stored attempt timestamps.
///
/// The window slides: each check counts attempts in the last
/// `window_seconds` measured from now, not from a calendar boundary.
/// Callers must treat a store error as a denial, never as permission.
pub struct RateLimitService {
    pool: SqlitePool,
}

impl RateLimitService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Count prior attempts for `(action, client_key)` in the trailing
    /// window and record this one if still under the limit. Denied calls
    /// are not recorded, so the window drains on its own.
    pub async fn allow(
        &self,
        action: RateLimitAction,
        client_key: &str,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitDecision, sqlx::Error> {
        let now = Utc::now();
        let window_start = to_rfc3339(now - Duration::seconds(policy.window_seconds));

        let mut tx = self.pool.begin().await?;

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM rate_events \
             WHERE action = ? AND client_key = ? AND created_at > ?",
        )
        .bind(action.as_str())
        .bind(client_key)
        .bind(&window_start)
        .fetch_one(&mut *tx)
        .await?
        .get("count");

        if count >= policy.max_attempts {
            let earliest: Option<String> = sqlx::query(
                "SELECT MIN(created_at) AS earliest FROM rate_events \
                 WHERE action = ? AND client_key = ? AND created_at > ?",
            )
            .bind(action.as_str())
            .bind(client_key)
            .bind(&window_start)
            .fetch_one(&mut *tx)
            .await?
            .get("earliest");

            tx.rollback().await?;
            return Ok(RateLimitDecision::Limited {
                retry_after_seconds: retry_after(earliest.as_deref(), policy, now),
            });
        }

        sqlx::query("INSERT INTO rate_events (action, client_key, created_at) VALUES (?, ?, ?)")
            .bind(action.as_str())
            .bind(client_key)
            .bind(now_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(RateLimitDecision::Allowed)
    }

    /// Check the per-email+IP limit against the login attempt history.
    /// Purely a read; the orchestrator records the attempt itself.
    pub async fn allow_login_email(
        &self,
        email: &str,
        ip: Option<&str>,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitDecision, sqlx::Error> {
        let now = Utc::now();
        let window_start = to_rfc3339(now - Duration::seconds(policy.window_seconds));
        let ip = ip.unwrap_or("");

        let row = sqlx::query(
            "SELECT COUNT(*) AS count, MIN(created_at) AS earliest FROM login_attempts \
             WHERE email = ? AND COALESCE(ip, '') = ? AND created_at > ?",
        )
        .bind(email)
        .bind(ip)
        .bind(&window_start)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        if count >= policy.max_attempts {
            let earliest: Option<String> = row.get("earliest");
            return Ok(RateLimitDecision::Limited {
                retry_after_seconds: retry_after(earliest.as_deref(), policy, now),
            });
        }

        Ok(RateLimitDecision::Allowed)
    }

    /// Drop rate events older than the largest configured window. Invoked
    /// by the maintenance CLI.
    pub async fn prune_events(&self, older_than_seconds: i64) -> Result<u64, sqlx::Error> {
        let cutoff = to_rfc3339(Utc::now() - Duration::seconds(older_than_seconds));
        let result = sqlx::query("DELETE FROM rate_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Seconds until the earliest counted attempt leaves the window.
fn retry_after(earliest: Option<&str>, policy: RateLimitPolicy, now: DateTime<Utc>) -> i64 {
    let Some(earliest) = earliest else {
        return policy.window_seconds;
    };
    match DateTime::parse_from_rfc3339(earliest) {
        Ok(earliest) => {
            let free_at = earliest.with_timezone(&Utc) + Duration::seconds(policy.window_seconds);
            (free_at - now).num_seconds().max(1)
        }
        Err(_) => policy.window_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_counts_from_earliest_attempt() {
        let now = Utc::now();
        let policy = RateLimitPolicy::new(3, 900);
        let earliest = to_rfc3339(now - Duration::seconds(300));
        let wait = retry_after(Some(&earliest), policy, now);
        assert!((595..=600).contains(&wait));
    }

    #[test]
    fn test_retry_after_without_earliest_falls_back_to_window() {
        let policy = RateLimitPolicy::new(3, 900);
        assert_eq!(retry_after(None, policy, Utc::now()), 900);
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let now = Utc::now();
        let policy = RateLimitPolicy::new(3, 900);
        let earliest = to_rfc3339(now - Duration::seconds(901));
        assert_eq!(retry_after(Some(&earliest), policy, now), 1);
    }
}
