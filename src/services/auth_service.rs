use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::config::PortalConfig;
use crate::db::now_rfc3339;
use crate::error::AppError;
use crate::models::{
    AuthMethod, ClientInfo, LoginMethod, NewUser, RegistrationRequest, RegistrationStatus, User,
};
use crate::repositories::user_repository::UserRepository;
use crate::services::bot_gate::{BotGate, FormSubmission};
use crate::services::email_service::EmailService;
use crate::services::rate_limit_service::{
    RateLimitAction, RateLimitDecision, RateLimitPolicy, RateLimitService,
};
use crate::services::token_service::{RegistrationVerification, TokenService};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex must compile")
});

/// Normalize an email for lookup and uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Validated registration input, shaped at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

const REGISTRATION_COLUMNS: &str = "id, email, first_name, last_name, token, status, \
     email_verified_at, created_at, expires_at";

/// Ties the bot gate, rate limiter, token store and mail transport together
/// for the three public flows: registration, email verification and
/// magic-link login. Password login is carried for members whose auth
/// method includes it.
pub struct AuthService {
    pool: SqlitePool,
    users: Arc<dyn UserRepository>,
    tokens: TokenService,
    limiter: Arc<RateLimitService>,
    bot_gate: Arc<BotGate>,
    email: Box<dyn EmailService>,
    #[allow(dead_code)]
    config: PortalConfig,
}

impl AuthService {
    pub fn new(
        pool: SqlitePool,
        users: Arc<dyn UserRepository>,
        tokens: TokenService,
        limiter: Arc<RateLimitService>,
        bot_gate: Arc<BotGate>,
        email: Box<dyn EmailService>,
        config: PortalConfig,
    ) -> Self {
        Self {
            pool,
            users,
            tokens,
            limiter,
            bot_gate,
            email,
            config,
        }
    }

    pub fn email_service(&self) -> &dyn EmailService {
        self.email.as_ref()
    }

    pub fn bot_gate(&self) -> &BotGate {
        &self.bot_gate
    }

    pub fn rate_limiter(&self) -> &RateLimitService {
        &self.limiter
    }

    /// Per-IP limit with the store failing closed: an unreachable counter
    /// store denies the request instead of waving it through.
    async fn check_rate(
        &self,
        action: RateLimitAction,
        client: &ClientInfo,
    ) -> Result<(), AppError> {
        let key = client.ip.as_deref().unwrap_or("unknown");
        match self.limiter.allow(action, key, action.policy()).await {
            Ok(RateLimitDecision::Allowed) => Ok(()),
            Ok(RateLimitDecision::Limited {
                retry_after_seconds,
            }) => Err(AppError::RateLimited {
                retry_after_seconds,
            }),
            Err(e) => Err(AppError::StoreUnavailable(e)),
        }
    }

    async fn check_login_rate(&self, email: &str, client: &ClientInfo) -> Result<(), AppError> {
        match self
            .limiter
            .allow_login_email(email, client.ip.as_deref(), RateLimitPolicy::per_email())
            .await
        {
            Ok(RateLimitDecision::Allowed) => Ok(()),
            Ok(RateLimitDecision::Limited {
                retry_after_seconds,
            }) => Err(AppError::RateLimited {
                retry_after_seconds,
            }),
            Err(e) => Err(AppError::StoreUnavailable(e)),
        }
    }

    /// Append to the login audit trail. Best effort: a write failure is
    /// logged but never turns a finished authentication into an error.
    async fn log_attempt(
        &self,
        email: &str,
        client: &ClientInfo,
        method: LoginMethod,
        success: bool,
    ) {
        let result = sqlx::query(
            "INSERT INTO login_attempts (email, ip, method, success, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(email)
        .bind(&client.ip)
        .bind(method)
        .bind(success)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("failed to record login attempt for {email}: {e}");
        }
    }

    /// Handle a public membership application.
    ///
    /// Bot gate and rate limiter run first, then validation and the
    /// uniqueness rules: an existing member or a pending request for the
    /// same address is a duplicate; an old approved/rejected request is
    /// purged so the address can apply again.
    pub async fn submit_registration(
        &self,
        form: &RegistrationForm,
        submission: &FormSubmission<'_>,
        client: &ClientInfo,
    ) -> Result<(), AppError> {
        self.bot_gate.verify(submission).await?;
        self.check_rate(RateLimitAction::Registration, client).await?;

        let email = normalize_email(&form.email);
        if !valid_email(&email) {
            return Err(AppError::Validation { field: "email" });
        }
        let first_name = form.first_name.trim();
        if first_name.is_empty() {
            return Err(AppError::Validation { field: "first_name" });
        }
        let last_name = form.last_name.trim();
        if last_name.is_empty() {
            return Err(AppError::Validation { field: "last_name" });
        }

        if self.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateRegistration);
        }

        let pending: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM registration_requests \
             WHERE email = ? AND status = 'pending'",
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await?
        .get("count");
        if pending > 0 {
            return Err(AppError::DuplicateRegistration);
        }

        // A decided request does not block a fresh application.
        sqlx::query("DELETE FROM registration_requests WHERE email = ? AND status != 'pending'")
            .bind(&email)
            .execute(&self.pool)
            .await?;

        let token = self
            .tokens
            .create_registration_request(&email, first_name, last_name)
            .await?;

        // The request row is already persisted; mail delivery is best
        // effort and must not fail the submission.
        if let Err(e) = self
            .email
            .send_registration_verification(&email, first_name, &token)
            .await
        {
            tracing::error!("failed to send verification email to {email}: {e}");
        }
        let applicant_name = format!("{first_name} {last_name}");
        if let Err(e) = self
            .email
            .send_registration_notice(&email, &applicant_name)
            .await
        {
            tracing::error!("failed to send registration notice for {email}: {e}");
        }

        Ok(())
    }

    /// Confirm the emailed verification link. Repeat visits after success
    /// answer identically without touching state again.
    pub async fn verify_registration(
        &self,
        token: &str,
    ) -> Result<RegistrationVerification, AppError> {
        let verification = self.tokens.verify_registration_token(token).await?;
        if verification.already_verified {
            tracing::info!(
                "registration {} re-verified (idempotent)",
                verification.request.email
            );
        } else {
            tracing::info!("registration {} verified", verification.request.email);
        }
        Ok(verification)
    }

    /// Back-office decision: create the member record and notify the
    /// applicant. Requires a pending, email-verified request.
    pub async fn approve_registration(&self, request_id: i64) -> Result<User, AppError> {
        let request = self
            .find_registration(request_id)
            .await?
            .ok_or(AppError::Validation {
                field: "registration",
            })?;

        if request.status != RegistrationStatus::Pending {
            return Err(AppError::Validation {
                field: "registration",
            });
        }
        if request.email_verified_at.is_none() {
            return Err(AppError::Validation {
                field: "registration",
            });
        }

        let new_user = NewUser {
            email: request.email.clone(),
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
            display_name: format!("{} {}", request.first_name, request.last_name),
            is_admin: false,
            auth_method: AuthMethod::MagicLink,
            email_verified: true,
        };
        let user = self.users.create_user(&new_user).await?;

        sqlx::query("UPDATE registration_requests SET status = 'approved' WHERE id = ?")
            .bind(request.id)
            .execute(&self.pool)
            .await?;

        if let Err(e) = self
            .email
            .send_registration_approved(&user.email, &user.display_name)
            .await
        {
            tracing::error!("failed to send approval email to {}: {e}", user.email);
        }

        Ok(user)
    }

    pub async fn reject_registration(&self, request_id: i64) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE registration_requests SET status = 'rejected' \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Validation {
                field: "registration",
            });
        }
        Ok(())
    }

    pub async fn find_registration(
        &self,
        request_id: i64,
    ) -> Result<Option<RegistrationRequest>, AppError> {
        let request = sqlx::query_as::<_, RegistrationRequest>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registration_requests WHERE id = ?"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    pub async fn list_registrations(
        &self,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<RegistrationRequest>, AppError> {
        let requests = match status {
            Some(status) => {
                sqlx::query_as::<_, RegistrationRequest>(&format!(
                    "SELECT {REGISTRATION_COLUMNS} FROM registration_requests \
                     WHERE status = ? ORDER BY created_at ASC"
                ))
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RegistrationRequest>(&format!(
                    "SELECT {REGISTRATION_COLUMNS} FROM registration_requests \
                     ORDER BY created_at ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(requests)
    }

    /// Handle a magic-link request.
    ///
    /// The answer is identical whether or not the address belongs to a
    /// member; every outcome leaves a login attempt behind for the
    /// per-email rate limit and the audit trail.
    pub async fn request_magic_link(
        &self,
        email: &str,
        submission: &FormSubmission<'_>,
        client: &ClientInfo,
    ) -> Result<(), AppError> {
        self.bot_gate.verify(submission).await?;
        self.check_rate(RateLimitAction::MagicLinkRequest, client)
            .await?;

        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AppError::Validation { field: "email" });
        }

        self.check_login_rate(&email, client).await?;

        let user = match self.find_user_by_email(&email).await? {
            Some(user) if user.email_verified && user.auth_method.allows_magic_link() => user,
            Some(_) | None => {
                // Same generic answer as the success path.
                self.log_attempt(&email, client, LoginMethod::MagicLink, false)
                    .await;
                return Ok(());
            }
        };

        let token = self.tokens.issue_magic_link(user.id, client).await?;

        match self.email.send_magic_login_email(&user.email, &token).await {
            Ok(()) => {
                self.log_attempt(&email, client, LoginMethod::MagicLink, true)
                    .await;
                Ok(())
            }
            Err(e) => {
                self.log_attempt(&email, client, LoginMethod::MagicLink, false)
                    .await;
                Err(AppError::MailTransport(e))
            }
        }
    }

    /// Redeem a magic link and return the member for session
    /// establishment. The token store guarantees single use; failure
    /// reasons stay in the log.
    pub async fn redeem_magic_link(
        &self,
        token: &str,
        client: &ClientInfo,
    ) -> Result<User, AppError> {
        let link = match self.tokens.redeem_magic_link(token).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("magic link redemption failed: {e}");
                return Err(e.into());
            }
        };

        let user = self
            .users
            .find_by_id(link.user_id)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        if let Err(e) = self.users.record_login(user.id).await {
            tracing::error!("failed to stamp last login for {}: {e}", user.email);
        }
        self.log_attempt(&user.email, client, LoginMethod::MagicLink, true)
            .await;

        Ok(user)
    }

    /// Password sign-in for members whose auth method includes it. All
    /// negative branches collapse into the same invalid-credentials error.
    pub async fn authenticate_password(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<User, AppError> {
        let email = normalize_email(email);
        self.check_login_rate(&email, client).await?;

        let user = match self.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.log_attempt(&email, client, LoginMethod::Password, false)
                    .await;
                return Err(AppError::InvalidCredentials);
            }
        };

        let password_matches = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));

        if !password_matches
            || !user.auth_method.allows_password()
            || !user.email_verified
        {
            self.log_attempt(&email, client, LoginMethod::Password, false)
                .await;
            return Err(AppError::InvalidCredentials);
        }

        if let Err(e) = self.users.record_login(user.id).await {
            tracing::error!("failed to stamp last login for {}: {e}", user.email);
        }
        self.log_attempt(&email, client, LoginMethod::Password, true)
            .await;

        Ok(user)
    }

    /// Drop audit rows older than the retention period (maintenance CLI).
    pub async fn prune_login_attempts(&self, older_than_days: i64) -> Result<u64, AppError> {
        let cutoff = crate::db::to_rfc3339(
            chrono::Utc::now() - chrono::Duration::days(older_than_days),
        );
        let result = sqlx::query("DELETE FROM login_attempts WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.find_by_email(email).await?)
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    if let Ok(parsed_hash) = PasswordHash::new(password_hash) {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    } else {
        false
    }
}
