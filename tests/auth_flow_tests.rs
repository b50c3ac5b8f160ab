use async_trait::async_trait;
use chrono::Utc;
use ffw_portal::error::AppError;
use ffw_portal::models::{AuthMethod, ClientInfo};
use ffw_portal::services::auth_service::RegistrationForm;
use ffw_portal::services::bot_gate::{BotGate, FormSubmission, AUTH_MIN_DWELL_SECONDS};
use ffw_portal::services::email_service::{EmailError, EmailService, OutgoingEmail};
use ffw_portal::test_utils::test_helpers;
use ffw_portal::AppState;
use sqlx::Row;

fn human_submission() -> FormSubmission<'static> {
    FormSubmission {
        honeypot: "",
        displayed_at_unix: Some(Utc::now().timestamp() - 60),
        min_dwell_seconds: AUTH_MIN_DWELL_SECONDS,
        challenge_response: None,
        remote_ip: None,
    }
}

fn test_client() -> ClientInfo {
    ClientInfo {
        ip: Some("203.0.113.10".to_string()),
        user_agent: Some("Mozilla/5.0 (Test)".to_string()),
    }
}

fn registration_form(email: &str) -> RegistrationForm {
    RegistrationForm {
        first_name: "Anna".to_string(),
        last_name: "Brand".to_string(),
        email: email.to_string(),
    }
}

async fn registration_token(pool: &sqlx::SqlitePool, email: &str) -> String {
    sqlx::query("SELECT token FROM registration_requests WHERE email = ? AND status = 'pending'")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("token")
}

/// Sender that refuses every delivery, for the best-effort paths.
struct FailingEmailService;

#[async_trait]
impl EmailService for FailingEmailService {
    async fn send_registration_verification(
        &self,
        _to_email: &str,
        _first_name: &str,
        _token: &str,
    ) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("mailhost down".to_string()))
    }

    async fn send_registration_notice(
        &self,
        _applicant_email: &str,
        _applicant_name: &str,
    ) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("mailhost down".to_string()))
    }

    async fn send_registration_approved(
        &self,
        _to_email: &str,
        _display_name: &str,
    ) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("mailhost down".to_string()))
    }

    async fn send_magic_login_email(
        &self,
        _to_email: &str,
        _token: &str,
    ) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("mailhost down".to_string()))
    }

    async fn send_contact_message(
        &self,
        _from_email: &str,
        _from_name: Option<&str>,
        _message: &str,
    ) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("mailhost down".to_string()))
    }

    async fn send_message(&self, _email: &OutgoingEmail) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("mailhost down".to_string()))
    }
}

fn failing_mail_state(pool: sqlx::SqlitePool) -> AppState {
    AppState::build(
        pool,
        Box::new(FailingEmailService),
        BotGate::new(None),
        test_helpers::test_config(),
    )
}

#[tokio::test]
async fn test_registration_end_to_end() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());

    state
        .auth_service
        .submit_registration(&registration_form("anna@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();

    let row = sqlx::query(
        "SELECT status, email_verified_at FROM registration_requests WHERE email = ?",
    )
    .bind("anna@example.com")
    .fetch_one(&pool)
    .await
    .unwrap();
    let status: String = row.get("status");
    let verified_at: Option<String> = row.get("email_verified_at");
    assert_eq!(status, "pending");
    assert!(verified_at.is_none());

    let token = registration_token(&pool, "anna@example.com").await;
    let first = state.auth_service.verify_registration(&token).await.unwrap();
    assert!(!first.already_verified);
    assert!(first.request.email_verified_at.is_some());

    // A second visit of the same link reports success without changes.
    let second = state.auth_service.verify_registration(&token).await.unwrap();
    assert!(second.already_verified);
    assert_eq!(
        second.request.email_verified_at,
        first.request.email_verified_at
    );
}

#[tokio::test]
async fn test_duplicate_registration_while_pending() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());

    state
        .auth_service
        .submit_registration(&registration_form("doppelt@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();

    let result = state
        .auth_service
        .submit_registration(&registration_form("doppelt@example.com"), &human_submission(), &test_client())
        .await;
    assert!(matches!(result, Err(AppError::DuplicateRegistration)));
}

#[tokio::test]
async fn test_registration_retry_after_rejection() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());

    state
        .auth_service
        .submit_registration(&registration_form("retry@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();

    let id: i64 = sqlx::query("SELECT id FROM registration_requests WHERE email = ?")
        .bind("retry@example.com")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("id");
    state.auth_service.reject_registration(id).await.unwrap();

    // The rejected request no longer blocks a fresh application.
    state
        .auth_service
        .submit_registration(&registration_form("retry@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();

    let pending: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM registration_requests \
         WHERE email = ? AND status = 'pending'",
    )
    .bind("retry@example.com")
    .fetch_one(&pool)
    .await
    .unwrap()
    .get("count");
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn test_registration_rejected_for_existing_member() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    test_helpers::insert_test_user(
        &pool,
        "mitglied@example.com",
        "Martin",
        "Mitglied",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    let result = state
        .auth_service
        .submit_registration(&registration_form("mitglied@example.com"), &human_submission(), &test_client())
        .await;
    assert!(matches!(result, Err(AppError::DuplicateRegistration)));
}

#[tokio::test]
async fn test_bot_submission_rejected_before_any_write() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());

    let submission = FormSubmission {
        honeypot: "https://spam.example",
        ..human_submission()
    };
    let result = state
        .auth_service
        .submit_registration(&registration_form("bot@example.com"), &submission, &test_client())
        .await;
    assert!(matches!(result, Err(AppError::BotSuspected(_))));

    let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM registration_requests")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_registration_survives_mail_outage() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = failing_mail_state(pool.clone());

    // The request row is the primary write; mail is best effort.
    state
        .auth_service
        .submit_registration(&registration_form("offline@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();

    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM registration_requests WHERE email = ?",
    )
    .bind("offline@example.com")
    .fetch_one(&pool)
    .await
    .unwrap()
    .get("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_approval_creates_member_and_marks_request() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());

    state
        .auth_service
        .submit_registration(&registration_form("frisch@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();
    let token = registration_token(&pool, "frisch@example.com").await;
    state.auth_service.verify_registration(&token).await.unwrap();

    let id: i64 = sqlx::query("SELECT id FROM registration_requests WHERE email = ?")
        .bind("frisch@example.com")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("id");

    let user = state.auth_service.approve_registration(id).await.unwrap();
    assert_eq!(user.email, "frisch@example.com");
    assert_eq!(user.display_name, "Anna Brand");
    assert_eq!(user.auth_method, AuthMethod::MagicLink);
    assert!(user.email_verified);
    assert!(!user.is_admin);

    let status: String = sqlx::query("SELECT status FROM registration_requests WHERE id = ?")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("status");
    assert_eq!(status, "approved");

    // A second approval of the same request fails.
    let result = state.auth_service.approve_registration(id).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_approval_requires_verified_email() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());

    state
        .auth_service
        .submit_registration(&registration_form("eilig@example.com"), &human_submission(), &test_client())
        .await
        .unwrap();
    let id: i64 = sqlx::query("SELECT id FROM registration_requests WHERE email = ?")
        .bind("eilig@example.com")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("id");

    let result = state.auth_service.approve_registration(id).await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
}

#[tokio::test]
async fn test_magic_link_request_is_opaque_about_accounts() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    test_helpers::insert_test_user(
        &pool,
        "echt@example.com",
        "Erika",
        "Echt",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    // Unknown address: generic success, no token, failed attempt logged.
    state
        .auth_service
        .request_magic_link("niemand@example.com", &human_submission(), &test_client())
        .await
        .unwrap();

    // Known address: the same unit result.
    state
        .auth_service
        .request_magic_link("echt@example.com", &human_submission(), &test_client())
        .await
        .unwrap();

    let tokens: i64 = sqlx::query("SELECT COUNT(*) AS count FROM magic_links")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
    assert_eq!(tokens, 1);

    let row = sqlx::query(
        "SELECT success FROM login_attempts WHERE email = ? ORDER BY id DESC LIMIT 1",
    )
    .bind("niemand@example.com")
    .fetch_one(&pool)
    .await
    .unwrap();
    let success: bool = row.get("success");
    assert!(!success);
}

#[tokio::test]
async fn test_magic_link_not_issued_for_password_only_member() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    test_helpers::insert_test_user(
        &pool,
        "klassisch@example.com",
        "Karl",
        "Klassisch",
        AuthMethod::Password,
        true,
    )
    .await
    .unwrap();

    state
        .auth_service
        .request_magic_link("klassisch@example.com", &human_submission(), &test_client())
        .await
        .unwrap();

    let tokens: i64 = sqlx::query("SELECT COUNT(*) AS count FROM magic_links")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
    assert_eq!(tokens, 0);
}

#[tokio::test]
async fn test_magic_link_login_end_to_end() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    let user_id = test_helpers::insert_test_user(
        &pool,
        "wehr@example.com",
        "Willi",
        "Wehr",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    state
        .auth_service
        .request_magic_link("wehr@example.com", &human_submission(), &test_client())
        .await
        .unwrap();

    let token: String = sqlx::query("SELECT token FROM magic_links WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("token");

    let user = state
        .auth_service
        .redeem_magic_link(&token, &test_client())
        .await
        .unwrap();
    assert_eq!(user.id, user_id);

    // Redemption stamps the login time and leaves a successful attempt.
    let last_login: Option<String> = sqlx::query("SELECT last_login_at FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("last_login_at");
    assert!(last_login.is_some());

    let successes: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM login_attempts WHERE email = ? AND success = 1",
    )
    .bind("wehr@example.com")
    .fetch_one(&pool)
    .await
    .unwrap()
    .get("count");
    assert!(successes >= 2);

    // Replay of the spent link collapses to the generic link error.
    let replay = state
        .auth_service
        .redeem_magic_link(&token, &test_client())
        .await;
    match replay {
        Err(err @ AppError::TokenAlreadyUsed) => {
            assert_eq!(err.user_message(), AppError::TokenNotFound.user_message());
        }
        other => panic!("expected TokenAlreadyUsed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_magic_link_request_fails_generically_when_mail_is_down() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = failing_mail_state(pool.clone());
    test_helpers::insert_test_user(
        &pool,
        "pech@example.com",
        "Paula",
        "Pech",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    let result = state
        .auth_service
        .request_magic_link("pech@example.com", &human_submission(), &test_client())
        .await;
    assert!(matches!(result, Err(AppError::MailTransport(_))));

    let row = sqlx::query(
        "SELECT success FROM login_attempts WHERE email = ? ORDER BY id DESC LIMIT 1",
    )
    .bind("pech@example.com")
    .fetch_one(&pool)
    .await
    .unwrap();
    let success: bool = row.get("success");
    assert!(!success);
}

#[tokio::test]
async fn test_per_email_limit_applies_to_magic_link_requests() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    test_helpers::insert_test_user(
        &pool,
        "fleissig@example.com",
        "Fiona",
        "Fleissig",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    for _ in 0..3 {
        state
            .auth_service
            .request_magic_link("fleissig@example.com", &human_submission(), &test_client())
            .await
            .unwrap();
    }

    let result = state
        .auth_service
        .request_magic_link("fleissig@example.com", &human_submission(), &test_client())
        .await;
    assert!(matches!(result, Err(AppError::RateLimited { .. })));
}

#[tokio::test]
async fn test_rate_limiter_fails_closed_when_store_unavailable() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    pool.close().await;

    let result = state
        .auth_service
        .request_magic_link("egal@example.com", &human_submission(), &test_client())
        .await;
    assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
}

#[tokio::test]
async fn test_password_login_round_trip() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    let user_id = test_helpers::insert_test_user(
        &pool,
        "beides@example.com",
        "Bernd",
        "Beides",
        AuthMethod::Both,
        true,
    )
    .await
    .unwrap();
    test_helpers::set_test_password(&pool, user_id, "florian-112!").await.unwrap();

    let user = state
        .auth_service
        .authenticate_password("beides@example.com", "florian-112!", &test_client())
        .await
        .unwrap();
    assert_eq!(user.id, user_id);

    let wrong = state
        .auth_service
        .authenticate_password("beides@example.com", "falsch", &test_client())
        .await;
    assert!(matches!(wrong, Err(AppError::InvalidCredentials)));

    let unknown = state
        .auth_service
        .authenticate_password("fremd@example.com", "florian-112!", &test_client())
        .await;
    assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
}

#[tokio::test]
async fn test_password_login_refused_for_magic_link_only_member() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = test_helpers::test_state(pool.clone());
    let user_id = test_helpers::insert_test_user(
        &pool,
        "nurlink@example.com",
        "Nina",
        "Nurlink",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();
    test_helpers::set_test_password(&pool, user_id, "florian-112!").await.unwrap();

    let result = state
        .auth_service
        .authenticate_password("nurlink@example.com", "florian-112!", &test_client())
        .await;
    assert!(matches!(result, Err(AppError::InvalidCredentials)));
}
