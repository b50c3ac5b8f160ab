use chrono::{DateTime, Duration, Utc};
use ffw_portal::db::to_rfc3339;
use ffw_portal::models::{AuthMethod, ClientInfo};
use ffw_portal::services::token_service::{TokenError, TokenService};
use ffw_portal::test_utils::test_helpers;
use sqlx::Row;

fn test_client() -> ClientInfo {
    ClientInfo {
        ip: Some("203.0.113.7".to_string()),
        user_agent: Some("Mozilla/5.0 (Test)".to_string()),
    }
}

#[tokio::test]
async fn test_magic_link_redeemed_exactly_once() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let user_id = test_helpers::insert_test_user(
        &pool,
        "wehrleiter@example.com",
        "Jens",
        "Brandt",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    let service = TokenService::new(pool.clone());
    let token = service.issue_magic_link(user_id, &test_client()).await.unwrap();

    let link = service.redeem_magic_link(&token).await.unwrap();
    assert_eq!(link.user_id, user_id);
    assert!(link.used_at.is_some());
    assert_eq!(link.request_ip.as_deref(), Some("203.0.113.7"));

    // Every further redemption of the same token fails as already used.
    for _ in 0..3 {
        let result = service.redeem_magic_link(&token).await;
        assert!(matches!(result, Err(TokenError::AlreadyUsed)));
    }
}

#[tokio::test]
async fn test_unknown_token_not_found() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = TokenService::new(pool);

    let result = service.redeem_magic_link("doesnotexist").await;
    assert!(matches!(result, Err(TokenError::NotFound)));
}

#[tokio::test]
async fn test_expired_magic_link_rejected() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let user_id = test_helpers::insert_test_user(
        &pool,
        "alt@example.com",
        "Alte",
        "Glocke",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    let service = TokenService::new(pool.clone());
    let token = service.issue_magic_link(user_id, &test_client()).await.unwrap();

    // Age the token past its window.
    let past = to_rfc3339(Utc::now() - Duration::minutes(16));
    sqlx::query("UPDATE magic_links SET expires_at = ? WHERE token = ?")
        .bind(&past)
        .bind(&token)
        .execute(&pool)
        .await
        .unwrap();

    let result = service.redeem_magic_link(&token).await;
    assert!(matches!(result, Err(TokenError::Expired)));

    // Expiry is permanent; the token never becomes redeemable again.
    let result = service.redeem_magic_link(&token).await;
    assert!(matches!(result, Err(TokenError::Expired)));
}

#[tokio::test]
async fn test_magic_link_expires_fifteen_minutes_after_issue() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let user_id = test_helpers::insert_test_user(
        &pool,
        "frisch@example.com",
        "Frieda",
        "Funke",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    let service = TokenService::new(pool.clone());
    let token = service.issue_magic_link(user_id, &test_client()).await.unwrap();

    let expires_at: String = sqlx::query("SELECT expires_at FROM magic_links WHERE token = ?")
        .bind(&token)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("expires_at");
    let expires_at = DateTime::parse_from_rfc3339(&expires_at).unwrap();
    let ttl = expires_at.with_timezone(&Utc) - Utc::now();

    assert!(ttl <= Duration::minutes(15));
    assert!(ttl > Duration::minutes(14));
}

#[tokio::test]
async fn test_registration_token_valid_for_two_days() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = TokenService::new(pool.clone());

    let token = service
        .create_registration_request("neu@example.com", "Nora", "Neuling")
        .await
        .unwrap();
    assert_eq!(token.len(), 64);

    let expires_at: String =
        sqlx::query("SELECT expires_at FROM registration_requests WHERE token = ?")
            .bind(&token)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("expires_at");
    let expires_at = DateTime::parse_from_rfc3339(&expires_at).unwrap();
    let ttl = expires_at.with_timezone(&Utc) - Utc::now();

    assert!(ttl <= Duration::hours(48));
    assert!(ttl > Duration::hours(47));
}

#[tokio::test]
async fn test_registration_verification_is_idempotent() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = TokenService::new(pool.clone());

    let token = service
        .create_registration_request("idem@example.com", "Ida", "Immer")
        .await
        .unwrap();

    let first = service.verify_registration_token(&token).await.unwrap();
    assert!(!first.already_verified);
    let stamped = first.request.email_verified_at.clone().unwrap();

    let second = service.verify_registration_token(&token).await.unwrap();
    assert!(second.already_verified);
    // The original stamp is untouched by the repeat visit.
    assert_eq!(second.request.email_verified_at.as_deref(), Some(stamped.as_str()));
}

#[tokio::test]
async fn test_expired_registration_token_rejected() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let service = TokenService::new(pool.clone());

    let token = service
        .create_registration_request("spaet@example.com", "Sina", "Später")
        .await
        .unwrap();

    let past = to_rfc3339(Utc::now() - Duration::hours(1));
    sqlx::query("UPDATE registration_requests SET expires_at = ? WHERE token = ?")
        .bind(&past)
        .bind(&token)
        .execute(&pool)
        .await
        .unwrap();

    let result = service.verify_registration_token(&token).await;
    assert!(matches!(result, Err(TokenError::Expired)));
}

#[tokio::test]
async fn test_cleanup_removes_expired_and_spent_tokens() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let user_id = test_helpers::insert_test_user(
        &pool,
        "putz@example.com",
        "Paul",
        "Putzer",
        AuthMethod::MagicLink,
        true,
    )
    .await
    .unwrap();

    let service = TokenService::new(pool.clone());
    let fresh = service.issue_magic_link(user_id, &test_client()).await.unwrap();
    let expired = service.issue_magic_link(user_id, &test_client()).await.unwrap();
    let spent = service.issue_magic_link(user_id, &test_client()).await.unwrap();

    let long_ago = to_rfc3339(Utc::now() - Duration::days(60));
    sqlx::query("UPDATE magic_links SET expires_at = ? WHERE token = ?")
        .bind(&long_ago)
        .bind(&expired)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE magic_links SET used_at = ? WHERE token = ?")
        .bind(&long_ago)
        .bind(&spent)
        .execute(&pool)
        .await
        .unwrap();

    // Stale unverified registration requests go too; verified ones stay.
    let stale = service
        .create_registration_request("stale@example.com", "Stefan", "Stau")
        .await
        .unwrap();
    let verified = service
        .create_registration_request("bleibt@example.com", "Berta", "Bleibt")
        .await
        .unwrap();
    service.verify_registration_token(&verified).await.unwrap();
    let past = to_rfc3339(Utc::now() - Duration::hours(1));
    sqlx::query("UPDATE registration_requests SET expires_at = ?")
        .bind(&past)
        .execute(&pool)
        .await
        .unwrap();

    let removed = service.cleanup_expired(30).await.unwrap();
    assert_eq!(removed, 3);

    let remaining: i64 = sqlx::query("SELECT COUNT(*) AS count FROM magic_links")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
    assert_eq!(remaining, 1);

    let kept: i64 = sqlx::query("SELECT COUNT(*) AS count FROM registration_requests")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
    assert_eq!(kept, 1);

    // The survivors are the fresh link and the verified request.
    assert!(service.redeem_magic_link(&fresh).await.is_ok());
    let stale_left: i64 =
        sqlx::query("SELECT COUNT(*) AS count FROM registration_requests WHERE token = ?")
            .bind(&stale)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("count");
    assert_eq!(stale_left, 0);
}
