pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use config::PortalConfig;
use repositories::user_repository::SqliteUserRepository;
use services::auth_service::AuthService;
use services::bot_gate::BotGate;
use services::email_service::EmailService;
use services::rate_limit_service::RateLimitService;
use services::token_service::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimitService>,
    pub bot_gate: Arc<BotGate>,
    pub pool: sqlx::SqlitePool,
}

impl AppState {
    /// Wire the services over one pool. The email sender and bot gate are
    /// passed in so binaries and tests can pick their own.
    pub fn build(
        pool: sqlx::SqlitePool,
        email: Box<dyn EmailService>,
        bot_gate: BotGate,
        config: PortalConfig,
    ) -> Self {
        let user_repository = Arc::new(SqliteUserRepository::new(pool.clone()));
        let rate_limiter = Arc::new(RateLimitService::new(pool.clone()));
        let bot_gate = Arc::new(bot_gate);
        let auth_service = Arc::new(AuthService::new(
            pool.clone(),
            user_repository,
            TokenService::new(pool.clone()),
            rate_limiter.clone(),
            bot_gate.clone(),
            email,
            config,
        ));

        AppState {
            auth_service,
            rate_limiter,
            bot_gate,
            pool,
        }
    }
}

/// All routes, without the session/trace layers (binaries and tests add
/// their own).
pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/me", get(handlers::auth_handlers::me_handler))
        .layer(axum::middleware::from_fn(middleware::require_auth));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/contact",
            get(handlers::contact_handlers::show_contact_form)
                .post(handlers::contact_handlers::submit_contact_form),
        )
        .route(
            "/auth/register",
            get(handlers::auth_handlers::show_register_form)
                .post(handlers::auth_handlers::register_handler),
        )
        .route(
            "/auth/magiclink",
            get(handlers::auth_handlers::show_magiclink_form)
                .post(handlers::auth_handlers::magiclink_request_handler),
        )
        .route("/auth/login", post(handlers::auth_handlers::login_handler))
        // Link paths kept byte-compatible with emails the previous system
        // already delivered.
        .route(
            "/verify_registration.php",
            get(handlers::auth_handlers::verify_registration_handler),
        )
        .route(
            "/verify_magiclink.php",
            get(handlers::auth_handlers::verify_magiclink_handler),
        )
        .route("/logout", get(handlers::auth_handlers::logout_handler))
        .merge(protected_routes)
        .with_state(state)
}
