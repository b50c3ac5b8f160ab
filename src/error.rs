use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::repositories::user_repository::RepositoryError;
use crate::services::bot_gate::BotGateError;
use crate::services::email_service::EmailError;
use crate::services::token_service::TokenError;

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure taxonomy of the auth and contact flows.
///
/// Variants carry enough detail for logging; the HTTP mapping below
/// deliberately collapses them into a handful of generic, localized
/// messages so that neither bot-gate internals nor token state nor
/// account existence can be probed from the outside.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("submission rejected by bot gate: {0}")]
    BotSuspected(#[from] BotGateError),

    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    #[error("validation failed for {field}")]
    Validation { field: &'static str },

    #[error("duplicate registration")]
    DuplicateRegistration,

    #[error("token not found")]
    TokenNotFound,

    #[error("token expired")]
    TokenExpired,

    #[error("token already used")]
    TokenAlreadyUsed,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("mail transport failed: {0}")]
    MailTransport(#[from] EmailError),

    #[error("backing store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("session error: {0}")]
    Session(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotFound => AppError::TokenNotFound,
            TokenError::Expired => AppError::TokenExpired,
            TokenError::AlreadyUsed => AppError::TokenAlreadyUsed,
            TokenError::Database(e) => AppError::StoreUnavailable(e),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::StoreUnavailable(e),
            RepositoryError::AlreadyExists => AppError::DuplicateRegistration,
            RepositoryError::NotFound => AppError::Validation { field: "user" },
        }
    }
}

/// Round a retry-after up to human units for the rate-limit message.
fn human_wait(seconds: i64) -> String {
    if seconds <= 60 {
        "einer Minute".to_string()
    } else {
        let minutes = (seconds + 59) / 60;
        format!("{minutes} Minuten")
    }
}

impl AppError {
    /// Localized message shown to the browser. One sentence per failure
    /// class; the three token failures share a single combined message.
    pub fn user_message(&self) -> String {
        match self {
            AppError::BotSuspected(_) => {
                "Bitte bestätigen Sie, dass Sie kein Roboter sind.".to_string()
            }
            AppError::RateLimited {
                retry_after_seconds,
            } => format!(
                "Zu viele Versuche. Bitte versuchen Sie es in {} erneut.",
                human_wait(*retry_after_seconds)
            ),
            AppError::Validation { field } => match *field {
                "email" => "Bitte geben Sie eine gültige E-Mail-Adresse an.".to_string(),
                "first_name" => "Bitte geben Sie Ihren Vornamen an.".to_string(),
                "last_name" => "Bitte geben Sie Ihren Nachnamen an.".to_string(),
                "message" => "Bitte geben Sie eine Nachricht ein.".to_string(),
                _ => "Bitte überprüfen Sie Ihre Eingaben.".to_string(),
            },
            AppError::DuplicateRegistration => {
                "Für diese E-Mail-Adresse liegt bereits eine Anmeldung vor.".to_string()
            }
            AppError::TokenNotFound | AppError::TokenExpired | AppError::TokenAlreadyUsed => {
                "Dieser Link ist ungültig oder abgelaufen.".to_string()
            }
            AppError::InvalidCredentials => {
                "E-Mail-Adresse oder Passwort ist nicht korrekt.".to_string()
            }
            AppError::MailTransport(_) | AppError::Session(_) => {
                "Es ist ein Fehler aufgetreten. Bitte versuchen Sie es später erneut.".to_string()
            }
            AppError::StoreUnavailable(_) => {
                "Der Dienst ist momentan nicht erreichbar. Bitte versuchen Sie es später erneut."
                    .to_string()
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BotSuspected(_)
            | AppError::Validation { .. }
            | AppError::TokenNotFound
            | AppError::TokenExpired
            | AppError::TokenAlreadyUsed => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::DuplicateRegistration => StatusCode::CONFLICT,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::MailTransport(_) | AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full variant detail stays in the log; the body is generic.
        match &self {
            AppError::StoreUnavailable(e) => tracing::error!("store unavailable: {e}"),
            AppError::MailTransport(e) => tracing::error!("mail transport failed: {e}"),
            AppError::Session(e) => tracing::error!("session failure: {e}"),
            other => tracing::warn!("request rejected: {other}"),
        }

        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": self.user_message(),
        });

        (status, Json(body)).into_response()
    }
}
