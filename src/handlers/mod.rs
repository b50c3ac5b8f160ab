pub mod auth_handlers;
pub mod contact_handlers;
pub mod health;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Redirect, Response};
use chrono::Utc;
use serde::Serialize;
use tower_sessions::Session;

use crate::error::AppError;
use crate::models::ClientInfo;

// Site pages the handlers redirect back to. Rendering lives outside this
// service.
pub const REGISTER_PAGE: &str = "/mitglied-werden";
pub const LOGIN_PAGE: &str = "/anmelden";
pub const CONTACT_PAGE: &str = "/kontakt";
pub const MEMBER_AREA: &str = "/intern";

#[derive(Serialize)]
pub(crate) struct JsonResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Extract the client identity once at the boundary, preferring proxy
/// headers the way the reverse proxy sets them.
pub fn extract_client_info(headers: &HeaderMap) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let ip = forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    });

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    ClientInfo { ip, user_agent }
}

/// Remember when a form was first displayed; the bot gate compares the
/// submission time against this stamp.
pub(crate) async fn stamp_form_displayed(session: &Session, form: &str) {
    let key = format!("form_displayed_at:{form}");
    let _ = session.insert(&key, Utc::now().timestamp()).await;
}

pub(crate) async fn form_displayed_at(session: &Session, form: &str) -> Option<i64> {
    let key = format!("form_displayed_at:{form}");
    session.get::<i64>(&key).await.ok().flatten()
}

pub(crate) fn is_ajax_request(headers: &HeaderMap) -> bool {
    headers
        .get("X-Requested-With")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "XMLHttpRequest")
        .unwrap_or(false)
}

/// AJAX callers get JSON, plain form posts a redirect with the message in
/// the query string.
pub(crate) fn respond_success(headers: &HeaderMap, page: &str, message: &str) -> Response {
    if is_ajax_request(headers) {
        Json(JsonResponse {
            success: true,
            message: Some(message.to_string()),
            error: None,
        })
        .into_response()
    } else {
        Redirect::to(&format!("{page}?success={}", urlencoding::encode(message))).into_response()
    }
}

pub(crate) fn respond_error(headers: &HeaderMap, page: &str, err: AppError) -> Response {
    if is_ajax_request(headers) {
        err.into_response()
    } else {
        tracing::warn!("request rejected: {err}");
        let message = err.user_message();
        Redirect::to(&format!("{page}?error={}", urlencoding::encode(&message))).into_response()
    }
}
