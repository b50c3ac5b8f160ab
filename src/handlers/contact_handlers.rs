use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;

use super::{
    extract_client_info, form_displayed_at, respond_error, respond_success, stamp_form_displayed,
    CONTACT_PAGE,
};
use crate::error::AppError;
use crate::services::auth_service::{normalize_email, valid_email};
use crate::services::bot_gate::{FormSubmission, CONTACT_MIN_DWELL_SECONDS};
use crate::services::rate_limit_service::{RateLimitAction, RateLimitDecision};
use crate::AppState;

const FORM_CONTACT: &str = "contact";

#[derive(Deserialize)]
pub struct ContactFormData {
    pub email: String,
    pub name: Option<String>,
    pub message: String,
    /// Honeypot; hidden from humans, must stay empty.
    #[serde(default)]
    pub homepage: String,
    #[serde(default, rename = "cf-turnstile-response")]
    pub cf_turnstile_response: Option<String>,
}

/// GET for the contact form: record the display time for the dwell check.
pub async fn show_contact_form(session: Session) -> StatusCode {
    stamp_form_displayed(&session, FORM_CONTACT).await;
    StatusCode::NO_CONTENT
}

pub async fn submit_contact_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Session,
    Form(form): Form<ContactFormData>,
) -> Response {
    let client = extract_client_info(&headers);

    let email = normalize_email(&form.email);
    if !valid_email(&email) {
        return respond_error(&headers, CONTACT_PAGE, AppError::Validation { field: "email" });
    }
    if form.message.trim().is_empty() {
        return respond_error(
            &headers,
            CONTACT_PAGE,
            AppError::Validation { field: "message" },
        );
    }

    let displayed_at = form_displayed_at(&session, FORM_CONTACT).await;
    let submission = FormSubmission {
        honeypot: &form.homepage,
        displayed_at_unix: displayed_at,
        min_dwell_seconds: CONTACT_MIN_DWELL_SECONDS,
        challenge_response: form.cf_turnstile_response.as_deref(),
        remote_ip: client.ip.as_deref(),
    };
    if let Err(e) = state.bot_gate.verify(&submission).await {
        return respond_error(&headers, CONTACT_PAGE, e.into());
    }

    let action = RateLimitAction::ContactForm;
    let key = client.ip.as_deref().unwrap_or("unknown");
    match state.rate_limiter.allow(action, key, action.policy()).await {
        Ok(RateLimitDecision::Allowed) => {}
        Ok(RateLimitDecision::Limited {
            retry_after_seconds,
        }) => {
            return respond_error(
                &headers,
                CONTACT_PAGE,
                AppError::RateLimited {
                    retry_after_seconds,
                },
            );
        }
        // Unreachable counter store denies the submission.
        Err(e) => {
            return respond_error(&headers, CONTACT_PAGE, AppError::StoreUnavailable(e));
        }
    }

    let name = form.name.as_deref().filter(|n| !n.trim().is_empty());
    match state
        .auth_service
        .email_service()
        .send_contact_message(&email, name, form.message.trim())
        .await
    {
        Ok(()) => respond_success(
            &headers,
            CONTACT_PAGE,
            "Vielen Dank für Ihre Nachricht! Wir melden uns so bald wie möglich.",
        ),
        Err(e) => respond_error(&headers, CONTACT_PAGE, AppError::MailTransport(e)),
    }
}
