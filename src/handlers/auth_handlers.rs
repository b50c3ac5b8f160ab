use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;

use super::{
    extract_client_info, form_displayed_at, respond_error, respond_success, stamp_form_displayed,
    JsonResponse, LOGIN_PAGE, MEMBER_AREA, REGISTER_PAGE,
};
use crate::error::AppError;
use crate::models::{LoginMethod, User};
use crate::services::auth_service::RegistrationForm;
use crate::services::bot_gate::{FormSubmission, AUTH_MIN_DWELL_SECONDS};
use crate::AppState;

const FORM_REGISTER: &str = "register";
const FORM_MAGICLINK: &str = "magiclink";

#[derive(Deserialize)]
pub struct RegisterFormData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Honeypot; hidden from humans, must stay empty.
    #[serde(default)]
    pub homepage: String,
    #[serde(default, rename = "cf-turnstile-response")]
    pub cf_turnstile_response: Option<String>,
}

#[derive(Deserialize)]
pub struct MagicLinkFormData {
    pub email: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default, rename = "cf-turnstile-response")]
    pub cf_turnstile_response: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginFormData {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

/// GET for the registration form: record the display time for the dwell
/// check. The page itself is rendered elsewhere.
pub async fn show_register_form(session: Session) -> StatusCode {
    stamp_form_displayed(&session, FORM_REGISTER).await;
    StatusCode::NO_CONTENT
}

pub async fn show_magiclink_form(session: Session) -> StatusCode {
    stamp_form_displayed(&session, FORM_MAGICLINK).await;
    StatusCode::NO_CONTENT
}

pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Session,
    Form(form): Form<RegisterFormData>,
) -> Response {
    let client = extract_client_info(&headers);
    let displayed_at = form_displayed_at(&session, FORM_REGISTER).await;
    let submission = FormSubmission {
        honeypot: &form.homepage,
        displayed_at_unix: displayed_at,
        min_dwell_seconds: AUTH_MIN_DWELL_SECONDS,
        challenge_response: form.cf_turnstile_response.as_deref(),
        remote_ip: client.ip.as_deref(),
    };
    let registration = RegistrationForm {
        first_name: form.first_name,
        last_name: form.last_name,
        email: form.email,
    };

    match state
        .auth_service
        .submit_registration(&registration, &submission, &client)
        .await
    {
        Ok(()) => respond_success(
            &headers,
            REGISTER_PAGE,
            "Vielen Dank für Ihre Anmeldung! Bitte bestätigen Sie Ihre E-Mail-Adresse über den Link, den wir Ihnen geschickt haben.",
        ),
        Err(e) => respond_error(&headers, REGISTER_PAGE, e),
    }
}

/// GET from the emailed registration link. Safe to visit repeatedly once
/// verified.
pub async fn verify_registration_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    match state.auth_service.verify_registration(&query.token).await {
        Ok(_) => Redirect::to(&format!(
            "{LOGIN_PAGE}?success={}",
            urlencoding::encode(
                "Ihre E-Mail-Adresse ist bestätigt. Der Vorstand prüft nun Ihre Anmeldung."
            )
        ))
        .into_response(),
        Err(e) => {
            tracing::warn!("registration verification rejected: {e}");
            Redirect::to(&format!(
                "{LOGIN_PAGE}?error={}",
                urlencoding::encode(&e.user_message())
            ))
            .into_response()
        }
    }
}

pub async fn magiclink_request_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Session,
    Form(form): Form<MagicLinkFormData>,
) -> Response {
    let client = extract_client_info(&headers);
    let displayed_at = form_displayed_at(&session, FORM_MAGICLINK).await;
    let submission = FormSubmission {
        honeypot: &form.homepage,
        displayed_at_unix: displayed_at,
        min_dwell_seconds: AUTH_MIN_DWELL_SECONDS,
        challenge_response: form.cf_turnstile_response.as_deref(),
        remote_ip: client.ip.as_deref(),
    };

    match state
        .auth_service
        .request_magic_link(&form.email, &submission, &client)
        .await
    {
        // Same sentence whether or not the address belongs to a member.
        Ok(()) => respond_success(
            &headers,
            LOGIN_PAGE,
            "Falls ein Konto mit dieser E-Mail-Adresse existiert, haben wir Ihnen einen Anmeldelink geschickt.",
        ),
        Err(e) => respond_error(&headers, LOGIN_PAGE, e),
    }
}

/// GET from the emailed magic link: single use, establishes the session.
pub async fn verify_magiclink_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Session,
    Query(query): Query<TokenQuery>,
) -> Response {
    let client = extract_client_info(&headers);

    match state
        .auth_service
        .redeem_magic_link(&query.token, &client)
        .await
    {
        Ok(user) => {
            if let Err(e) = establish_session(&session, &user, LoginMethod::MagicLink).await {
                tracing::error!("session establishment failed: {e}");
                return Redirect::to(&format!(
                    "{LOGIN_PAGE}?error={}",
                    urlencoding::encode(&e.user_message())
                ))
                .into_response();
            }
            Redirect::to(MEMBER_AREA).into_response()
        }
        Err(e) => {
            tracing::warn!("magic link rejected: {e}");
            Redirect::to(&format!(
                "{LOGIN_PAGE}?error={}",
                urlencoding::encode(&e.user_message())
            ))
            .into_response()
        }
    }
}

pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Session,
    Form(form): Form<LoginFormData>,
) -> Response {
    let client = extract_client_info(&headers);

    match state
        .auth_service
        .authenticate_password(&form.email, &form.password, &client)
        .await
    {
        Ok(user) => {
            if let Err(e) = establish_session(&session, &user, LoginMethod::Password).await {
                return respond_error(&headers, LOGIN_PAGE, e);
            }
            if super::is_ajax_request(&headers) {
                Json(JsonResponse {
                    success: true,
                    message: Some("Anmeldung erfolgreich.".to_string()),
                    error: None,
                })
                .into_response()
            } else {
                Redirect::to(MEMBER_AREA).into_response()
            }
        }
        Err(e) => respond_error(&headers, LOGIN_PAGE, e),
    }
}

pub async fn logout_handler(session: Session) -> impl IntoResponse {
    let _ = session.flush().await;
    Redirect::to("/")
}

/// Session summary for the member area.
pub async fn me_handler(session: Session) -> Response {
    let user_id = session.get::<i64>("user_id").await.ok().flatten();
    let Some(user_id) = user_id else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let email = session
        .get::<String>("email")
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    let display_name = session
        .get::<String>("display_name")
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    let is_admin = session
        .get::<bool>("is_admin")
        .await
        .ok()
        .flatten()
        .unwrap_or(false);
    let auth_method = session
        .get::<String>("auth_method")
        .await
        .ok()
        .flatten()
        .unwrap_or_default();

    Json(serde_json::json!({
        "user_id": user_id,
        "email": email,
        "display_name": display_name,
        "is_admin": is_admin,
        "auth_method": auth_method,
    }))
    .into_response()
}

async fn establish_session(
    session: &Session,
    user: &User,
    method: LoginMethod,
) -> Result<(), AppError> {
    if session.insert("user_id", user.id).await.is_err()
        || session.insert("email", user.email.clone()).await.is_err()
        || session
            .insert("display_name", user.display_name.clone())
            .await
            .is_err()
        || session.insert("is_admin", user.is_admin).await.is_err()
        || session
            .insert("auth_method", method.as_str())
            .await
            .is_err()
        || session
            .insert("auth_timestamp", chrono::Utc::now().timestamp())
            .await
            .is_err()
    {
        return Err(AppError::Session(
            "failed to persist session state".to_string(),
        ));
    }
    Ok(())
}
