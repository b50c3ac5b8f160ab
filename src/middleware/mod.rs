use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tower_sessions::Session;

pub async fn require_auth(session: Session, request: Request, next: Next) -> Response {
    // Check if a member is signed in
    if let Ok(Some(_user_id)) = session.get::<i64>("user_id").await {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "success": false,
                "error": "Bitte melden Sie sich an.",
            })),
        )
            .into_response()
    }
}
