use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single-use login token bound to one member.
///
/// Valid while `used_at` is unset and `expires_at` lies in the future;
/// redemption stamps `used_at` exactly once. The issuing IP and user agent
/// are kept for the security audit trail.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MagicLink {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: String,
    pub expires_at: String,
    pub used_at: Option<String>,
    pub request_ip: Option<String>,
    pub request_user_agent: Option<String>,
}
