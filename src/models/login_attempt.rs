use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Which credential kind an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Password,
    MagicLink,
}

impl LoginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Password => "password",
            LoginMethod::MagicLink => "magic_link",
        }
    }
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record of an authentication attempt. Never updated;
/// pruned by age through the maintenance CLI.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: i64,
    pub email: String,
    pub ip: Option<String>,
    pub method: LoginMethod,
    pub success: bool,
    pub created_at: String,
}

/// Request-scoped client identity, extracted once at the HTTP boundary and
/// passed into the auth flows instead of ambient server globals.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}
