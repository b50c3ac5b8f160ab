use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// How a member is allowed to sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    MagicLink,
    Password,
    Both,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::MagicLink => "magic_link",
            AuthMethod::Password => "password",
            AuthMethod::Both => "both",
        }
    }

    pub fn allows_magic_link(&self) -> bool {
        matches!(self, AuthMethod::MagicLink | AuthMethod::Both)
    }

    pub fn allows_password(&self) -> bool {
        matches!(self, AuthMethod::Password | AuthMethod::Both)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "magic_link" => Ok(AuthMethod::MagicLink),
            "password" => Ok(AuthMethod::Password),
            "both" => Ok(AuthMethod::Both),
            other => Err(format!("unknown auth method: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub is_admin: bool,
    pub auth_method: AuthMethod,
    pub email_verified: bool,
    pub password_hash: Option<String>,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

/// Fields required to create a member record (registration approval).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub is_admin: bool,
    pub auth_method: AuthMethod,
    pub email_verified: bool,
}
