pub mod session;

use std::env;

/// Deployment-level settings for the auth flows, read once at startup.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Public base URL of the site, used to build emailed links.
    pub base_url: String,
    /// Address that receives registration notices and contact messages.
    pub admin_email: String,
}

impl PortalConfig {
    pub fn from_env() -> Self {
        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let admin_email = env::var("ADMIN_EMAIL")
            .unwrap_or_else(|_| "vorstand@feuerwehr-gruenbach.de".to_string());

        Self {
            base_url,
            admin_email,
        }
    }

    /// Link sent in registration verification emails.
    pub fn registration_verify_url(&self, token: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/verify_registration.php?token={token}")
    }

    /// Link sent in magic-link login emails.
    pub fn magic_link_url(&self, token: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/verify_magiclink.php?token={token}")
    }
}
