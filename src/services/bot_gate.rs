use chrono::Utc;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Minimum fill time for the contact form.
pub const CONTACT_MIN_DWELL_SECONDS: i64 = 3;
/// Minimum fill time for the registration and magic-link forms.
pub const AUTH_MIN_DWELL_SECONDS: i64 = 4;

const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[derive(Debug, thiserror::Error)]
pub enum BotGateError {
    #[error("honeypot field was filled")]
    Honeypot,
    #[error("form submitted after {elapsed_seconds}s, minimum is {min_seconds}s")]
    TooFast {
        elapsed_seconds: i64,
        min_seconds: i64,
    },
    #[error("challenge verification failed: {0}")]
    ChallengeFailed(String),
}

/// One form submission as seen by the gate. The dwell stamp comes from the
/// session, recorded when the form was first displayed.
#[derive(Debug, Clone)]
pub struct FormSubmission<'a> {
    pub honeypot: &'a str,
    pub displayed_at_unix: Option<i64>,
    pub min_dwell_seconds: i64,
    pub challenge_response: Option<&'a str>,
    pub remote_ip: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Composite bot check run before any public form submission that triggers
/// outbound email or a privileged write. Checks short-circuit in order:
/// honeypot, dwell time, then the optional Turnstile challenge. Callers
/// must answer every rejection with the same generic sentence.
pub struct BotGate {
    turnstile_secret: Option<String>,
    verify_url: String,
    http: reqwest::Client,
}

impl BotGate {
    pub fn new(turnstile_secret: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            turnstile_secret,
            verify_url: TURNSTILE_VERIFY_URL.to_string(),
            http,
        }
    }

    pub fn from_env() -> Self {
        let secret = env::var("TURNSTILE_SECRET").ok().filter(|s| !s.is_empty());
        if secret.is_none() {
            tracing::info!("TURNSTILE_SECRET not set; challenge verification disabled");
        }
        Self::new(secret)
    }

    /// Point the verifier at a different endpoint (tests).
    pub fn with_verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = url.into();
        self
    }

    pub async fn verify(&self, submission: &FormSubmission<'_>) -> Result<(), BotGateError> {
        if !submission.honeypot.trim().is_empty() {
            return Err(BotGateError::Honeypot);
        }

        let now = Utc::now().timestamp();
        let elapsed = match submission.displayed_at_unix {
            Some(displayed_at) => now - displayed_at,
            // No recorded display time means the form was never fetched.
            None => 0,
        };
        if elapsed < submission.min_dwell_seconds {
            return Err(BotGateError::TooFast {
                elapsed_seconds: elapsed,
                min_seconds: submission.min_dwell_seconds,
            });
        }

        if let Some(secret) = &self.turnstile_secret {
            self.verify_challenge(secret, submission).await?;
        }

        Ok(())
    }

    async fn verify_challenge(
        &self,
        secret: &str,
        submission: &FormSubmission<'_>,
    ) -> Result<(), BotGateError> {
        let response = submission
            .challenge_response
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| BotGateError::ChallengeFailed("missing response token".to_string()))?;

        let mut params = vec![("secret", secret), ("response", response)];
        if let Some(ip) = submission.remote_ip {
            params.push(("remoteip", ip));
        }

        // Any transport failure counts as a failed check.
        let verdict: SiteverifyResponse = self
            .http
            .post(&self.verify_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| BotGateError::ChallengeFailed(format!("siteverify request: {e}")))?
            .json()
            .await
            .map_err(|e| BotGateError::ChallengeFailed(format!("siteverify response: {e}")))?;

        if !verdict.success {
            return Err(BotGateError::ChallengeFailed(format!(
                "negative verdict: {}",
                verdict.error_codes.join(", ")
            )));
        }

        Ok(())
    }
}
