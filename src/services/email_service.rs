use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::env;
use std::time::Duration;

use crate::config::PortalConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to build email message: {0}")]
    MessageBuild(String),
    #[error("Failed to send email: {0}")]
    SendFailed(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A binary part added to an outgoing message (base64-encoded on the wire).
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// One outbound message. Flow-specific helpers below build these; anything
/// richer (CC, Reply-To, attachments) goes through `send_message` directly.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub reply_to: Option<String>,
    pub cc: Option<String>,
    pub attachments: Vec<EmailAttachment>,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            reply_to: None,
            cc: None,
            attachments: Vec::new(),
        }
    }
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send_registration_verification(
        &self,
        to_email: &str,
        first_name: &str,
        token: &str,
    ) -> Result<(), EmailError>;
    async fn send_registration_notice(
        &self,
        applicant_email: &str,
        applicant_name: &str,
    ) -> Result<(), EmailError>;
    async fn send_registration_approved(
        &self,
        to_email: &str,
        display_name: &str,
    ) -> Result<(), EmailError>;
    async fn send_magic_login_email(&self, to_email: &str, token: &str) -> Result<(), EmailError>;
    async fn send_contact_message(
        &self,
        from_email: &str,
        from_name: Option<&str>,
        message: &str,
    ) -> Result<(), EmailError>;
    async fn send_message(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

/// Local dev sender that logs instead of delivering real mail.
pub struct MockEmailService {
    config: PortalConfig,
}

impl MockEmailService {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EmailService for MockEmailService {
    async fn send_registration_verification(
        &self,
        to_email: &str,
        first_name: &str,
        token: &str,
    ) -> Result<(), EmailError> {
        tracing::info!(
            "[MOCK EMAIL] registration verification for {} ({}): {}",
            to_email,
            first_name,
            self.config.registration_verify_url(token)
        );
        Ok(())
    }

    async fn send_registration_notice(
        &self,
        applicant_email: &str,
        applicant_name: &str,
    ) -> Result<(), EmailError> {
        tracing::info!(
            "[MOCK EMAIL] registration notice to {}: {} <{}>",
            self.config.admin_email,
            applicant_name,
            applicant_email
        );
        Ok(())
    }

    async fn send_registration_approved(
        &self,
        to_email: &str,
        display_name: &str,
    ) -> Result<(), EmailError> {
        tracing::info!(
            "[MOCK EMAIL] registration approved for {} ({})",
            to_email,
            display_name
        );
        Ok(())
    }

    async fn send_magic_login_email(&self, to_email: &str, token: &str) -> Result<(), EmailError> {
        tracing::info!(
            "[MOCK EMAIL] magic login link for {}: {}",
            to_email,
            self.config.magic_link_url(token)
        );
        Ok(())
    }

    async fn send_contact_message(
        &self,
        from_email: &str,
        from_name: Option<&str>,
        message: &str,
    ) -> Result<(), EmailError> {
        tracing::info!(
            "[MOCK EMAIL] contact message from {} ({}): {}",
            from_email,
            from_name.unwrap_or("-"),
            message
        );
        Ok(())
    }

    async fn send_message(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        tracing::info!(
            "[MOCK EMAIL] to {} subject {:?} ({} attachment(s))",
            email.to,
            email.subject,
            email.attachments.len()
        );
        Ok(())
    }
}

pub struct SmtpEmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
    config: PortalConfig,
}

impl SmtpEmailService {
    pub fn new(config: PortalConfig) -> Result<Self, EmailError> {
        let smtp_host = env::var("SMTP_HOST")
            .map_err(|_| EmailError::ConfigError("SMTP_HOST not set".to_string()))?;
        let smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse::<u16>()
            .map_err(|_| EmailError::ConfigError("Invalid SMTP_PORT".to_string()))?;
        let smtp_username = env::var("SMTP_USERNAME")
            .map_err(|_| EmailError::ConfigError("SMTP_USERNAME not set".to_string()))?;
        let smtp_password = env::var("SMTP_PASSWORD")
            .map_err(|_| EmailError::ConfigError("SMTP_PASSWORD not set".to_string()))?;
        let from_email = env::var("SMTP_FROM_EMAIL")
            .map_err(|_| EmailError::ConfigError("SMTP_FROM_EMAIL not set".to_string()))?;
        let from_name =
            env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Freiwillige Feuerwehr".to_string());

        let encryption = env::var("SMTP_ENCRYPTION").unwrap_or_else(|_| "starttls".to_string());

        let credentials = Credentials::new(smtp_username, smtp_password);

        let mailer = match encryption.to_lowercase().as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_host)
                .map_err(|e| EmailError::ConfigError(format!("SMTP relay error: {}", e)))?
                .port(smtp_port)
                .credentials(credentials)
                .timeout(Some(SMTP_TIMEOUT))
                .build(),
            "starttls" => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_host)
                .map_err(|e| EmailError::ConfigError(format!("SMTP starttls error: {}", e)))?
                .port(smtp_port)
                .credentials(credentials)
                .timeout(Some(SMTP_TIMEOUT))
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_host)
                .port(smtp_port)
                .credentials(credentials)
                .timeout(Some(SMTP_TIMEOUT))
                .build(),
            _ => {
                return Err(EmailError::ConfigError(format!(
                    "Invalid SMTP_ENCRYPTION value: {}. Use 'tls', 'starttls', or 'none'",
                    encryption
                )))
            }
        };

        Ok(Self {
            mailer,
            from_email,
            from_name,
            config,
        })
    }

    fn from_mailbox(&self) -> Result<Mailbox, EmailError> {
        format!("{} <{}>", self.from_name, self.from_email)
            .parse()
            .map_err(|e| EmailError::MessageBuild(format!("Invalid from address: {}", e)))
    }

    /// Assemble a `lettre` message from an `OutgoingEmail`.
    ///
    /// With attachments the body becomes a mixed multipart with the HTML
    /// part first and one base64 part per attachment.
    pub fn compose(from: Mailbox, email: &OutgoingEmail) -> Result<Message, EmailError> {
        let mut builder = Message::builder()
            .from(from)
            .to(email
                .to
                .parse()
                .map_err(|e| EmailError::MessageBuild(format!("Invalid to address: {}", e)))?)
            .subject(&email.subject);

        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(
                reply_to
                    .parse()
                    .map_err(|e| EmailError::MessageBuild(format!("Invalid reply-to: {}", e)))?,
            );
        }

        if let Some(cc) = &email.cc {
            builder = builder.cc(cc
                .parse()
                .map_err(|e| EmailError::MessageBuild(format!("Invalid cc address: {}", e)))?);
        }

        if email.attachments.is_empty() {
            builder
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone())
                .map_err(|e| EmailError::MessageBuild(e.to_string()))
        } else {
            let html_part = SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone());
            let mut multipart = MultiPart::mixed().singlepart(html_part);
            for attachment in &email.attachments {
                let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                    EmailError::MessageBuild(format!(
                        "Invalid attachment content type {}: {}",
                        attachment.content_type, e
                    ))
                })?;
                multipart = multipart.singlepart(
                    Attachment::new(attachment.filename.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }
            builder
                .multipart(multipart)
                .map_err(|e| EmailError::MessageBuild(e.to_string()))
        }
    }

    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = Self::compose(self.from_mailbox()?, email)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EmailService for SmtpEmailService {
    async fn send_registration_verification(
        &self,
        to_email: &str,
        first_name: &str,
        token: &str,
    ) -> Result<(), EmailError> {
        let verify_url = self.config.registration_verify_url(token);
        let html_body = format!(
            r#"<html><body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h1>Willkommen bei der Freiwilligen Feuerwehr!</h1>
<p>Hallo {first_name},</p>
<p>vielen Dank für Ihre Anmeldung. Bitte bestätigen Sie Ihre E-Mail-Adresse über den folgenden Link:</p>
<p><a href="{verify_url}">E-Mail-Adresse bestätigen</a></p>
<p style="color: #666; font-size: 14px; word-break: break-all;">{verify_url}</p>
<p style="color: #999; font-size: 12px;">Der Link ist 48 Stunden gültig. Nach der Bestätigung prüft der Vorstand Ihre Anmeldung.</p>
</body></html>"#,
        );

        self.deliver(&OutgoingEmail::new(
            to_email,
            "Bitte bestätigen Sie Ihre E-Mail-Adresse",
            html_body,
        ))
        .await
    }

    async fn send_registration_notice(
        &self,
        applicant_email: &str,
        applicant_name: &str,
    ) -> Result<(), EmailError> {
        let html_body = format!(
            r#"<html><body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h1>Neue Mitgliedsanmeldung</h1>
<p>{applicant_name} &lt;{applicant_email}&gt; hat sich über die Webseite angemeldet.</p>
<p>Bitte prüfen Sie die Anmeldung im Verwaltungsbereich.</p>
</body></html>"#,
        );

        self.deliver(&OutgoingEmail::new(
            &self.config.admin_email,
            "Neue Mitgliedsanmeldung über die Webseite",
            html_body,
        ))
        .await
    }

    async fn send_registration_approved(
        &self,
        to_email: &str,
        display_name: &str,
    ) -> Result<(), EmailError> {
        let base = self.config.base_url.trim_end_matches('/');
        let html_body = format!(
            r#"<html><body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h1>Ihre Anmeldung wurde freigegeben</h1>
<p>Hallo {display_name},</p>
<p>Ihre Anmeldung wurde vom Vorstand freigegeben. Sie können sich ab sofort im Mitgliederbereich anmelden:</p>
<p><a href="{base}/anmelden">Zur Anmeldung</a></p>
</body></html>"#,
        );

        self.deliver(&OutgoingEmail::new(
            to_email,
            "Ihre Anmeldung wurde freigegeben",
            html_body,
        ))
        .await
    }

    async fn send_magic_login_email(&self, to_email: &str, token: &str) -> Result<(), EmailError> {
        let magic_url = self.config.magic_link_url(token);
        let html_body = format!(
            r#"<html><body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h1>Ihr Anmeldelink</h1>
<p>Klicken Sie auf den folgenden Link, um sich im Mitgliederbereich anzumelden:</p>
<p><a href="{magic_url}">Jetzt anmelden</a></p>
<p style="color: #666; font-size: 14px; word-break: break-all;">{magic_url}</p>
<p style="color: #999; font-size: 12px;">Der Link ist 15 Minuten gültig und kann nur einmal verwendet werden. Falls Sie keinen Anmeldelink angefordert haben, können Sie diese E-Mail ignorieren.</p>
</body></html>"#,
        );

        self.deliver(&OutgoingEmail::new(to_email, "Ihr Anmeldelink", html_body))
            .await
    }

    async fn send_contact_message(
        &self,
        from_email: &str,
        from_name: Option<&str>,
        message: &str,
    ) -> Result<(), EmailError> {
        let name_display = from_name.map(|n| format!(" ({})", n)).unwrap_or_default();
        let html_body = format!(
            r#"<html><body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h1>Kontaktanfrage über die Webseite</h1>
<p><strong>Von:</strong> {from_email}{name_display}</p>
<p style="white-space: pre-wrap;">{message}</p>
</body></html>"#,
        );

        let mut email = OutgoingEmail::new(
            &self.config.admin_email,
            format!("Kontaktanfrage von {from_email}"),
            html_body,
        );
        email.reply_to = Some(from_email.to_string());

        self.deliver(&email).await
    }

    async fn send_message(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        self.deliver(email).await
    }
}

/// Pick the SMTP sender when configured, otherwise the logging mock.
pub fn create_email_service(config: &PortalConfig) -> Box<dyn EmailService> {
    if env::var("SMTP_HOST").is_ok() {
        match SmtpEmailService::new(config.clone()) {
            Ok(service) => {
                tracing::info!("Using SMTP email service");
                Box::new(service)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize SMTP email service: {}. Falling back to mock service",
                    e
                );
                Box::new(MockEmailService::new(config.clone()))
            }
        }
    } else {
        tracing::info!(
            "SMTP not configured. Using mock email service (emails will be logged to console)"
        );
        Box::new(MockEmailService::new(config.clone()))
    }
}
