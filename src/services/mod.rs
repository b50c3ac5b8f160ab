pub mod auth_service;
pub mod bot_gate;
pub mod email_service;
pub mod rate_limit_service;
pub mod token_service;

pub use auth_service::AuthService;
pub use bot_gate::BotGate;
pub use email_service::{create_email_service, EmailService, MockEmailService, SmtpEmailService};
pub use rate_limit_service::RateLimitService;
pub use token_service::TokenService;
