pub mod login_attempt;
pub mod magic_link;
pub mod registration;
pub mod user;

pub use login_attempt::{ClientInfo, LoginAttempt, LoginMethod};
pub use magic_link::MagicLink;
pub use registration::{RegistrationRequest, RegistrationStatus};
pub use user::{AuthMethod, NewUser, User};
