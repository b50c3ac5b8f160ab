use anyhow::anyhow;
use clap::{Parser, Subcommand};
use ffw_portal::{
    config::PortalConfig,
    db,
    models::{AuthMethod, RegistrationStatus},
    repositories::user_repository::{SqliteUserRepository, UserRepository},
    services::{
        auth_service::hash_password, bot_gate::BotGate, email_service::create_email_service,
        rate_limit_service::RateLimitService, token_service::TokenService,
    },
    AppState,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ffw-portal-cli")]
#[command(about = "Back-office and maintenance tool for the fire department portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Registration approval workflow
    Registration {
        #[command(subcommand)]
        command: RegistrationCommands,
    },

    /// Member management commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Periodic cleanup jobs (run from cron, never from the request path)
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
}

#[derive(Subcommand)]
enum RegistrationCommands {
    /// List registration requests awaiting a decision
    List,

    /// Approve a verified request and create the member record
    Approve {
        /// Request id as shown by `registration list`
        #[arg(short, long)]
        id: i64,
    },

    /// Reject a pending request
    Reject {
        /// Request id as shown by `registration list`
        #[arg(short, long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// List members
    List {
        /// Maximum number of members to display
        #[arg(short, long, default_value_t = 100)]
        limit: i64,

        /// Offset for pagination
        #[arg(short = 'o', long, default_value_t = 0)]
        offset: i64,
    },

    /// Set a password for a member (enables password login)
    SetPassword {
        /// Email address of the member
        #[arg(short, long)]
        email: String,

        /// New password (will prompt if not provided)
        #[arg(short, long)]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum MaintenanceCommands {
    /// Delete expired tokens and stale unverified registration requests
    CleanupTokens {
        /// Keep redeemed magic links this many days for the audit trail
        #[arg(long, default_value_t = 30)]
        used_retention_days: i64,
    },

    /// Delete login attempts older than the retention period
    PruneAttempts {
        /// Retention in days
        #[arg(long, default_value_t = 90)]
        days: i64,
    },

    /// Delete rate limit events that fell out of every window
    PruneRateEvents {
        /// Retention in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

fn get_password(prompt: &str) -> anyhow::Result<String> {
    use std::io::{self, Write};
    print!("{}: ", prompt);
    io::stdout().flush()?;

    Ok(rpassword::read_password()?)
}

fn confirm_password(prompt: &str) -> anyhow::Result<(String, String)> {
    let password = get_password(prompt)?;
    let confirm = get_password("Confirm password")?;
    Ok((password, confirm))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let pool = db::create_pool().await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let config = PortalConfig::from_env();
    let email_service = create_email_service(&config);
    let state = AppState::build(pool.clone(), email_service, BotGate::from_env(), config);

    // Parse CLI arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Registration { command } => match command {
            RegistrationCommands::List => {
                let requests = state
                    .auth_service
                    .list_registrations(Some(RegistrationStatus::Pending))
                    .await?;
                if requests.is_empty() {
                    println!("No pending registration requests.");
                } else {
                    for request in requests {
                        let verified = match &request.email_verified_at {
                            Some(at) => format!("verified {at}"),
                            None => "unverified".to_string(),
                        };
                        println!(
                            "#{} {} {} <{}> ({}, submitted {})",
                            request.id,
                            request.first_name,
                            request.last_name,
                            request.email,
                            verified,
                            request.created_at
                        );
                    }
                }
            }
            RegistrationCommands::Approve { id } => {
                let user = state.auth_service.approve_registration(id).await?;
                println!("Approved: {} <{}>", user.display_name, user.email);
            }
            RegistrationCommands::Reject { id } => {
                state.auth_service.reject_registration(id).await?;
                println!("Rejected request #{id}");
            }
        },

        Commands::User { command } => {
            let user_repository = Arc::new(SqliteUserRepository::new(pool.clone()));
            match command {
                UserCommands::List { limit, offset } => {
                    let users = user_repository.list_users(Some(limit), Some(offset)).await?;
                    for user in users {
                        println!(
                            "#{} {} <{}> method={} verified={} admin={} last_login={}",
                            user.id,
                            user.display_name,
                            user.email,
                            user.auth_method,
                            user.email_verified,
                            user.is_admin,
                            user.last_login_at.as_deref().unwrap_or("-")
                        );
                    }
                }
                UserCommands::SetPassword { email, password } => {
                    let user = user_repository
                        .find_by_email(&email)
                        .await?
                        .ok_or_else(|| anyhow!("User not found"))?;

                    let (password, confirm) = if let Some(pw) = password {
                        (pw.clone(), pw)
                    } else {
                        confirm_password("New password")?
                    };
                    if password != confirm {
                        return Err(anyhow!("Passwords do not match"));
                    }
                    if password.len() < 8 {
                        return Err(anyhow!("Password too weak (minimum 8 characters)"));
                    }

                    let hash = hash_password(&password).map_err(|e| anyhow!("{e}"))?;
                    user_repository.set_password(user.id, &hash).await?;
                    if user.auth_method == AuthMethod::MagicLink {
                        user_repository
                            .set_auth_method(user.id, AuthMethod::Both)
                            .await?;
                    }
                    println!("Password updated for {}", user.email);
                }
            }
        }

        Commands::Maintenance { command } => match command {
            MaintenanceCommands::CleanupTokens {
                used_retention_days,
            } => {
                let tokens = TokenService::new(pool.clone());
                let removed = tokens.cleanup_expired(used_retention_days).await?;
                println!("Removed {removed} expired token row(s)");
            }
            MaintenanceCommands::PruneAttempts { days } => {
                let removed = state.auth_service.prune_login_attempts(days).await?;
                println!("Removed {removed} login attempt(s)");
            }
            MaintenanceCommands::PruneRateEvents { hours } => {
                let limiter = RateLimitService::new(pool.clone());
                let removed = limiter.prune_events(hours * 3600).await?;
                println!("Removed {removed} rate event(s)");
            }
        },
    }

    Ok(())
}
