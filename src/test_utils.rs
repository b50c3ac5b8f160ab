pub mod test_helpers {
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
    use tempfile::NamedTempFile;

    use crate::config::PortalConfig;
    use crate::models::AuthMethod;
    use crate::services::auth_service::hash_password;
    use crate::services::bot_gate::BotGate;
    use crate::services::email_service::MockEmailService;
    use crate::AppState;

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Create a temporary file-based SQLite database for testing
    /// Useful when you need to test features that don't work with in-memory databases
    pub async fn create_test_db_file() -> Result<(SqlitePool, NamedTempFile), sqlx::Error> {
        let temp_file = NamedTempFile::new().map_err(sqlx::Error::Io)?;
        let db_path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| sqlx::Error::Configuration("Invalid database path".into()))?;
        let database_url = format!("sqlite://{}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok((pool, temp_file))
    }

    pub fn test_config() -> PortalConfig {
        PortalConfig {
            base_url: "http://localhost:8080".to_string(),
            admin_email: "vorstand@feuerwehr.example".to_string(),
        }
    }

    /// Wire an `AppState` with the logging mail sender and a challenge-free
    /// bot gate over the given pool.
    pub fn test_state(pool: SqlitePool) -> AppState {
        let config = test_config();
        AppState::build(
            pool,
            Box::new(MockEmailService::new(config.clone())),
            BotGate::new(None),
            config,
        )
    }

    /// Insert a verified member ready for magic-link login.
    pub async fn insert_test_user(
        pool: &SqlitePool,
        email: &str,
        first_name: &str,
        last_name: &str,
        auth_method: AuthMethod,
        verified: bool,
    ) -> Result<i64, sqlx::Error> {
        let display_name = format!("{first_name} {last_name}");
        let result = sqlx::query(
            "INSERT INTO users \
             (email, first_name, last_name, display_name, is_admin, auth_method, \
              email_verified, created_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(display_name)
        .bind(auth_method)
        .bind(verified)
        .bind(crate::db::now_rfc3339())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Set a password hash on an existing member.
    pub async fn set_test_password(
        pool: &SqlitePool,
        user_id: i64,
        password: &str,
    ) -> Result<(), sqlx::Error> {
        let hash = hash_password(password).map_err(|e| {
            sqlx::Error::Configuration(format!("Password hashing failed: {}", e).into())
        })?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
