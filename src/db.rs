use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use tracing::{info, warn};

use crate::auth::password::hash_password;
use crate::config::Config;
use crate::model::role::Role;

/// Builds the pool without connecting, so the server still starts (and answers
/// 503) while the database is unreachable.
pub fn init_db(config: &Config) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .connect_lazy(&config.database_url)
        .context("DATABASE_URL is not a valid MySQL connection string")
}

pub async fn run_migrations(pool: &MySqlPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations applied");
    Ok(())
}

/// Creates the first admin account from ADMIN_* settings when no user exists yet.
pub async fn seed_admin(pool: &MySqlPool, config: &Config) -> Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    if users > 0 {
        return Ok(());
    }

    let hashed = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {e}"))?;
    let name = config.admin_name.clone().unwrap_or_else(|| "Administrator".to_string());

    sqlx::query("INSERT INTO users (name, email, password, role) VALUES (?, ?, ?, ?)")
        .bind(&name)
        .bind(email.to_lowercase())
        .bind(hashed)
        .bind(Role::Admin.as_ref())
        .execute(pool)
        .await
        .context("Failed to create admin user")?;

    warn!(email = %email, "Seeded initial admin user; change its password");
    Ok(())
}

pub async fn ping(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}
