pub mod models;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

const MAX_CONNECTIONS: u32 = 10;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Connects the Postgres pool used by `PgStore`.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("failed to connect to database")?;
    info!(max_connections = MAX_CONNECTIONS, "Database pool connected");
    Ok(pool)
}

/// Applies the embedded `users`/`sessions`/`hydroponics`/`sensor_reading`
/// schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run migrations")?;
    info!(migrations = MIGRATOR.iter().count(), "Migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_migration_is_embedded() {
        let descriptions: Vec<_> = MIGRATOR.iter().map(|m| m.description.to_string()).collect();
        assert_eq!(descriptions, vec!["init"]);
    }
}
