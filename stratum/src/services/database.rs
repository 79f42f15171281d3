use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::error::Result;

/// Database service owning the SeaORM connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseService {
    url: String,
    pub connection: DatabaseConnection,
}

impl DatabaseService {
    pub async fn new(database_url: &str) -> Result<Self> {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(16)
            .min_connections(2)
            .connect_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let connection =
            Database::connect(opt)
                .await
                .map_err(|e| crate::error::StratumError::Database {
                    message: format!("Failed to connect to database: {e}"),
                    source: Some(Box::new(e)),
                })?;

        Ok(DatabaseService {
            url: database_url.to_owned(),
            connection,
        })
    }

    /// Connect with explicit pool bounds. Tests use a single connection so
    /// an in-memory SQLite database stays on one handle.
    pub async fn new_with_options(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let connection =
            Database::connect(opt)
                .await
                .map_err(|e| crate::error::StratumError::Database {
                    message: format!("Failed to connect to database: {e}"),
                    source: Some(Box::new(e)),
                })?;

        Ok(DatabaseService {
            url: database_url.to_owned(),
            connection,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        Migrator::up(&self.connection, None).await.map_err(|e| {
            crate::error::StratumError::Database {
                message: format!("Failed to run migrations: {e}"),
                source: Some(Box::new(e)),
            }
        })?;

        tracing::info!("migrations completed");
        Ok(())
    }

    /// Health check for the connection pool.
    pub async fn health_check(&self) -> Result<()> {
        self.connection
            .ping()
            .await
            .map_err(|e| crate::error::StratumError::Database {
                message: format!("Failed to ping database: {e}"),
                source: Some(Box::new(e)),
            })
    }
}
