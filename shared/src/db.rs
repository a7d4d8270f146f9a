//! Database connection management.
//!
//! Credentials come from Secrets Manager and are cached for the lifetime of
//! the Lambda container.

use std::time::Duration;

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::OnceCell;
use tracing::info;

use crate::{Config, Error, Result};

static CREDENTIALS: OnceCell<DatabaseCredentials> = OnceCell::const_new();

/// Database credentials from Secrets Manager.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

impl DatabaseCredentials {
    pub fn parse(secret: &str) -> Result<Self> {
        serde_json::from_str(secret)
            .map_err(|e| Error::Aws(format!("Failed to parse database credentials: {}", e)))
    }

    /// Connection URL. Host and database from the secret win over config.
    pub fn database_url(&self, config: &Config) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host.as_deref().unwrap_or(&config.db_host),
            self.port.unwrap_or(5432),
            self.dbname.as_deref().unwrap_or(&config.db_name),
        )
    }
}

/// Fetch database credentials, hitting Secrets Manager once per container.
pub async fn load_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    CREDENTIALS
        .get_or_try_init(|| async {
            let response = client
                .get_secret_value()
                .secret_id(secret_arn)
                .send()
                .await
                .map_err(|e| Error::Aws(format!("Failed to get DB secret: {}", e)))?;

            let secret = response
                .secret_string()
                .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?;

            DatabaseCredentials::parse(secret)
        })
        .await
        .cloned()
}

/// Create a database connection pool.
pub async fn create_pool(config: &Config, credentials: &DatabaseCredentials) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&credentials.database_url(config))
        .await
        .map_err(Error::Database)?;

    info!(db_name = %config.db_name, "Database pool ready");
    Ok(pool)
}

/// Load credentials from the configured secret and connect.
pub async fn connect(config: &Config, aws: &aws_config::SdkConfig) -> Result<PgPool> {
    let secrets = SecretsClient::new(aws);
    let credentials = load_credentials(&secrets, &config.db_secret_arn).await?;
    create_pool(config, &credentials).await
}
