//! Subcommand implementations.

pub mod migrate;
pub mod orders;

use secrecy::SecretString;
use sqlx::PgPool;

/// Errors shared by all subcommands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] solehaus_storefront::db::RepositoryError),

    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] solehaus_storefront::services::FulfillmentError),
}

/// Connect to the storefront database named by `STOREFRONT_DATABASE_URL`
/// (falling back to `DATABASE_URL`).
pub async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("STOREFRONT_DATABASE_URL"))?;

    tracing::info!("Connecting to storefront database...");
    Ok(solehaus_storefront::db::create_pool(&database_url).await?)
}
