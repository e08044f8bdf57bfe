//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! labels-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `LABELS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/admin/migrations/`

use secrecy::SecretString;

use product_labels_admin::db;

use super::CommandError;

/// Database URL for migrations, without requiring the Shopify settings.
pub fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("LABELS_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("LABELS_DATABASE_URL"))
}

/// Run the labels schema migrations.
pub async fn run() -> Result<(), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to labels database...");
    let pool = db::create_pool(&database_url).await?;

    tracing::info!("Running labels migrations...");
    sqlx::migrate!("../admin/migrations").run(&pool).await?;

    tracing::info!("Labels migrations complete!");
    Ok(())
}
