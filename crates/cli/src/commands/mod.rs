//! CLI command implementations.

pub mod labels;
pub mod migrate;

use thiserror::Error;

/// Errors shared by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] product_labels_admin::config::ConfigError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Shopify client could not be built.
    #[error("Shopify client error: {0}")]
    Shopify(#[from] product_labels_admin::shopify::MetafieldError),

    /// Label operation failed.
    #[error("{0}")]
    Label(#[from] product_labels_admin::services::LabelError),

    /// Invalid shop domain argument.
    #[error("Invalid shop domain: {0}")]
    InvalidShop(#[from] product_labels_core::ShopDomainError),

    /// Invalid product ID argument.
    #[error("Invalid product ID: {0}")]
    InvalidProduct(#[from] product_labels_core::ProductIdError),

    /// Output could not be encoded.
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    /// The command ran but did not reach its goal.
    #[error("{0}")]
    Incomplete(String),
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CommandError> {
    let rendered = serde_json::to_string_pretty(value)?;
    #[allow(clippy::print_stdout)]
    {
        println!("{rendered}");
    }
    Ok(())
}
