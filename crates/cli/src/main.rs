//! Product labels CLI - migrations, label management, and resync.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! labels-cli migrate
//!
//! # Manage labels
//! labels-cli labels list -s demo.myshopify.com
//! labels-cli labels create -s demo.myshopify.com -n "Sale" -c "#ff0000"
//! labels-cli labels delete -s demo.myshopify.com --id <label-id>
//!
//! # Set a product's labels (no -l clears them)
//! labels-cli apply -s demo.myshopify.com -p 632910392 -l <label-id> -l <label-id>
//!
//! # Re-push a product whose last sync was partial
//! labels-cli sync -s demo.myshopify.com -p 632910392
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `labels list|create|delete` - Manage label definitions
//! - `apply` - Reconcile a product's labels and sync them to Shopify
//! - `sync` - Resync a product's metafield

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "labels-cli")]
#[command(author, version, about = "Product labels CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage label definitions
    Labels {
        #[command(subcommand)]
        action: LabelAction,
    },
    /// Set a product's labels and sync them to Shopify
    Apply {
        /// Shop domain (e.g., demo.myshopify.com)
        #[arg(short, long)]
        shop: String,

        /// Product ID (numeric or gid://shopify/Product/...)
        #[arg(short, long)]
        product: String,

        /// Label ID to attach (repeatable; omit to clear)
        #[arg(short, long = "label")]
        labels: Vec<String>,
    },
    /// Re-push a product's current labels to Shopify
    Sync {
        /// Shop domain
        #[arg(short, long)]
        shop: String,

        /// Product ID
        #[arg(short, long)]
        product: String,
    },
}

#[derive(Subcommand)]
enum LabelAction {
    /// List labels with product counts
    List {
        /// Shop domain
        #[arg(short, long)]
        shop: String,
    },
    /// Create a label
    Create {
        /// Shop domain
        #[arg(short, long)]
        shop: String,

        /// Label name
        #[arg(short, long)]
        name: String,

        /// Label color (e.g., #ff0000)
        #[arg(short, long)]
        color: String,

        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a label and resync its products
    Delete {
        /// Shop domain
        #[arg(short, long)]
        shop: String,

        /// Label ID
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labels_cli=info,product_labels_admin=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Labels { action } => match action {
            LabelAction::List { shop } => commands::labels::list(&shop).await?,
            LabelAction::Create {
                shop,
                name,
                color,
                description,
            } => commands::labels::create(&shop, name, color, description).await?,
            LabelAction::Delete { shop, id } => commands::labels::delete(&shop, &id).await?,
        },
        Commands::Apply {
            shop,
            product,
            labels,
        } => commands::labels::apply(&shop, &product, labels).await?,
        Commands::Sync { shop, product } => commands::labels::sync(&shop, &product).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_collects_repeated_labels() {
        let cli = Cli::try_parse_from([
            "labels-cli", "apply", "-s", "demo.myshopify.com", "-p", "42", "-l", "a", "-l", "b",
        ])
        .map_err(|e| e.to_string());
        match cli.map(|c| c.command) {
            Ok(Commands::Apply { labels, .. }) => assert_eq!(labels, ["a", "b"]),
            _ => panic!("expected apply command"),
        }
    }
}
