//! Label management and resync commands.
//!
//! # Usage
//!
//! ```bash
//! labels-cli labels list -s demo.myshopify.com
//! labels-cli labels create -s demo.myshopify.com -n Sale -c '#ff0000'
//! labels-cli labels delete -s demo.myshopify.com --id 5f0c...
//! labels-cli apply -s demo.myshopify.com -p 632910392 -l 5f0c... -l 91ab...
//! labels-cli sync -s demo.myshopify.com -p gid://shopify/Product/632910392
//! ```
//!
//! # Environment Variables
//!
//! Same as the admin server: `LABELS_DATABASE_URL`, `SHOPIFY_STORE`,
//! `SHOPIFY_ACCESS_TOKEN` and the optional sync settings.

use std::sync::Arc;

use product_labels_admin::config::AdminConfig;
use product_labels_admin::db::{self, PgLabelStore};
use product_labels_admin::services::{CreateLabelRequest, LabelService, RetryPolicy};
use product_labels_admin::shopify::MetafieldClient;
use product_labels_core::{LabelId, ProductId, ShopDomain};

use super::{CommandError, print_json};

/// Build the label service from the environment.
async fn service() -> Result<LabelService, CommandError> {
    let config = AdminConfig::from_env()?;

    tracing::info!("Connecting to labels database...");
    let pool = db::create_pool(&config.database_url).await?;
    let sink = MetafieldClient::new(&config.shopify)?;

    Ok(LabelService::new(
        Arc::new(PgLabelStore::new(pool)),
        Arc::new(sink),
        RetryPolicy::from_config(&config.shopify),
    ))
}

/// Print the shop's labels with product counts.
pub async fn list(shop: &str) -> Result<(), CommandError> {
    let shop = ShopDomain::parse(shop)?;
    let labels = service().await?.list_labels(&shop).await?;
    print_json(&labels)
}

/// Create a label and print it.
pub async fn create(
    shop: &str,
    name: String,
    color: String,
    description: Option<String>,
) -> Result<(), CommandError> {
    let shop = ShopDomain::parse(shop)?;
    let label = service()
        .await?
        .create_label(
            &shop,
            CreateLabelRequest {
                name,
                color,
                description,
            },
        )
        .await?;
    tracing::info!("Created label {} ({})", label.name, label.id);
    print_json(&label)
}

/// Delete a label, resyncing the products that carried it.
pub async fn delete(shop: &str, id: &str) -> Result<(), CommandError> {
    let shop = ShopDomain::parse(shop)?;
    let deletion = service()
        .await?
        .delete_label(&shop, &LabelId::new(id))
        .await?;
    print_json(&deletion)
}

/// Set a product's labels and push them to Shopify.
pub async fn apply(shop: &str, product: &str, label_ids: Vec<String>) -> Result<(), CommandError> {
    let shop = ShopDomain::parse(shop)?;
    let product = ProductId::parse(product)?;
    let report = service()
        .await?
        .apply_labels(
            &shop,
            &product,
            label_ids.into_iter().map(LabelId::new),
        )
        .await?;

    print_json(&report)?;
    if report.associations_committed() {
        Ok(())
    } else {
        Err(CommandError::Incomplete(
            "labels not saved: unknown label ids".to_string(),
        ))
    }
}

/// Re-push a product's current labels.
pub async fn sync(shop: &str, product: &str) -> Result<(), CommandError> {
    let shop = ShopDomain::parse(shop)?;
    let product = ProductId::parse(product)?;
    let outcome = service()
        .await?
        .sync_product(&shop, &product)
        .await;

    print_json(&outcome)?;
    if outcome.is_synced() {
        Ok(())
    } else {
        Err(CommandError::Incomplete(format!(
            "metafield for {product} not updated"
        )))
    }
}
