//! Builds the denormalized label snapshot published for a product.

use std::sync::Arc;

use tracing::instrument;

use product_labels_core::{LabelSnapshot, ProductId, ShopDomain};

use crate::db::{LabelStore, RepositoryError};

/// Reads current associations and label definitions into a [`LabelSnapshot`].
#[derive(Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn LabelStore>,
}

impl SnapshotBuilder {
    #[must_use]
    pub fn new(store: Arc<dyn LabelStore>) -> Self {
        Self { store }
    }

    /// Snapshot of the product's labels as they are stored right now.
    ///
    /// Entries follow label creation order, so a product's snapshot is stable
    /// across rebuilds. An unlabelled product yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the labels cannot be read.
    #[instrument(skip(self), fields(shop = %shop, product = %product))]
    pub async fn build(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<LabelSnapshot, RepositoryError> {
        let labels = self.store.labels_for_product(shop, product).await?;

        for label in labels.iter().filter(|l| !l.color.is_canonical_hex()) {
            tracing::debug!(
                label_id = %label.id,
                color = label.color.as_str(),
                "Publishing non-hex label color as entered"
            );
        }

        Ok(LabelSnapshot::new(
            labels.iter().map(|label| label.to_snapshot_entry()).collect(),
        ))
    }
}
