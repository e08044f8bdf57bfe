//! Label management operations exposed to callers.
//!
//! Validates input, enforces shop scoping, and keeps storefront metafields
//! in step when a label's published fields change or it is deleted.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::instrument;

use product_labels_core::{ColorError, LabelColor, LabelId, LabelSnapshot, ProductId, ShopDomain};

use super::label_sync::{OutcomeReport, RetryPolicy, SyncOrchestrator, SyncOutcome};
use super::snapshot::SnapshotBuilder;
use crate::db::{LabelStore, RepositoryError};
use crate::models::{Label, LabelUpdate, LabelWithCount, NewLabel, ShopStats};
use crate::shopify::MetafieldSink;

/// Errors from label operations.
#[derive(Debug, Error)]
pub enum LabelError {
    /// Input failed validation; nothing was written.
    #[error("validation error: {0}")]
    Validation(String),

    /// Label does not exist in this shop.
    #[error("label not found")]
    NotFound,

    /// Storage failure.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<ColorError> for LabelError {
    fn from(err: ColorError) -> Self {
        Self::Validation(err.to_string())
    }
}

// =============================================================================
// Requests and results
// =============================================================================

/// Input for creating a label.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLabelRequest {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial label update.
///
/// `description: null` clears the description; an absent field is left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLabelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
}

/// Maps a present field (even `null`) to `Some`, leaving absence to `default`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Sync outcome for one product touched by a label edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSync {
    pub product_id: ProductId,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Updated label plus the resyncs its change triggered.
#[derive(Debug, Clone, Serialize)]
pub struct LabelChange {
    pub label: Label,
    pub resynced: Vec<ProductSync>,
}

/// Deleted label ID plus the resyncs of products that lost it.
#[derive(Debug, Clone, Serialize)]
pub struct LabelDeletion {
    pub label_id: LabelId,
    pub resynced: Vec<ProductSync>,
}

// =============================================================================
// Service
// =============================================================================

/// Entry point for every label operation.
#[derive(Clone)]
pub struct LabelService {
    store: Arc<dyn LabelStore>,
    snapshots: SnapshotBuilder,
    orchestrator: SyncOrchestrator,
}

impl LabelService {
    #[must_use]
    pub fn new(
        store: Arc<dyn LabelStore>,
        sink: Arc<dyn MetafieldSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            snapshots: SnapshotBuilder::new(Arc::clone(&store)),
            orchestrator: SyncOrchestrator::new(Arc::clone(&store), sink, policy),
            store,
        }
    }

    /// Underlying store (readiness checks).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LabelStore> {
        &self.store
    }

    /// All labels of the shop with product counts, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Repository` on storage failure.
    pub async fn list_labels(&self, shop: &ShopDomain) -> Result<Vec<LabelWithCount>, LabelError> {
        Ok(self.store.list_labels(shop).await?)
    }

    /// Fetch one label.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::NotFound` if the label is not in `shop`.
    pub async fn get_label(&self, shop: &ShopDomain, id: &LabelId) -> Result<Label, LabelError> {
        self.store
            .get_label(shop, id)
            .await?
            .ok_or(LabelError::NotFound)
    }

    /// Create a label.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Validation` for a blank name or color.
    #[instrument(skip(self, request), fields(shop = %shop))]
    pub async fn create_label(
        &self,
        shop: &ShopDomain,
        request: CreateLabelRequest,
    ) -> Result<Label, LabelError> {
        let input = NewLabel {
            name: validate_name(&request.name)?,
            color: LabelColor::parse(&request.color)?,
            description: normalize_description(request.description),
        };

        let label = self.store.insert_label(shop, &input).await?;
        tracing::info!(label_id = %label.id, "Label created");
        Ok(label)
    }

    /// Update a label and resync every product showing it if its name or
    /// color changed.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Validation` for blank fields, `LabelError::NotFound`
    /// if the label is not in `shop`.
    #[instrument(skip(self, request), fields(shop = %shop, label_id = %id))]
    pub async fn update_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
        request: UpdateLabelRequest,
    ) -> Result<LabelChange, LabelError> {
        let update = LabelUpdate {
            name: request.name.as_deref().map(validate_name).transpose()?,
            color: request.color.as_deref().map(LabelColor::parse).transpose()?,
            description: request.description.map(normalize_description),
        };

        if update.is_empty() {
            let label = self.get_label(shop, id).await?;
            return Ok(LabelChange {
                label,
                resynced: Vec::new(),
            });
        }

        let label = self
            .store
            .update_label(shop, id, &update)
            .await?
            .ok_or(LabelError::NotFound)?;

        let resynced = if update.changes_snapshot() {
            let products = self.store.products_for_label(shop, id).await?;
            self.resync_all(shop, products).await
        } else {
            Vec::new()
        };

        tracing::info!(resynced = resynced.len(), "Label updated");
        Ok(LabelChange { label, resynced })
    }

    /// Delete a label with its associations, then resync the products that
    /// carried it.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::NotFound` if the label is not in `shop`.
    #[instrument(skip(self), fields(shop = %shop, label_id = %id))]
    pub async fn delete_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<LabelDeletion, LabelError> {
        let products = self
            .store
            .delete_label(shop, id)
            .await?
            .ok_or(LabelError::NotFound)?;

        tracing::info!(affected = products.len(), "Label deleted");
        let resynced = self.resync_all(shop, products).await;

        Ok(LabelDeletion {
            label_id: id.clone(),
            resynced,
        })
    }

    /// Number of products carrying the label.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::NotFound` if the label is not in `shop`.
    pub async fn count_associations(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<i64, LabelError> {
        self.store
            .count_associations(shop, id)
            .await?
            .ok_or(LabelError::NotFound)
    }

    /// Replace the product's label set and publish it.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Repository` if reconciliation failed in storage.
    /// Unknown IDs and sync failures come back inside the report.
    pub async fn apply_labels(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
        label_ids: impl IntoIterator<Item = LabelId>,
    ) -> Result<OutcomeReport, LabelError> {
        let desired: BTreeSet<LabelId> = label_ids.into_iter().collect();
        Ok(self.orchestrator.apply_labels(shop, product, &desired).await?)
    }

    /// The product's labels as they would be published now.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Repository` on storage failure.
    pub async fn labels_for_product(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<LabelSnapshot, LabelError> {
        Ok(self.snapshots.build(shop, product).await?)
    }

    /// Re-push the product's current snapshot.
    pub async fn sync_product(&self, shop: &ShopDomain, product: &ProductId) -> SyncOutcome {
        self.orchestrator.sync_product(shop, product).await
    }

    /// Aggregate counts for the shop dashboard.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Repository` on storage failure.
    pub async fn shop_stats(&self, shop: &ShopDomain) -> Result<ShopStats, LabelError> {
        Ok(self.store.shop_stats(shop).await?)
    }

    /// Resync products concurrently; results are ordered by product ID.
    async fn resync_all(&self, shop: &ShopDomain, products: Vec<ProductId>) -> Vec<ProductSync> {
        let mut tasks = JoinSet::new();
        for product_id in products {
            let orchestrator = self.orchestrator.clone();
            let shop = shop.clone();
            tasks.spawn(async move {
                let outcome = orchestrator.sync_product(&shop, &product_id).await;
                ProductSync {
                    product_id,
                    outcome,
                }
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sync) => {
                    if !sync.outcome.is_synced() {
                        tracing::warn!(product_id = %sync.product_id, "Product metafield left stale");
                    }
                    results.push(sync);
                }
                Err(e) => tracing::error!(error = %e, "Resync task failed"),
            }
        }
        results.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        results
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(name: &str) -> Result<String, LabelError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LabelError::Validation("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}
