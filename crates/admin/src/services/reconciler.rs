//! Label reconciliation for a single product.
//!
//! Given the full desired label set, computes the difference against the
//! stored associations and applies it as one unit of work. Either every
//! change lands or none does.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use product_labels_core::{LabelId, ProductId, ShopDomain};

use crate::db::{LabelStore, RepositoryError};

/// Errors that abort a reconciliation without changing anything.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Some requested labels do not exist in the shop.
    #[error("unknown label ids: {}", format_ids(.0))]
    UnknownLabels(BTreeSet<LabelId>),

    /// Storage failed mid-reconciliation; the unit of work was rolled back.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

fn format_ids(ids: &BTreeSet<LabelId>) -> String {
    ids.iter()
        .map(LabelId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Changes needed to turn the current association set into the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationDiff {
    /// Desired but not yet associated.
    pub to_add: BTreeSet<LabelId>,
    /// Associated but no longer desired.
    pub to_remove: BTreeSet<LabelId>,
}

impl AssociationDiff {
    /// Compute `desired \ current` and `current \ desired`.
    #[must_use]
    pub fn between(current: &BTreeSet<LabelId>, desired: &BTreeSet<LabelId>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of a committed reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// The association set now stored for the product.
    pub applied: BTreeSet<LabelId>,
    /// Labels attached by this call.
    pub added: BTreeSet<LabelId>,
    /// Labels detached by this call.
    pub removed: BTreeSet<LabelId>,
}

impl Reconciliation {
    /// Whether the call changed any stored association.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Applies desired label sets to products.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LabelStore>,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn LabelStore>) -> Self {
        Self { store }
    }

    /// Make the product's stored label set equal `desired`.
    ///
    /// Duplicates in the caller's list are already collapsed by the set type.
    /// Unknown IDs (including IDs of other shops) abort the whole call.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownLabels`] when any added ID is not a
    /// label of `shop`, or [`ReconcileError::Repository`] on storage failure.
    /// In both cases no association has changed.
    #[instrument(skip(self, desired), fields(shop = %shop, product = %product, desired = desired.len()))]
    pub async fn set_labels(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
        desired: &BTreeSet<LabelId>,
    ) -> Result<Reconciliation, ReconcileError> {
        let mut tx = self.store.begin_reconcile(shop, product).await?;

        let current = tx.current_label_ids().await?;
        let diff = AssociationDiff::between(&current, desired);

        if diff.is_empty() {
            tracing::debug!("Label set unchanged");
            tx.commit().await?;
            return Ok(Reconciliation {
                applied: current,
                added: BTreeSet::new(),
                removed: BTreeSet::new(),
            });
        }

        if !diff.to_add.is_empty() {
            let owned = tx.owned_label_ids(&diff.to_add).await?;
            let unknown: BTreeSet<LabelId> = diff.to_add.difference(&owned).cloned().collect();
            if !unknown.is_empty() {
                tracing::info!(unknown = unknown.len(), "Rejecting unknown label ids");
                return Err(ReconcileError::UnknownLabels(unknown));
            }
        }

        tx.remove(&diff.to_remove).await?;
        tx.insert(&diff.to_add).await?;
        tx.commit().await?;

        tracing::info!(
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            "Product labels reconciled"
        );

        Ok(Reconciliation {
            applied: desired.clone(),
            added: diff.to_add,
            removed: diff.to_remove,
        })
    }
}
