//! Database operations for product labels.
//!
//! # Tables (schema `labels`)
//!
//! - `label` - Label definitions, scoped by shop
//! - `product_label` - Product/label associations, unique per
//!   `(shop, product_id, label_id)`, cascading from `label`
//!
//! # Backends
//!
//! - [`PgLabelStore`] - `PostgreSQL` via sqlx (production)
//! - [`MemoryLabelStore`] - in-process store with identical semantics (tests, CLI dry runs)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/admin/migrations/` and run via:
//! ```bash
//! cargo run -p product-labels-cli -- migrate
//! ```

pub mod labels;
pub mod memory;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use product_labels_core::{LabelId, ProductId, ShopDomain};

use crate::models::{Label, LabelUpdate, LabelWithCount, NewLabel, ShopStats};

pub use labels::PgLabelStore;
pub use memory::MemoryLabelStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Constraint violation (e.g., duplicate association).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Storage backend unavailable (in-memory fault injection, pool closed).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage boundary for labels and their product associations.
///
/// Every operation is scoped by shop. A label ID that exists under another
/// shop behaves exactly like an ID that does not exist at all.
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Insert a new label with a freshly generated ID.
    async fn insert_label(&self, shop: &ShopDomain, input: &NewLabel)
    -> Result<Label, RepositoryError>;

    /// Fetch one label.
    async fn get_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<Label>, RepositoryError>;

    /// Apply a partial update. Returns `None` if the label is not in `shop`.
    async fn update_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
        input: &LabelUpdate,
    ) -> Result<Option<Label>, RepositoryError>;

    /// Delete a label and, in the same unit of work, every association
    /// referencing it.
    ///
    /// Returns the products that lost the label, or `None` if the label is
    /// not in `shop`.
    async fn delete_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<Vec<ProductId>>, RepositoryError>;

    /// All labels of a shop with assignment counts, newest first.
    async fn list_labels(&self, shop: &ShopDomain) -> Result<Vec<LabelWithCount>, RepositoryError>;

    /// Number of products a label is attached to, or `None` if not in `shop`.
    async fn count_associations(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<i64>, RepositoryError>;

    /// Products a label is attached to.
    async fn products_for_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Vec<ProductId>, RepositoryError>;

    /// Labels attached to a product, oldest label first (ties broken by ID).
    async fn labels_for_product(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<Vec<Label>, RepositoryError>;

    /// Aggregate counts for a shop.
    async fn shop_stats(&self, shop: &ShopDomain) -> Result<ShopStats, RepositoryError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Open the unit of work used to reconcile one product's labels.
    ///
    /// Units of work for the same `(shop, product)` are serialized: a second
    /// call waits until the first commits or is dropped.
    async fn begin_reconcile(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<Box<dyn ReconcileTx>, RepositoryError>;
}

/// An open, exclusive unit of work over one product's associations.
///
/// Nothing is visible to other readers until [`ReconcileTx::commit`].
/// Dropping the value without committing discards every change.
#[async_trait]
pub trait ReconcileTx: Send {
    /// Label IDs currently associated with the product.
    async fn current_label_ids(&mut self) -> Result<BTreeSet<LabelId>, RepositoryError>;

    /// The subset of `candidates` that are live labels of the shop.
    ///
    /// Returned labels stay locked against deletion until the unit of work ends.
    async fn owned_label_ids(
        &mut self,
        candidates: &BTreeSet<LabelId>,
    ) -> Result<BTreeSet<LabelId>, RepositoryError>;

    /// Delete associations. Returns the number of rows removed.
    async fn remove(&mut self, ids: &BTreeSet<LabelId>) -> Result<u64, RepositoryError>;

    /// Insert associations. Returns the number of rows added.
    async fn insert(&mut self, ids: &BTreeSet<LabelId>) -> Result<u64, RepositoryError>;

    /// Make all changes durable and visible.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
