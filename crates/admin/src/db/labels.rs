//! `PostgreSQL` label store.
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate builds
//! without a live database; row types are validated on conversion.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use product_labels_core::{LabelColor, LabelId, ProductId, ShopDomain};

use super::{LabelStore, ReconcileTx, RepositoryError};
use crate::models::{Label, LabelUpdate, LabelWithCount, NewLabel, ShopStats};

/// Columns selected for every label query.
const LABEL_COLUMNS: &str = "l.id, l.shop, l.name, l.color, l.description, l.created_at";

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for label queries.
#[derive(Debug, sqlx::FromRow)]
struct LabelRow {
    id: String,
    shop: String,
    name: String,
    color: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LabelRow> for Label {
    type Error = RepositoryError;

    fn try_from(row: LabelRow) -> Result<Self, Self::Error> {
        let color = LabelColor::parse(&row.color).map_err(|e| {
            RepositoryError::DataCorruption(format!("label {} has invalid color: {e}", row.id))
        })?;

        Ok(Self {
            id: LabelId::new(row.id),
            shop: ShopDomain::new(row.shop),
            name: row.name,
            color,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

/// Internal row type for labels with assignment counts.
#[derive(Debug, sqlx::FromRow)]
struct LabelWithCountRow {
    #[sqlx(flatten)]
    label: LabelRow,
    product_count: i64,
}

impl TryFrom<LabelWithCountRow> for LabelWithCount {
    type Error = RepositoryError;

    fn try_from(row: LabelWithCountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            label: row.label.try_into()?,
            product_count: row.product_count,
        })
    }
}

/// Internal row type for shop statistics.
#[derive(Debug, sqlx::FromRow)]
struct ShopStatsRow {
    total_labels: i64,
    total_assignments: i64,
    labelled_products: i64,
}

fn to_text_array(ids: &BTreeSet<LabelId>) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_owned()).collect()
}

// =============================================================================
// Store
// =============================================================================

/// Label store backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgLabelStore {
    pool: PgPool,
}

impl PgLabelStore {
    /// Create a new store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LabelStore for PgLabelStore {
    #[instrument(skip(self, input), fields(shop = %shop))]
    async fn insert_label(
        &self,
        shop: &ShopDomain,
        input: &NewLabel,
    ) -> Result<Label, RepositoryError> {
        let row = sqlx::query_as::<_, LabelRow>(
            r"
            INSERT INTO labels.label (id, shop, name, color, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, shop, name, color, description, created_at
            ",
        )
        .bind(LabelId::generate().as_str())
        .bind(shop.as_str())
        .bind(&input.name)
        .bind(input.color.as_str())
        .bind(input.description.as_deref())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), fields(shop = %shop, label_id = %id))]
    async fn get_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<Label>, RepositoryError> {
        let row = sqlx::query_as::<_, LabelRow>(&format!(
            "SELECT {LABEL_COLUMNS} FROM labels.label l WHERE l.id = $1 AND l.shop = $2"
        ))
        .bind(id.as_str())
        .bind(shop.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self, input), fields(shop = %shop, label_id = %id))]
    async fn update_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
        input: &LabelUpdate,
    ) -> Result<Option<Label>, RepositoryError> {
        let row = sqlx::query_as::<_, LabelRow>(
            r"
            UPDATE labels.label
            SET
                name = COALESCE($3::text, name),
                color = COALESCE($4::text, color),
                description = CASE WHEN $5::bool THEN $6::text ELSE description END
            WHERE id = $1 AND shop = $2
            RETURNING id, shop, name, color, description, created_at
            ",
        )
        .bind(id.as_str())
        .bind(shop.as_str())
        .bind(input.name.as_deref())
        .bind(input.color.as_ref().map(LabelColor::as_str))
        .bind(input.description.is_some())
        .bind(input.description.clone().flatten())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self), fields(shop = %shop, label_id = %id))]
    async fn delete_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<Vec<ProductId>>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Lock the label row; concurrent reconciliations hold FOR SHARE on it.
        let exists = sqlx::query_scalar::<_, String>(
            "SELECT id FROM labels.label WHERE id = $1 AND shop = $2 FOR UPDATE",
        )
        .bind(id.as_str())
        .bind(shop.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_none() {
            return Ok(None);
        }

        let products = sqlx::query_scalar::<_, ProductId>(
            "DELETE FROM labels.product_label WHERE label_id = $1 RETURNING product_id",
        )
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM labels.label WHERE id = $1 AND shop = $2")
            .bind(id.as_str())
            .bind(shop.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            affected_products = products.len(),
            "Label deleted with associations"
        );

        Ok(Some(products))
    }

    #[instrument(skip(self), fields(shop = %shop))]
    async fn list_labels(&self, shop: &ShopDomain) -> Result<Vec<LabelWithCount>, RepositoryError> {
        let rows = sqlx::query_as::<_, LabelWithCountRow>(&format!(
            r"
            SELECT {LABEL_COLUMNS}, COUNT(pl.label_id) AS product_count
            FROM labels.label l
            LEFT JOIN labels.product_label pl ON pl.label_id = l.id
            WHERE l.shop = $1
            GROUP BY l.id
            ORDER BY l.created_at DESC, l.id DESC
            "
        ))
        .bind(shop.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(shop = %shop, label_id = %id))]
    async fn count_associations(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<i64>, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(pl.label_id)
            FROM labels.label l
            LEFT JOIN labels.product_label pl ON pl.label_id = l.id
            WHERE l.id = $1 AND l.shop = $2
            GROUP BY l.id
            ",
        )
        .bind(id.as_str())
        .bind(shop.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }

    #[instrument(skip(self), fields(shop = %shop, label_id = %id))]
    async fn products_for_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Vec<ProductId>, RepositoryError> {
        let products = sqlx::query_scalar::<_, ProductId>(
            r"
            SELECT product_id FROM labels.product_label
            WHERE shop = $1 AND label_id = $2
            ORDER BY product_id
            ",
        )
        .bind(shop.as_str())
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    #[instrument(skip(self), fields(shop = %shop, product_id = %product))]
    async fn labels_for_product(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<Vec<Label>, RepositoryError> {
        let rows = sqlx::query_as::<_, LabelRow>(&format!(
            r"
            SELECT {LABEL_COLUMNS}
            FROM labels.product_label pl
            INNER JOIN labels.label l ON l.id = pl.label_id AND l.shop = pl.shop
            WHERE pl.shop = $1 AND pl.product_id = $2
            ORDER BY l.created_at ASC, l.id ASC
            "
        ))
        .bind(shop.as_str())
        .bind(product.as_gid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(shop = %shop))]
    async fn shop_stats(&self, shop: &ShopDomain) -> Result<ShopStats, RepositoryError> {
        let row = sqlx::query_as::<_, ShopStatsRow>(
            r"
            SELECT
                (SELECT COUNT(*) FROM labels.label WHERE shop = $1) AS total_labels,
                (SELECT COUNT(*) FROM labels.product_label WHERE shop = $1) AS total_assignments,
                (SELECT COUNT(DISTINCT product_id) FROM labels.product_label WHERE shop = $1)
                    AS labelled_products
            ",
        )
        .bind(shop.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(ShopStats {
            total_labels: row.total_labels,
            total_assignments: row.total_assignments,
            labelled_products: row.labelled_products,
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(shop = %shop, product_id = %product))]
    async fn begin_reconcile(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<Box<dyn ReconcileTx>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serialize reconciliations of the same product for the rest of the
        // transaction. The unit separator keeps ("a", "bc") and ("ab", "c") apart.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{}\u{1f}{}", shop.as_str(), product.as_gid()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgReconcileTx {
            tx,
            shop: shop.clone(),
            product: product.clone(),
        }))
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// Reconciliation transaction holding the per-product advisory lock.
struct PgReconcileTx {
    tx: Transaction<'static, Postgres>,
    shop: ShopDomain,
    product: ProductId,
}

#[async_trait]
impl ReconcileTx for PgReconcileTx {
    async fn current_label_ids(&mut self) -> Result<BTreeSet<LabelId>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, LabelId>(
            "SELECT label_id FROM labels.product_label WHERE shop = $1 AND product_id = $2",
        )
        .bind(self.shop.as_str())
        .bind(self.product.as_gid())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn owned_label_ids(
        &mut self,
        candidates: &BTreeSet<LabelId>,
    ) -> Result<BTreeSet<LabelId>, RepositoryError> {
        if candidates.is_empty() {
            return Ok(BTreeSet::new());
        }

        let ids = sqlx::query_scalar::<_, LabelId>(
            "SELECT id FROM labels.label WHERE shop = $1 AND id = ANY($2) FOR SHARE",
        )
        .bind(self.shop.as_str())
        .bind(to_text_array(candidates))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn remove(&mut self, ids: &BTreeSet<LabelId>) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            DELETE FROM labels.product_label
            WHERE shop = $1 AND product_id = $2 AND label_id = ANY($3)
            ",
        )
        .bind(self.shop.as_str())
        .bind(self.product.as_gid())
        .bind(to_text_array(ids))
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert(&mut self, ids: &BTreeSet<LabelId>) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            INSERT INTO labels.product_label (shop, product_id, label_id)
            SELECT $1, $2, UNNEST($3::text[])
            ",
        )
        .bind(self.shop.as_str())
        .bind(self.product.as_gid())
        .bind(to_text_array(ids))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("product_label_unique")
            {
                return RepositoryError::Conflict(
                    "Label already attached to this product".to_string(),
                );
            }
            RepositoryError::Database(e)
        })?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row(color: &str) -> LabelRow {
        LabelRow {
            id: "L1".to_string(),
            shop: "shop-1".to_string(),
            name: "Sale".to_string(),
            color: color.to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion_keeps_raw_color() {
        let label: Label = row("#Ff0").try_into().unwrap();
        assert_eq!(label.id.as_str(), "L1");
        assert_eq!(label.shop.as_str(), "shop-1");
        assert_eq!(label.color.as_str(), "#Ff0");
    }

    #[test]
    fn test_row_conversion_rejects_empty_color() {
        let result: Result<Label, _> = row("").try_into();
        assert!(matches!(result, Err(RepositoryError::DataCorruption(_))));
    }

    #[test]
    fn test_text_array_is_sorted() {
        let ids: BTreeSet<LabelId> = ["b", "a"].into_iter().map(LabelId::new).collect();
        assert_eq!(to_text_array(&ids), vec!["a".to_string(), "b".to_string()]);
    }
}
