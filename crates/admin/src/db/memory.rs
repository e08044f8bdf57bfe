//! In-memory label store.
//!
//! Mirrors [`PgLabelStore`](super::PgLabelStore) semantics over a single
//! `tokio` mutex: a reconciliation unit of work owns the lock for its whole
//! lifetime and stages changes on a private copy, so an uncommitted or
//! failed unit of work leaves no trace.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use product_labels_core::{LabelId, ProductId, ShopDomain};

use super::{LabelStore, ReconcileTx, RepositoryError};
use crate::models::{Label, LabelUpdate, LabelWithCount, NewLabel, ShopStats};

type ProductKey = (ShopDomain, ProductId);

#[derive(Debug, Default)]
struct MemoryState {
    labels: HashMap<LabelId, StoredLabel>,
    associations: HashMap<ProductKey, BTreeSet<LabelId>>,
    next_seq: u64,
    last_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredLabel {
    seq: u64,
    label: Label,
}

impl MemoryState {
    fn owned(&self, shop: &ShopDomain, id: &LabelId) -> Option<&StoredLabel> {
        self.labels.get(id).filter(|stored| &stored.label.shop == shop)
    }

    fn count_for(&self, id: &LabelId) -> i64 {
        let count = self
            .associations
            .values()
            .filter(|set| set.contains(id))
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    /// Creation timestamps are strictly increasing so ordering by time is total.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }
}

/// Label store held entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLabelStore {
    state: Arc<Mutex<MemoryState>>,
    fail_inserts: Arc<AtomicBool>,
}

impl MemoryLabelStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every association insert fail until switched off again.
    ///
    /// Used to exercise rollback of partially applied reconciliations.
    pub fn fail_association_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Total association rows across all shops.
    pub async fn association_count(&self) -> usize {
        self.state
            .lock()
            .await
            .associations
            .values()
            .map(BTreeSet::len)
            .sum()
    }
}

#[async_trait]
impl LabelStore for MemoryLabelStore {
    async fn insert_label(
        &self,
        shop: &ShopDomain,
        input: &NewLabel,
    ) -> Result<Label, RepositoryError> {
        let mut state = self.state.lock().await;
        let created_at = state.next_created_at();
        let seq = state.next_seq;
        state.next_seq += 1;

        let label = Label {
            id: LabelId::generate(),
            shop: shop.clone(),
            name: input.name.clone(),
            color: input.color.clone(),
            description: input.description.clone(),
            created_at,
        };

        state.labels.insert(
            label.id.clone(),
            StoredLabel {
                seq,
                label: label.clone(),
            },
        );

        Ok(label)
    }

    async fn get_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<Label>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.owned(shop, id).map(|stored| stored.label.clone()))
    }

    async fn update_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
        input: &LabelUpdate,
    ) -> Result<Option<Label>, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(stored) = state
            .labels
            .get_mut(id)
            .filter(|stored| &stored.label.shop == shop)
        else {
            return Ok(None);
        };

        if let Some(name) = &input.name {
            stored.label.name.clone_from(name);
        }
        if let Some(color) = &input.color {
            stored.label.color = color.clone();
        }
        if let Some(description) = &input.description {
            stored.label.description.clone_from(description);
        }

        Ok(Some(stored.label.clone()))
    }

    async fn delete_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<Vec<ProductId>>, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.owned(shop, id).is_none() {
            return Ok(None);
        }

        let mut affected = Vec::new();
        state.associations.retain(|(_, product), set| {
            if set.remove(id) {
                affected.push(product.clone());
            }
            !set.is_empty()
        });
        state.labels.remove(id);
        affected.sort();

        Ok(Some(affected))
    }

    async fn list_labels(&self, shop: &ShopDomain) -> Result<Vec<LabelWithCount>, RepositoryError> {
        let state = self.state.lock().await;
        let mut labels: Vec<&StoredLabel> = state
            .labels
            .values()
            .filter(|stored| &stored.label.shop == shop)
            .collect();
        labels.sort_by(|a, b| {
            (b.label.created_at, b.seq).cmp(&(a.label.created_at, a.seq))
        });

        Ok(labels
            .into_iter()
            .map(|stored| LabelWithCount {
                label: stored.label.clone(),
                product_count: state.count_for(&stored.label.id),
            })
            .collect())
    }

    async fn count_associations(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Option<i64>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.owned(shop, id).map(|_| state.count_for(id)))
    }

    async fn products_for_label(
        &self,
        shop: &ShopDomain,
        id: &LabelId,
    ) -> Result<Vec<ProductId>, RepositoryError> {
        let state = self.state.lock().await;
        let mut products: Vec<ProductId> = state
            .associations
            .iter()
            .filter(|((s, _), set)| s == shop && set.contains(id))
            .map(|((_, product), _)| product.clone())
            .collect();
        products.sort();
        Ok(products)
    }

    async fn labels_for_product(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<Vec<Label>, RepositoryError> {
        let state = self.state.lock().await;
        let Some(ids) = state.associations.get(&(shop.clone(), product.clone())) else {
            return Ok(Vec::new());
        };

        let mut labels: Vec<&StoredLabel> = ids
            .iter()
            .filter_map(|id| state.owned(shop, id))
            .collect();
        labels.sort_by(|a, b| {
            (a.label.created_at, a.seq).cmp(&(b.label.created_at, b.seq))
        });

        Ok(labels.into_iter().map(|stored| stored.label.clone()).collect())
    }

    async fn shop_stats(&self, shop: &ShopDomain) -> Result<ShopStats, RepositoryError> {
        let state = self.state.lock().await;
        let to_i64 = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);

        let total_labels = state
            .labels
            .values()
            .filter(|stored| &stored.label.shop == shop)
            .count();
        let (total_assignments, labelled_products) = state
            .associations
            .iter()
            .filter(|((s, _), set)| s == shop && !set.is_empty())
            .fold((0, 0), |(rows, products), (_, set)| {
                (rows + set.len(), products + 1)
            });

        Ok(ShopStats {
            total_labels: to_i64(total_labels),
            total_assignments: to_i64(total_assignments),
            labelled_products: to_i64(labelled_products),
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn begin_reconcile(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
    ) -> Result<Box<dyn ReconcileTx>, RepositoryError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let key = (shop.clone(), product.clone());
        let staged = guard.associations.get(&key).cloned().unwrap_or_default();

        Ok(Box::new(MemoryReconcileTx {
            guard,
            key,
            staged,
            fail_inserts: self.fail_inserts.load(Ordering::SeqCst),
        }))
    }
}

/// Unit of work holding the store lock and a staged association set.
struct MemoryReconcileTx {
    guard: OwnedMutexGuard<MemoryState>,
    key: ProductKey,
    staged: BTreeSet<LabelId>,
    fail_inserts: bool,
}

#[async_trait]
impl ReconcileTx for MemoryReconcileTx {
    async fn current_label_ids(&mut self) -> Result<BTreeSet<LabelId>, RepositoryError> {
        Ok(self.staged.clone())
    }

    async fn owned_label_ids(
        &mut self,
        candidates: &BTreeSet<LabelId>,
    ) -> Result<BTreeSet<LabelId>, RepositoryError> {
        let shop = &self.key.0;
        Ok(candidates
            .iter()
            .filter(|id| self.guard.owned(shop, id).is_some())
            .cloned()
            .collect())
    }

    async fn remove(&mut self, ids: &BTreeSet<LabelId>) -> Result<u64, RepositoryError> {
        let before = self.staged.len();
        self.staged.retain(|id| !ids.contains(id));
        Ok(u64::try_from(before - self.staged.len()).unwrap_or(u64::MAX))
    }

    async fn insert(&mut self, ids: &BTreeSet<LabelId>) -> Result<u64, RepositoryError> {
        if self.fail_inserts && !ids.is_empty() {
            return Err(RepositoryError::Unavailable(
                "association insert failed".to_string(),
            ));
        }
        if let Some(duplicate) = ids.iter().find(|id| self.staged.contains(*id)) {
            return Err(RepositoryError::Conflict(format!(
                "label {duplicate} already attached to this product"
            )));
        }
        self.staged.extend(ids.iter().cloned());
        Ok(u64::try_from(ids.len()).unwrap_or(u64::MAX))
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let Self {
            mut guard,
            key,
            staged,
            ..
        } = *self;

        if staged.is_empty() {
            guard.associations.remove(&key);
        } else {
            guard.associations.insert(key, staged);
        }
        Ok(())
    }
}
