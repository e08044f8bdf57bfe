//! Reconcile-then-sync orchestration.
//!
//! `apply_labels` runs the state machine
//!
//! ```text
//! Reconciling -> ReconcileFailed
//!             -> Reconciled -> Syncing -> Synced | SyncFailed | PartialSuccess
//! ```
//!
//! Associations are the source of truth: once reconciliation commits, no
//! sync failure or caller cancellation rolls it back.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{Instrument, instrument};

use product_labels_core::{LabelId, ProductId, ShopDomain};

use super::reconciler::{ReconcileError, Reconciler, Reconciliation};
use super::snapshot::SnapshotBuilder;
use crate::config::ShopifySyncConfig;
use crate::db::{LabelStore, RepositoryError};
use crate::shopify::{MetafieldSink, SyncFailure, SyncResult};

// =============================================================================
// Retry policy
// =============================================================================

/// Bounded exponential backoff for transient push failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// 3 attempts, 200ms doubling up to 5s.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }

    /// Attempt budget and first delay from configuration.
    #[must_use]
    pub fn from_config(config: &ShopifySyncConfig) -> Self {
        let standard = Self::standard();
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_backoff.min(standard.max_delay),
            ..standard
        }
    }

    /// `attempts` tries with no delay between them (tests, CLI).
    #[must_use]
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// How long to wait before the next attempt.
    ///
    /// A `Retry-After` hint raises the wait. The result never exceeds
    /// `max_delay`, so a synchronous sync stays time-bounded.
    #[must_use]
    pub fn wait_before_retry(&self, backoff: Duration, failure: &SyncFailure) -> Duration {
        let backoff = backoff.min(self.max_delay);
        failure
            .retry_after_secs
            .map(|secs| Duration::from_secs(secs).min(self.max_delay))
            .map_or(backoff, |hint| backoff.max(hint))
    }

    fn next_backoff(&self, backoff: Duration) -> Duration {
        backoff.mul_f64(self.factor).min(self.max_delay)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of pushing one product's current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Shopify accepted the snapshot.
    Synced { attempts: u32 },
    /// Every attempt failed transiently, or the snapshot could not be read.
    Exhausted { attempts: u32, last_error: SyncFailure },
    /// Shopify refused the snapshot; retrying will not help.
    Rejected { attempts: u32, failure: SyncFailure },
}

impl SyncOutcome {
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Synced { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Rejected { attempts, .. } => *attempts,
        }
    }
}

/// Terminal state of one `apply_labels` call.
///
/// Tells the caller separately whether associations were saved and whether
/// the storefront copy is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeReport {
    /// Saved and visible on the storefront.
    Synced {
        #[serde(flatten)]
        reconciliation: Reconciliation,
        attempts: u32,
    },
    /// Saved; the storefront copy is stale until the product is resynced.
    PartialSuccess {
        #[serde(flatten)]
        reconciliation: Reconciliation,
        attempts: u32,
        last_error: SyncFailure,
    },
    /// Saved; Shopify refused the metafield.
    SyncFailed {
        #[serde(flatten)]
        reconciliation: Reconciliation,
        attempts: u32,
        failure: SyncFailure,
    },
    /// Nothing saved; some requested labels do not exist in the shop.
    ReconcileFailed { unknown_label_ids: BTreeSet<LabelId> },
}

impl OutcomeReport {
    fn from_sync(reconciliation: Reconciliation, outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Synced { attempts } => Self::Synced {
                reconciliation,
                attempts,
            },
            SyncOutcome::Exhausted {
                attempts,
                last_error,
            } => Self::PartialSuccess {
                reconciliation,
                attempts,
                last_error,
            },
            SyncOutcome::Rejected { attempts, failure } => Self::SyncFailed {
                reconciliation,
                attempts,
                failure,
            },
        }
    }

    /// Whether the requested label set is now stored.
    #[must_use]
    pub const fn associations_committed(&self) -> bool {
        !matches!(self, Self::ReconcileFailed { .. })
    }

    /// Whether a later `sync_product` would bring the storefront up to date.
    #[must_use]
    pub const fn needs_resync(&self) -> bool {
        matches!(self, Self::PartialSuccess { .. })
    }

    /// The committed reconciliation, if any.
    #[must_use]
    pub const fn reconciliation(&self) -> Option<&Reconciliation> {
        match self {
            Self::Synced { reconciliation, .. }
            | Self::PartialSuccess { reconciliation, .. }
            | Self::SyncFailed { reconciliation, .. } => Some(reconciliation),
            Self::ReconcileFailed { .. } => None,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives reconciliation, snapshot building and metafield pushes.
#[derive(Clone)]
pub struct SyncOrchestrator {
    reconciler: Reconciler,
    snapshots: SnapshotBuilder,
    sink: Arc<dyn MetafieldSink>,
    policy: RetryPolicy,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn LabelStore>, sink: Arc<dyn MetafieldSink>, policy: RetryPolicy) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&store)),
            snapshots: SnapshotBuilder::new(store),
            sink,
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Set the product's labels to exactly `desired`, then publish them.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` only when reconciliation itself failed in
    /// storage, in which case nothing was committed. Unknown labels and
    /// every sync failure are reported through [`OutcomeReport`].
    #[instrument(skip(self, desired), fields(shop = %shop, product_id = %product))]
    pub async fn apply_labels(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
        desired: &BTreeSet<LabelId>,
    ) -> Result<OutcomeReport, RepositoryError> {
        let reconciliation = match self.reconciler.set_labels(shop, product, desired).await {
            Ok(reconciliation) => reconciliation,
            Err(ReconcileError::UnknownLabels(unknown_label_ids)) => {
                return Ok(OutcomeReport::ReconcileFailed { unknown_label_ids });
            }
            Err(ReconcileError::Repository(e)) => return Err(e),
        };

        let outcome = self.sync_product(shop, product).await;
        let report = OutcomeReport::from_sync(reconciliation, outcome);

        if report.needs_resync() {
            tracing::warn!("Labels saved but storefront metafield is stale");
        }

        Ok(report)
    }

    /// Push the product's current snapshot without touching associations.
    ///
    /// Runs on its own task: if the caller stops waiting, the push still
    /// completes or fails on its own.
    pub async fn sync_product(&self, shop: &ShopDomain, product: &ProductId) -> SyncOutcome {
        let this = self.clone();
        let shop = shop.clone();
        let product = product.clone();

        let task = tokio::spawn(
            async move { this.push_current(&shop, &product).await }
                .instrument(tracing::Span::current()),
        );

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Sync task failed");
                SyncOutcome::Exhausted {
                    attempts: 0,
                    last_error: SyncFailure::transport(format!("sync task failed: {e}")),
                }
            }
        }
    }

    async fn push_current(&self, shop: &ShopDomain, product: &ProductId) -> SyncOutcome {
        let snapshot = match self.snapshots.build(shop, product).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "Could not read label snapshot");
                return SyncOutcome::Exhausted {
                    attempts: 0,
                    last_error: SyncFailure::transport(format!("snapshot unavailable: {e}")),
                };
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.sink.push(shop, product, &snapshot).await {
                SyncResult::Success => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Metafield sync succeeded after retry");
                    }
                    return SyncOutcome::Synced { attempts: attempt };
                }
                SyncResult::Rejected(failure) => {
                    return SyncOutcome::Rejected {
                        attempts: attempt,
                        failure,
                    };
                }
                SyncResult::Transient(failure) => {
                    if attempt >= max_attempts {
                        tracing::warn!(attempt, failure = %failure, "Metafield sync attempts exhausted");
                        return SyncOutcome::Exhausted {
                            attempts: attempt,
                            last_error: failure,
                        };
                    }

                    let wait = self.policy.wait_before_retry(backoff, &failure);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        failure = %failure,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "Metafield sync failed, retrying"
                    );
                    sleep(wait).await;
                    backoff = self.policy.next_backoff(backoff);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::db::MemoryLabelStore;
    use crate::models::NewLabel;
    use product_labels_core::{LabelColor, LabelSnapshot};

    /// Sink replaying a fixed script, then succeeding.
    #[derive(Default)]
    struct ScriptedSink {
        script: Mutex<VecDeque<SyncResult>>,
        calls: AtomicU32,
        pushed: Mutex<Vec<LabelSnapshot>>,
    }

    impl ScriptedSink {
        fn new(script: impl IntoIterator<Item = SyncResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Self::default()
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetafieldSink for ScriptedSink {
        async fn push(
            &self,
            _shop: &ShopDomain,
            _product: &ProductId,
            snapshot: &LabelSnapshot,
        ) -> SyncResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pushed.lock().unwrap().push(snapshot.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SyncResult::Success)
        }
    }

    fn transient(reason: &str) -> SyncResult {
        SyncResult::Transient(SyncFailure {
            status: Some(503),
            reason: reason.to_string(),
            retry_after_secs: None,
        })
    }

    fn shop() -> ShopDomain {
        ShopDomain::new("shop.myshopify.com")
    }

    fn product() -> ProductId {
        ProductId::parse("777").unwrap()
    }

    async fn store_with(names: &[&str]) -> (Arc<MemoryLabelStore>, Vec<LabelId>) {
        let store = Arc::new(MemoryLabelStore::new());
        let mut ids = Vec::new();
        for name in names {
            let label = store
                .insert_label(
                    &shop(),
                    &NewLabel {
                        name: (*name).to_string(),
                        color: LabelColor::parse("#123456").unwrap(),
                        description: None,
                    },
                )
                .await
                .unwrap();
            ids.push(label.id);
        }
        (store, ids)
    }

    fn desired(ids: &[LabelId]) -> BTreeSet<LabelId> {
        ids.iter().cloned().collect()
    }

    #[test]
    fn test_retry_after_raises_wait_within_cap() {
        let policy = RetryPolicy::standard();
        let hinted = |secs| SyncFailure {
            status: Some(429),
            reason: String::new(),
            retry_after_secs: secs,
        };

        let backoff = Duration::from_millis(200);
        assert_eq!(policy.wait_before_retry(backoff, &hinted(None)), backoff);
        assert_eq!(
            policy.wait_before_retry(backoff, &hinted(Some(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.wait_before_retry(backoff, &hinted(Some(600))),
            policy.max_delay
        );
    }

    #[test]
    fn test_configured_backoff_is_capped() {
        let mut config = ShopifySyncConfig::new(
            "shop.myshopify.com",
            secrecy::SecretString::from("shpat_0a1b2c3d4e5f60718293"),
        )
        .unwrap();
        config.initial_backoff = Duration::from_secs(3600);

        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.initial_delay, policy.max_delay);

        let unhinted = SyncFailure::transport("timed out");
        assert_eq!(
            policy.wait_before_retry(Duration::from_secs(3600), &unhinted),
            policy.max_delay
        );
    }

    #[test]
    fn test_backoff_grows_to_cap() {
        let policy = RetryPolicy::standard();
        let mut backoff = policy.initial_delay;
        for _ in 0..10 {
            backoff = policy.next_backoff(backoff);
        }
        assert_eq!(backoff, policy.max_delay);
    }

    #[tokio::test]
    async fn test_synced_on_first_attempt() {
        let (store, ids) = store_with(&["Sale"]).await;
        let sink = ScriptedSink::new([]);
        let orchestrator = SyncOrchestrator::new(store, sink.clone(), RetryPolicy::immediate(3));

        let report = orchestrator
            .apply_labels(&shop(), &product(), &desired(&ids))
            .await
            .unwrap();

        assert!(matches!(report, OutcomeReport::Synced { attempts: 1, .. }));
        let pushed = sink.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].entries()[0].name, "Sale");
    }

    #[tokio::test]
    async fn test_transient_every_time_is_bounded_partial_success() {
        let (store, ids) = store_with(&["Sale"]).await;
        let sink = ScriptedSink::new((0..10).map(|_| transient("bad gateway")));
        let orchestrator =
            SyncOrchestrator::new(store.clone(), sink.clone(), RetryPolicy::immediate(3));

        let report = orchestrator
            .apply_labels(&shop(), &product(), &desired(&ids))
            .await
            .unwrap();

        assert_eq!(sink.calls(), 3);
        match &report {
            OutcomeReport::PartialSuccess {
                attempts,
                last_error,
                reconciliation,
            } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last_error.reason, "bad gateway");
                assert_eq!(reconciliation.applied, desired(&ids));
            }
            other => panic!("expected partial success, got {other:?}"),
        }
        assert!(report.associations_committed());
        assert!(report.needs_resync());
        assert_eq!(store.association_count().await, 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let (store, ids) = store_with(&["Sale"]).await;
        let sink = ScriptedSink::new([transient("timeout")]);
        let orchestrator = SyncOrchestrator::new(store, sink.clone(), RetryPolicy::immediate(3));

        let report = orchestrator
            .apply_labels(&shop(), &product(), &desired(&ids))
            .await
            .unwrap();

        assert!(matches!(report, OutcomeReport::Synced { attempts: 2, .. }));
        assert_eq!(sink.calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_keeps_associations() {
        let (store, ids) = store_with(&["Sale"]).await;
        let sink = ScriptedSink::new([SyncResult::Rejected(SyncFailure {
            status: Some(404),
            reason: "Not Found".to_string(),
            retry_after_secs: None,
        })]);
        let orchestrator =
            SyncOrchestrator::new(store.clone(), sink.clone(), RetryPolicy::immediate(3));

        let report = orchestrator
            .apply_labels(&shop(), &product(), &desired(&ids))
            .await
            .unwrap();

        assert!(matches!(report, OutcomeReport::SyncFailed { attempts: 1, .. }));
        assert_eq!(sink.calls(), 1);
        assert!(!report.needs_resync());
        assert_eq!(store.association_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_label_never_syncs() {
        let (store, ids) = store_with(&["Sale", "New"]).await;
        let sink = ScriptedSink::new([]);
        let orchestrator =
            SyncOrchestrator::new(store.clone(), sink.clone(), RetryPolicy::immediate(3));

        orchestrator
            .apply_labels(&shop(), &product(), &desired(&ids[..1]))
            .await
            .unwrap();
        let calls_before = sink.calls();

        let mut wanted = desired(&ids[1..]);
        wanted.insert(LabelId::new("L-missing"));
        let report = orchestrator
            .apply_labels(&shop(), &product(), &wanted)
            .await
            .unwrap();

        assert_eq!(
            report,
            OutcomeReport::ReconcileFailed {
                unknown_label_ids: [LabelId::new("L-missing")].into_iter().collect(),
            }
        );
        assert_eq!(sink.calls(), calls_before);
        let stored: BTreeSet<LabelId> = store
            .labels_for_product(&shop(), &product())
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(stored, desired(&ids[..1]));
    }

    #[tokio::test]
    async fn test_resync_pushes_current_snapshot() {
        let (store, ids) = store_with(&["Sale", "New"]).await;
        let sink = ScriptedSink::new([]);
        let orchestrator =
            SyncOrchestrator::new(store.clone(), sink.clone(), RetryPolicy::immediate(1));
        orchestrator
            .apply_labels(&shop(), &product(), &desired(&ids))
            .await
            .unwrap();

        let outcome = orchestrator.sync_product(&shop(), &product()).await;

        assert_eq!(outcome, SyncOutcome::Synced { attempts: 1 });
        let pushed = sink.pushed.lock().unwrap();
        let names: Vec<&str> = pushed[1].entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Sale", "New"]);
    }

    #[test]
    fn test_report_serializes_status_tag() {
        let report = OutcomeReport::ReconcileFailed {
            unknown_label_ids: [LabelId::new("x")].into_iter().collect(),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"status": "reconcile_failed", "unknown_label_ids": ["x"]})
        );
    }

    /// Sink that blocks until released, to observe pushes outliving the caller.
    struct GatedSink {
        started: Notify,
        release: Notify,
        finished: Notify,
    }

    #[async_trait]
    impl MetafieldSink for GatedSink {
        async fn push(
            &self,
            _shop: &ShopDomain,
            _product: &ProductId,
            _snapshot: &LabelSnapshot,
        ) -> SyncResult {
            self.started.notify_one();
            self.release.notified().await;
            self.finished.notify_one();
            SyncResult::Success
        }
    }

    #[tokio::test]
    async fn test_push_survives_caller_cancellation() {
        let (store, ids) = store_with(&["Sale"]).await;
        let sink = Arc::new(GatedSink {
            started: Notify::new(),
            release: Notify::new(),
            finished: Notify::new(),
        });
        let orchestrator =
            SyncOrchestrator::new(store.clone(), sink.clone(), RetryPolicy::immediate(1));

        let caller = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let wanted = desired(&ids);
            async move { orchestrator.apply_labels(&shop(), &product(), &wanted).await }
        });

        sink.started.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        sink.release.notify_one();
        sink.finished.notified().await;

        assert_eq!(store.association_count().await, 1);
    }
}
