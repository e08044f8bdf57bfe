//! Business logic services for product labels.
//!
//! # Services
//!
//! - `reconciler` - Makes a product's stored label set match a desired set
//! - `snapshot` - Builds the label snapshot published for a product
//! - `label_sync` - Reconcile-then-push orchestration with bounded retry
//! - `labels` - Caller-facing label operations and edit propagation

pub mod label_sync;
pub mod labels;
pub mod reconciler;
pub mod snapshot;

pub use label_sync::{OutcomeReport, RetryPolicy, SyncOrchestrator, SyncOutcome};
pub use labels::{
    CreateLabelRequest, LabelChange, LabelDeletion, LabelError, LabelService, ProductSync,
    UpdateLabelRequest,
};
pub use reconciler::{AssociationDiff, ReconcileError, Reconciler, Reconciliation};
pub use snapshot::SnapshotBuilder;
