//! Label domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use product_labels_core::{LabelColor, LabelId, ShopDomain, SnapshotEntry};

/// A named, colored tag defined by a shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Unique, immutable label ID.
    pub id: LabelId,
    /// Owning shop.
    pub shop: ShopDomain,
    /// Display name (never empty).
    pub name: String,
    /// Raw color string as entered.
    pub color: LabelColor,
    /// Optional free-text description.
    pub description: Option<String>,
    /// When the label was created.
    pub created_at: DateTime<Utc>,
}

impl Label {
    /// Project the label into its storefront snapshot entry.
    #[must_use]
    pub fn to_snapshot_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.as_str().to_string(),
        }
    }
}

/// A label together with the number of products it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelWithCount {
    /// The label itself.
    #[serde(flatten)]
    pub label: Label,
    /// Number of product assignments.
    pub product_count: i64,
}

/// Validated input for creating a label.
#[derive(Debug, Clone)]
pub struct NewLabel {
    pub name: String,
    pub color: LabelColor,
    pub description: Option<String>,
}

/// Validated partial update for a label.
///
/// All fields are optional - only provided fields will be updated.
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default)]
pub struct LabelUpdate {
    pub name: Option<String>,
    pub color: Option<LabelColor>,
    pub description: Option<Option<String>>,
}

impl LabelUpdate {
    /// Whether the update touches anything published in snapshots.
    #[must_use]
    pub const fn changes_snapshot(&self) -> bool {
        self.name.is_some() || self.color.is_some()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.description.is_none()
    }
}

/// Per-shop label statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopStats {
    /// Labels defined by the shop.
    pub total_labels: i64,
    /// Product/label assignments across all products.
    pub total_assignments: i64,
    /// Distinct products carrying at least one label.
    pub labelled_products: i64,
}
