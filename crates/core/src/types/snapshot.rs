//! Denormalized label view published to the storefront.

use serde::{Deserialize, Serialize};

use super::id::LabelId;

/// Metafield namespace the storefront theme reads labels from.
pub const METAFIELD_NAMESPACE: &str = "custom";

/// Metafield type for the snapshot payload.
pub const METAFIELD_TYPE: &str = "json";

/// One label as rendered on the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: LabelId,
    pub name: String,
    pub color: String,
}

/// The labels currently attached to one product, in label creation order.
///
/// Built on demand from committed associations, pushed once, and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSnapshot(Vec<SnapshotEntry>);

impl LabelSnapshot {
    /// Wrap an already ordered list of entries.
    #[must_use]
    pub const fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self(entries)
    }

    #[must_use]
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Label IDs in snapshot order.
    pub fn label_ids(&self) -> impl Iterator<Item = &LabelId> {
        self.0.iter().map(|entry| &entry.id)
    }

    /// Encode the snapshot as the JSON string stored in the metafield `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_metafield_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

impl IntoIterator for LabelSnapshot {
    type Item = SnapshotEntry;
    type IntoIter = std::vec::IntoIter<SnapshotEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Which metafield key the snapshot is written under.
///
/// Older themes read `custom.labels`; the product page editor wrote
/// `custom.product_labels`. Both carry the same payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetafieldKey {
    #[default]
    Labels,
    ProductLabels,
}

impl MetafieldKey {
    /// Returns the key as sent to Shopify.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Labels => "labels",
            Self::ProductLabels => "product_labels",
        }
    }
}

impl std::fmt::Display for MetafieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetafieldKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "labels" => Ok(Self::Labels),
            "product_labels" => Ok(Self::ProductLabels),
            _ => Err(format!("unknown metafield key: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str, color: &str) -> SnapshotEntry {
        SnapshotEntry {
            id: LabelId::new(id),
            name: name.to_string(),
            color: color.to_string(),
        }
    }

    #[test]
    fn test_metafield_value_is_json_array() {
        let snapshot = LabelSnapshot::new(vec![
            entry("L1", "Sale", "#FF0000"),
            entry("L2", "New", "#00FF00"),
        ]);
        assert_eq!(
            snapshot.to_metafield_value().unwrap(),
            r##"[{"id":"L1","name":"Sale","color":"#FF0000"},{"id":"L2","name":"New","color":"#00FF00"}]"##
        );
    }

    #[test]
    fn test_empty_snapshot_encodes_empty_array() {
        let snapshot = LabelSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.to_metafield_value().unwrap(), "[]");
    }

    #[test]
    fn test_metafield_key_parse() {
        assert_eq!("labels".parse::<MetafieldKey>().unwrap(), MetafieldKey::Labels);
        assert_eq!(
            "product_labels".parse::<MetafieldKey>().unwrap(),
            MetafieldKey::ProductLabels
        );
        assert!("tags".parse::<MetafieldKey>().is_err());
        assert_eq!(MetafieldKey::default().as_str(), "labels");
    }
}
