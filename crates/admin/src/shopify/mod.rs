//! Shopify metafield sync.
//!
//! Projects a product's [`LabelSnapshot`] into a JSON metafield on the
//! Shopify product so storefront themes can render labels.
//!
//! # Architecture
//!
//! - [`MetafieldSink`] is the seam the orchestrator pushes through
//! - [`MetafieldClient`] is the REST implementation (one `POST` per push)
//! - Outcomes are classified into [`SyncResult`]; retries live in the caller
//!
//! # Example
//!
//! ```rust,ignore
//! use product_labels_admin::shopify::{MetafieldClient, MetafieldSink, SyncResult};
//!
//! let client = MetafieldClient::new(&config.shopify)?;
//! match client.push(&shop, &product_id, &snapshot).await {
//!     SyncResult::Success => {}
//!     SyncResult::Rejected(failure) => tracing::warn!(%failure, "Shopify refused metafield"),
//!     SyncResult::Transient(failure) => tracing::warn!(%failure, "Try again later"),
//! }
//! ```

mod metafields;

pub use metafields::{MetafieldClient, MetafieldPayload, MetafieldRequest};

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use product_labels_core::{LabelSnapshot, ProductId, ShopDomain, ShopDomainError};

/// Errors raised while preparing or sending a metafield request.
///
/// These never escape [`MetafieldSink::push`]; they are folded into a
/// [`SyncResult`] there.
#[derive(Debug, Error)]
pub enum MetafieldError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Snapshot could not be encoded.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Configured base URL cannot carry a path (e.g. `mailto:`).
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Access token is not a valid header value.
    #[error("invalid access token header")]
    InvalidToken,

    /// Configured store is not a usable shop domain.
    #[error("invalid shop domain: {0}")]
    InvalidShop(#[from] ShopDomainError),
}

/// Why a push did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// HTTP status, if Shopify answered at all.
    pub status: Option<u16>,
    /// Response body excerpt or transport error text.
    pub reason: String,
    /// Seconds Shopify asked us to wait (`Retry-After`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl SyncFailure {
    /// Failure without an HTTP response (timeout, connection refused, encoding).
    pub fn transport(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
            retry_after_secs: None,
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Classified outcome of a single metafield push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// 2xx.
    Success,
    /// Permanent refusal (4xx other than 429). Do not retry.
    Rejected(SyncFailure),
    /// 5xx, 429, timeout, or transport failure. Safe to retry.
    Transient(SyncFailure),
}

impl SyncResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Destination for product label snapshots.
///
/// Implementations issue at most one upsert per call and never retry. A
/// sink only writes to stores it holds credentials for; pushes for any
/// other shop are rejected without a request.
#[async_trait]
pub trait MetafieldSink: Send + Sync {
    /// Write `snapshot` as the label metafield of `shop`'s `product`.
    async fn push(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
        snapshot: &LabelSnapshot,
    ) -> SyncResult;
}
