//! REST client writing the label metafield on a Shopify product.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use product_labels_core::{
    LabelSnapshot, METAFIELD_NAMESPACE, METAFIELD_TYPE, MetafieldKey, ProductId, ShopDomain,
};

use super::{MetafieldError, MetafieldSink, SyncFailure, SyncResult};
use crate::config::ShopifySyncConfig;

/// Header Shopify reads the Admin API access token from.
const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Longest response body excerpt kept in a failure reason.
const MAX_REASON_LEN: usize = 512;

/// Body of a metafield create/upsert request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldRequest {
    pub metafield: MetafieldPayload,
}

/// The metafield itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldPayload {
    pub namespace: String,
    pub key: String,
    /// JSON-encoded array of `{id, name, color}`.
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub owner_id: String,
    pub owner_resource: String,
}

impl MetafieldRequest {
    /// Build the request writing `snapshot` under `key` on `product`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded as JSON.
    pub fn for_snapshot(
        product: &ProductId,
        snapshot: &LabelSnapshot,
        key: MetafieldKey,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            metafield: MetafieldPayload {
                namespace: METAFIELD_NAMESPACE.to_string(),
                key: key.as_str().to_string(),
                value: snapshot.to_metafield_value()?,
                value_type: METAFIELD_TYPE.to_string(),
                owner_id: product.legacy_id().to_string(),
                owner_resource: "product".to_string(),
            },
        })
    }
}

/// Shopify metafield REST client.
///
/// Bound to the single store its access token belongs to. Issues exactly one
/// `POST` per [`push`](MetafieldSink::push) for that store, bounded by the
/// configured request timeout. Cheap to clone.
#[derive(Clone)]
pub struct MetafieldClient {
    inner: Arc<MetafieldClientInner>,
}

struct MetafieldClientInner {
    client: reqwest::Client,
    shop: ShopDomain,
    base_url: Url,
    api_version: String,
    key: MetafieldKey,
    timeout: Duration,
}

impl std::fmt::Debug for MetafieldClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetafieldClient")
            .field("shop", &self.inner.shop.as_str())
            .field("base_url", &self.inner.base_url.as_str())
            .field("api_version", &self.inner.api_version)
            .field("key", &self.inner.key)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl MetafieldClient {
    /// Create a new metafield client.
    ///
    /// # Errors
    ///
    /// Returns error if the store or token is unusable, the base URL cannot
    /// carry a path, or the HTTP client fails to build.
    pub fn new(config: &ShopifySyncConfig) -> Result<Self, MetafieldError> {
        let shop = ShopDomain::parse(&config.store)?;
        if config.base_url.cannot_be_a_base() {
            return Err(MetafieldError::InvalidBaseUrl(config.base_url.to_string()));
        }

        let mut token = HeaderValue::from_str(config.access_token.expose_secret())
            .map_err(|_| MetafieldError::InvalidToken)?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, token);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(MetafieldClientInner {
                client,
                shop,
                base_url: config.base_url.clone(),
                api_version: config.api_version.clone(),
                key: config.metafield_key,
                timeout: config.request_timeout,
            }),
        })
    }

    /// Store this client writes to.
    #[must_use]
    pub fn shop(&self) -> &ShopDomain {
        &self.inner.shop
    }

    /// Metafield key snapshots are written under.
    #[must_use]
    pub fn key(&self) -> MetafieldKey {
        self.inner.key
    }

    /// `{base}/admin/api/{version}/products/{legacy_id}/metafields.json`
    ///
    /// # Errors
    ///
    /// Returns `MetafieldError::InvalidBaseUrl` if the base URL cannot carry a path.
    pub fn endpoint(&self, product: &ProductId) -> Result<Url, MetafieldError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| MetafieldError::InvalidBaseUrl(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .extend([
                "admin",
                "api",
                self.inner.api_version.as_str(),
                "products",
                product.legacy_id(),
                "metafields.json",
            ]);
        Ok(url)
    }

    async fn send(
        &self,
        product: &ProductId,
        snapshot: &LabelSnapshot,
    ) -> Result<SyncResult, MetafieldError> {
        let url = self.endpoint(product)?;
        let body = MetafieldRequest::for_snapshot(product, snapshot, self.inner.key)?;

        let response = self.inner.client.post(url).json(&body).send().await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        // A body that fails to arrive does not change the classification.
        let text = response.text().await.unwrap_or_default();

        Ok(classify(status, retry_after, &text))
    }
}

#[async_trait]
impl MetafieldSink for MetafieldClient {
    #[instrument(
        skip(self, snapshot),
        fields(shop = %shop, product = %product, entries = snapshot.len())
    )]
    async fn push(
        &self,
        shop: &ShopDomain,
        product: &ProductId,
        snapshot: &LabelSnapshot,
    ) -> SyncResult {
        if shop != &self.inner.shop {
            tracing::warn!(
                configured = %self.inner.shop,
                "Refusing metafield write for a shop without credentials"
            );
            return SyncResult::Rejected(SyncFailure::transport(format!(
                "no Shopify credentials for shop {shop}"
            )));
        }

        let result = match self.send(product, snapshot).await {
            Ok(result) => result,
            Err(MetafieldError::Http(e)) if e.is_timeout() => SyncResult::Transient(
                SyncFailure::transport(format!("timed out after {:?}", self.inner.timeout)),
            ),
            Err(MetafieldError::Http(e)) => {
                SyncResult::Transient(SyncFailure::transport(e.to_string()))
            }
            Err(e) => SyncResult::Rejected(SyncFailure::transport(e.to_string())),
        };

        match &result {
            SyncResult::Success => tracing::debug!("Metafield written"),
            SyncResult::Rejected(failure) => {
                tracing::warn!(failure = %failure, "Shopify rejected metafield write");
            }
            SyncResult::Transient(failure) => {
                tracing::info!(failure = %failure, "Metafield write failed transiently");
            }
        }

        result
    }
}

// =============================================================================
// Response classification
// =============================================================================

/// Map an HTTP response to a [`SyncResult`].
///
/// 2xx succeeds. 429 and 5xx are transient. Every other status is a
/// permanent rejection.
#[must_use]
pub(crate) fn classify(status: StatusCode, retry_after: Option<u64>, body: &str) -> SyncResult {
    if status.is_success() {
        return SyncResult::Success;
    }

    let failure = SyncFailure {
        status: Some(status.as_u16()),
        reason: excerpt(body, status),
        retry_after_secs: retry_after,
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SyncResult::Transient(failure)
    } else {
        SyncResult::Rejected(failure)
    }
}

/// `Retry-After` in whole seconds. Shopify sends values like `2.0`.
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let secs = value.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // finite, non-negative
    Some(secs.ceil() as u64)
}

fn excerpt(body: &str, status: StatusCode) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string();
    }
    match body.char_indices().nth(MAX_REASON_LEN) {
        Some((cut, _)) => format!("{}...", body.get(..cut).unwrap_or(body)),
        None => body.to_string(),
    }
}
