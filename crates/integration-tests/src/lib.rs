//! Integration test support for product labels.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory store and fake Shopify only
//! cargo test -p product-labels-integration-tests
//!
//! # Include the Postgres store tests
//! LABELS_TEST_DATABASE_URL=postgres://localhost/labels_test \
//!     cargo test -p product-labels-integration-tests -- --include-ignored
//! ```
//!
//! # Test Categories
//!
//! - `metafield_client` - REST client against a local fake Shopify
//! - `label_sync` - Reconcile and sync flows through `LabelService`
//! - `labels_api` - HTTP surface through the axum router
//! - `postgres_store` - `PgLabelStore` against a live database (ignored)

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use product_labels_admin::config::ShopifySyncConfig;
use product_labels_admin::db::MemoryLabelStore;
use product_labels_admin::services::{LabelService, RetryPolicy};
use product_labels_admin::shopify::{MetafieldClient, MetafieldRequest};
use product_labels_core::{LabelSnapshot, ProductId, ShopDomain};

/// Token the fake Shopify expects in `X-Shopify-Access-Token`.
pub const TEST_ACCESS_TOKEN: &str = "shpat_4c1d8e2f7a9b3065e1d2";

/// Shop used by tests that only need one.
pub const TEST_SHOP: &str = "labels-test.myshopify.com";

#[must_use]
pub fn shop() -> ShopDomain {
    ShopDomain::new(TEST_SHOP)
}

/// Product ID from its legacy numeric form.
///
/// # Panics
///
/// Panics if `legacy` is not a valid product ID.
#[must_use]
pub fn product(legacy: &str) -> ProductId {
    ProductId::parse(legacy).expect("valid product id")
}

// =============================================================================
// Fake Shopify
// =============================================================================

/// Scripted reply for one metafield write.
#[derive(Debug, Clone)]
pub struct FakeReply {
    pub status: StatusCode,
    pub body: String,
    pub retry_after: Option<&'static str>,
    pub delay: Duration,
}

impl FakeReply {
    #[must_use]
    pub fn created() -> Self {
        Self::status(StatusCode::CREATED, r#"{"metafield":{"id":1}}"#)
    }

    #[must_use]
    pub fn status(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            retry_after: None,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn throttled(retry_after: &'static str) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::status(StatusCode::TOO_MANY_REQUESTS, "Exceeded 2 calls per second")
        }
    }

    #[must_use]
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::created()
        }
    }
}

/// One metafield write the fake received.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub api_version: String,
    pub legacy_product_id: String,
    pub access_token: Option<String>,
    pub body: MetafieldRequest,
}

impl RecordedWrite {
    /// The snapshot carried in the metafield `value`.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a JSON snapshot.
    #[must_use]
    pub fn snapshot(&self) -> LabelSnapshot {
        serde_json::from_str(&self.body.metafield.value).expect("metafield value is a snapshot")
    }

    /// Label names in snapshot order.
    #[must_use]
    pub fn label_names(&self) -> Vec<String> {
        self.snapshot()
            .entries()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    script: VecDeque<FakeReply>,
    writes: Vec<RecordedWrite>,
}

/// Local stand-in for the Shopify metafield REST endpoint.
///
/// Replies from a script, falling back to `201 Created` once the script is
/// empty. The server stops when the value is dropped.
pub struct FakeShopify {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    task: JoinHandle<()>,
}

impl FakeShopify {
    /// Bind an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot bind.
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new()
            .route(
                "/admin/api/{version}/products/{product_id}/metafields.json",
                post(write_metafield),
            )
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake shopify");
        let addr = listener.local_addr().expect("fake shopify address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    /// Queue replies for the next writes, in order.
    pub fn script(&self, replies: impl IntoIterator<Item = FakeReply>) {
        self.lock().script.extend(replies);
    }

    /// Every write received so far.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// The most recent write.
    ///
    /// # Panics
    ///
    /// Panics if nothing was written.
    #[must_use]
    pub fn last_write(&self) -> RecordedWrite {
        self.lock().writes.last().cloned().expect("at least one write")
    }

    /// Base URL to point a client at.
    ///
    /// # Panics
    ///
    /// Panics if the bound address does not form a URL.
    #[must_use]
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("fake shopify url")
    }

    /// Sync configuration for [`TEST_SHOP`] aimed at this fake, with a short
    /// request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the configuration cannot be built.
    #[must_use]
    pub fn config(&self) -> ShopifySyncConfig {
        self.config_for(&shop())
    }

    /// Sync configuration for `shop` aimed at this fake.
    ///
    /// # Panics
    ///
    /// Panics if the configuration cannot be built.
    #[must_use]
    pub fn config_for(&self, shop: &ShopDomain) -> ShopifySyncConfig {
        let mut config =
            ShopifySyncConfig::new(shop.as_str(), SecretString::from(TEST_ACCESS_TOKEN))
                .expect("sync config");
        config.base_url = self.base_url();
        config.request_timeout = Duration::from_millis(500);
        config
    }

    /// Metafield client for [`TEST_SHOP`] aimed at this fake.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn client(&self) -> MetafieldClient {
        self.client_for(&shop())
    }

    /// Metafield client for `shop` aimed at this fake.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn client_for(&self, shop: &ShopDomain) -> MetafieldClient {
        MetafieldClient::new(&self.config_for(shop)).expect("metafield client")
    }

    /// Label service over an in-memory store syncing to this fake.
    #[must_use]
    pub fn service(&self, store: &MemoryLabelStore, attempts: u32) -> LabelService {
        LabelService::new(
            Arc::new(store.clone()),
            Arc::new(self.client()),
            RetryPolicy::immediate(attempts),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FakeShopify {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_metafield(
    State(state): State<Arc<Mutex<FakeState>>>,
    Path((api_version, legacy_product_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<MetafieldRequest>,
) -> Response {
    let reply = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.writes.push(RecordedWrite {
            api_version,
            legacy_product_id,
            access_token: headers
                .get("x-shopify-access-token")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        state.script.pop_front().unwrap_or_else(FakeReply::created)
    };

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let mut response = (reply.status, reply.body).into_response();
    if let Some(retry_after) = reply.retry_after {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static(retry_after));
    }
    response
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode a JSON response body.
///
/// # Panics
///
/// Panics if the body cannot be read or is not valid JSON for `T`.
pub async fn json_body<T: DeserializeOwned>(response: Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("JSON response body")
}
