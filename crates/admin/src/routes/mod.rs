//! HTTP route handlers for the labels API.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                              - Liveness
//! GET    /health/ready                        - Readiness (storage ping)
//!
//! # Labels (shop from X-Shopify-Shop-Domain)
//! GET    /api/labels                          - Labels with product counts
//! POST   /api/labels                          - Create label
//! GET    /api/labels/{id}                     - Label with product count
//! PATCH  /api/labels/{id}                     - Update label, resync its products
//! DELETE /api/labels/{id}                     - Delete label, resync its products
//! GET    /api/stats                           - Shop statistics
//!
//! # Products
//! GET    /api/products/{product_id}/labels    - Current snapshot
//! PUT    /api/products/{product_id}/labels    - Replace label set and sync
//! POST   /api/products/{product_id}/labels/sync - Resync without changes
//! ```

pub mod labels;
pub mod products;

use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::state::AppState;

/// All API routes, without state.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(labels::router())
        .merge(products::router())
}

/// Complete application router with health checks and request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        shop = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.labels().store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::db::MemoryLabelStore;
    use crate::services::{LabelService, RetryPolicy};
    use crate::shopify::{MetafieldSink, SyncResult};
    use product_labels_core::{LabelSnapshot, ProductId, ShopDomain};

    struct AcceptAll;

    #[async_trait::async_trait]
    impl MetafieldSink for AcceptAll {
        async fn push(
            &self,
            _shop: &ShopDomain,
            _product: &ProductId,
            _snapshot: &LabelSnapshot,
        ) -> SyncResult {
            SyncResult::Success
        }
    }

    fn test_app() -> Router {
        let labels = LabelService::new(
            Arc::new(MemoryLabelStore::new()),
            Arc::new(AcceptAll),
            RetryPolicy::immediate(1),
        );
        app(AppState::new(labels))
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        for uri in ["/health", "/health/ready"] {
            let response = test_app()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_api_requires_shop_header() {
        let response = test_app()
            .oneshot(Request::get("/api/labels").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
