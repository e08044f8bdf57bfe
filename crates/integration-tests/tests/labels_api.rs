//! HTTP surface of the labels API.
//!
//! Requests go through the full router (tracing layer, shop extractor,
//! handlers) over an in-memory store, with metafield writes landing on a
//! fake Shopify.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use product_labels_admin::db::MemoryLabelStore;
use product_labels_admin::middleware::SHOP_DOMAIN_HEADER;
use product_labels_admin::routes;
use product_labels_admin::state::AppState;
use product_labels_integration_tests::{FakeReply, FakeShopify, TEST_SHOP, json_body};

struct TestApp {
    router: Router,
    shopify: FakeShopify,
    store: MemoryLabelStore,
}

impl TestApp {
    async fn start(attempts: u32) -> Self {
        let shopify = FakeShopify::start().await;
        let store = MemoryLabelStore::new();
        let router = routes::app(AppState::new(shopify.service(&store, attempts)));
        Self {
            router,
            shopify,
            store,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(SHOP_DOMAIN_HEADER, TEST_SHOP);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, json_body(response).await)
    }

    async fn create_label(&self, name: &str, color: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/labels",
                Some(json!({ "name": name, "color": color })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}

// =============================================================================
// Labels
// =============================================================================

#[tokio::test]
async fn test_create_and_list_labels() {
    let app = TestApp::start(1).await;
    let first = app.create_label("New", "#00ff00").await;
    let second = app.create_label("  Sale  ", "red").await;

    let (status, body) = app.send(Method::GET, "/api/labels", None).await;

    assert_eq!(status, StatusCode::OK);
    let labels = body.as_array().unwrap();
    assert_eq!(labels.len(), 2);
    // Newest first, names trimmed.
    assert_eq!(labels[0]["id"], second.as_str());
    assert_eq!(labels[0]["name"], "Sale");
    assert_eq!(labels[0]["product_count"], 0);
    assert_eq!(labels[1]["id"], first.as_str());
}

#[tokio::test]
async fn test_create_label_validates_input() {
    let app = TestApp::start(1).await;

    for body in [
        json!({ "name": "   ", "color": "red" }),
        json!({ "name": "New", "color": "" }),
    ] {
        let (status, response) = app.send(Method::POST, "/api/labels", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].is_string());
    }

    let (_, body) = app.send(Method::GET, "/api/labels", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_unknown_label_is_not_found() {
    let app = TestApp::start(1).await;

    let (status, _) = app.send(Method::GET, "/api/labels/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(Method::DELETE, "/api/labels/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_patch_label_resyncs_products() {
    let app = TestApp::start(1).await;
    let id = app.create_label("New", "#00ff00").await;
    app.send(
        Method::PUT,
        "/api/products/100/labels",
        Some(json!({ "labelIds": [id] })),
    )
    .await;

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/api/labels/{id}"),
            Some(json!({ "color": "#FF0000" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["label"]["color"], "#FF0000");
    assert_eq!(body["resynced"][0]["product_id"], "gid://shopify/Product/100");
    assert_eq!(body["resynced"][0]["status"], "synced");
    assert_eq!(
        app.shopify.last_write().snapshot().entries()[0].color,
        "#FF0000"
    );
}

#[tokio::test]
async fn test_delete_label_reports_resynced_products() {
    let app = TestApp::start(1).await;
    let id = app.create_label("New", "#00ff00").await;
    app.send(
        Method::PUT,
        "/api/products/100/labels",
        Some(json!({ "labelIds": [id] })),
    )
    .await;

    let (status, body) = app
        .send(Method::DELETE, &format!("/api/labels/{id}"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["label_id"], id.as_str());
    assert_eq!(body["resynced"].as_array().unwrap().len(), 1);
    assert_eq!(app.shopify.last_write().body.metafield.value, "[]");
}

// =============================================================================
// Products
// =============================================================================

#[tokio::test]
async fn test_apply_labels_synced() {
    let app = TestApp::start(1).await;
    let id = app.create_label("New", "#00ff00").await;

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/products/gid:%2F%2Fshopify%2FProduct%2F100/labels",
            Some(json!({ "labelIds": [id] })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "synced");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["applied"], json!([id]));

    let (status, body) = app
        .send(Method::GET, "/api/products/100/labels", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product_id"], "gid://shopify/Product/100");
    assert_eq!(body["labels"][0]["name"], "New");
}

#[tokio::test]
async fn test_apply_unknown_labels_is_unprocessable() {
    let app = TestApp::start(1).await;

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/products/100/labels",
            Some(json!({ "labelIds": ["nope"] })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "reconcile_failed");
    assert_eq!(body["unknown_label_ids"], json!(["nope"]));
    assert_eq!(app.shopify.write_count(), 0);
    assert_eq!(app.store.association_count().await, 0);
}

#[tokio::test]
async fn test_apply_with_stale_storefront_is_accepted() {
    let app = TestApp::start(2).await;
    app.shopify.script([
        FakeReply::status(StatusCode::SERVICE_UNAVAILABLE, ""),
        FakeReply::status(StatusCode::SERVICE_UNAVAILABLE, ""),
    ]);
    let id = app.create_label("New", "#00ff00").await;

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/products/100/labels",
            Some(json!({ "labelIds": [id] })),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "partial_success");
    assert_eq!(body["attempts"], 2);
    assert_eq!(body["last_error"]["status"], 503);
    assert_eq!(app.store.association_count().await, 1);

    let (status, body) = app
        .send(Method::POST, "/api/products/100/labels/sync", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "synced");
}

#[tokio::test]
async fn test_manual_sync_failure_is_bad_gateway() {
    let app = TestApp::start(1).await;
    app.shopify
        .script([FakeReply::status(StatusCode::FORBIDDEN, "")]);

    let (status, body) = app
        .send(Method::POST, "/api/products/100/labels/sync", None)
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["failure"]["status"], 403);
}

#[tokio::test]
async fn test_malformed_product_id_is_bad_request() {
    let app = TestApp::start(1).await;

    let (status, _) = app
        .send(Method::GET, "/api/products/gid:%2F%2Fshopify%2FOrder%2F1/labels", None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dot_segment_product_id_never_reaches_shopify() {
    let app = TestApp::start(1).await;

    for uri in ["/api/products/%2E/labels/sync", "/api/products/%2E%2E/labels/sync"] {
        let (status, _) = app.send(Method::POST, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
    assert_eq!(app.shopify.write_count(), 0);
}

#[tokio::test]
async fn test_stats() {
    let app = TestApp::start(1).await;
    let new = app.create_label("New", "#00ff00").await;
    let sale = app.create_label("Sale", "red").await;
    for (product, ids) in [("100", json!([new, sale])), ("200", json!([new]))] {
        app.send(
            Method::PUT,
            &format!("/api/products/{product}/labels"),
            Some(json!({ "labelIds": ids })),
        )
        .await;
    }

    let (status, body) = app.send(Method::GET, "/api/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "total_labels": 2, "total_assignments": 3, "labelled_products": 2 })
    );
}

// =============================================================================
// Tenancy
// =============================================================================

#[tokio::test]
async fn test_requests_without_shop_are_unauthorized() {
    let app = TestApp::start(1).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/products/100/labels")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_shops_do_not_see_each_other() {
    let app = TestApp::start(1).await;
    let id = app.create_label("New", "#00ff00").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(format!("/api/labels/{id}"))
                .header(SHOP_DOMAIN_HEADER, "other-shop.myshopify.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Over the wire
// =============================================================================

#[tokio::test]
async fn test_served_app_round_trip() {
    let app = TestApp::start(1).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let created: Value = client
        .post(format!("{base}/api/labels"))
        .header(SHOP_DOMAIN_HEADER, TEST_SHOP)
        .json(&json!({ "name": "Limited", "color": "#123456" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let applied = client
        .put(format!("{base}/api/products/555/labels"))
        .header(SHOP_DOMAIN_HEADER, TEST_SHOP)
        .json(&json!({ "labelIds": [id] }))
        .send()
        .await
        .unwrap();
    assert_eq!(applied.status(), reqwest::StatusCode::OK);

    let write = app.shopify.last_write();
    assert_eq!(write.legacy_product_id, "555");
    assert_eq!(write.label_names(), ["Limited"]);

    server.abort();
}
