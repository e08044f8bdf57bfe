//! Metafield client against a local fake Shopify.
//!
//! Covers the request shape and how each kind of response is classified.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::StatusCode;

use product_labels_admin::shopify::{MetafieldClient, MetafieldSink, SyncResult};
use product_labels_core::{LabelId, LabelSnapshot, ShopDomain, SnapshotEntry};
use product_labels_integration_tests::{
    FakeReply, FakeShopify, TEST_ACCESS_TOKEN, product, shop,
};

fn snapshot() -> LabelSnapshot {
    LabelSnapshot::new(vec![
        SnapshotEntry {
            id: LabelId::new("a1"),
            name: "New".to_string(),
            color: "#00FF00".to_string(),
        },
        SnapshotEntry {
            id: LabelId::new("b2"),
            name: "Vegan".to_string(),
            color: "green".to_string(),
        },
    ])
}

// =============================================================================
// Request shape
// =============================================================================

#[tokio::test]
async fn test_push_writes_snapshot_metafield() {
    let shopify = FakeShopify::start().await;
    let client = shopify.client();

    let result = client.push(&shop(), &product("8123456789"), &snapshot()).await;
    assert_eq!(result, SyncResult::Success);

    let write = shopify.last_write();
    assert_eq!(write.legacy_product_id, "8123456789");
    assert_eq!(write.api_version, shopify.config().api_version);
    assert_eq!(write.access_token.as_deref(), Some(TEST_ACCESS_TOKEN));

    let metafield = &write.body.metafield;
    assert_eq!(metafield.namespace, "custom");
    assert_eq!(metafield.key, "labels");
    assert_eq!(metafield.value_type, "json");
    assert_eq!(metafield.owner_id, "8123456789");
    assert_eq!(metafield.owner_resource, "product");
    assert_eq!(write.snapshot(), snapshot());
}

#[tokio::test]
async fn test_push_accepts_gid_product_ids() {
    let shopify = FakeShopify::start().await;

    let result = shopify
        .client()
        .push(
            &shop(),
            &product("gid://shopify/Product/42"),
            &LabelSnapshot::default(),
        )
        .await;

    assert!(result.is_success());
    let write = shopify.last_write();
    assert_eq!(write.legacy_product_id, "42");
    assert_eq!(write.body.metafield.value, "[]");
}

#[tokio::test]
async fn test_each_push_is_a_single_request() {
    let shopify = FakeShopify::start().await;
    shopify.script([FakeReply::status(StatusCode::SERVICE_UNAVAILABLE, "")]);

    let result = shopify.client().push(&shop(), &product("1"), &snapshot()).await;

    assert!(matches!(result, SyncResult::Transient(_)));
    assert_eq!(shopify.write_count(), 1);
}

#[tokio::test]
async fn test_push_for_foreign_shop_sends_nothing() {
    let shopify = FakeShopify::start().await;

    let result = shopify
        .client()
        .push(
            &ShopDomain::new("intruder.example"),
            &product("8123456789"),
            &snapshot(),
        )
        .await;

    let SyncResult::Rejected(failure) = result else {
        panic!("expected rejection, got {result:?}");
    };
    assert!(failure.status.is_none());
    assert_eq!(shopify.write_count(), 0);
}

// =============================================================================
// Classification
// =============================================================================

#[tokio::test]
async fn test_client_errors_are_rejected() {
    let shopify = FakeShopify::start().await;
    shopify.script([
        FakeReply::status(StatusCode::UNPROCESSABLE_ENTITY, r#"{"errors":{"value":["is invalid"]}}"#),
        FakeReply::status(StatusCode::NOT_FOUND, ""),
        FakeReply::status(StatusCode::UNAUTHORIZED, "Invalid API key or access token"),
    ]);
    let client = shopify.client();

    for expected in [422, 404, 401] {
        match client.push(&shop(), &product("1"), &snapshot()).await {
            SyncResult::Rejected(failure) => assert_eq!(failure.status, Some(expected)),
            other => panic!("expected rejection for {expected}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_rejection_reason_carries_response_body() {
    let shopify = FakeShopify::start().await;
    shopify.script([FakeReply::status(
        StatusCode::UNPROCESSABLE_ENTITY,
        r#"{"errors":{"value":["is invalid"]}}"#,
    )]);

    let SyncResult::Rejected(failure) = shopify
        .client()
        .push(&shop(), &product("1"), &snapshot())
        .await
    else {
        panic!("expected rejection");
    };
    assert!(failure.reason.contains("is invalid"));
    assert!(failure.retry_after_secs.is_none());
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let shopify = FakeShopify::start().await;
    shopify.script([
        FakeReply::status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        FakeReply::status(StatusCode::BAD_GATEWAY, ""),
    ]);
    let client = shopify.client();

    for expected in [500, 502] {
        match client.push(&shop(), &product("1"), &snapshot()).await {
            SyncResult::Transient(failure) => assert_eq!(failure.status, Some(expected)),
            other => panic!("expected transient for {expected}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_throttling_is_transient_with_retry_after() {
    let shopify = FakeShopify::start().await;
    shopify.script([FakeReply::throttled("2.0"), FakeReply::throttled("7")]);
    let client = shopify.client();

    for expected in [2, 7] {
        let SyncResult::Transient(failure) =
            client.push(&shop(), &product("1"), &snapshot()).await
        else {
            panic!("expected transient");
        };
        assert_eq!(failure.status, Some(429));
        assert_eq!(failure.retry_after_secs, Some(expected));
    }
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let shopify = FakeShopify::start().await;
    shopify.script([FakeReply::slow(Duration::from_secs(3))]);

    let mut config = shopify.config();
    config.request_timeout = Duration::from_millis(100);
    let client = MetafieldClient::new(&config).unwrap();

    let SyncResult::Transient(failure) = client.push(&shop(), &product("1"), &snapshot()).await
    else {
        panic!("expected transient");
    };
    assert!(failure.status.is_none());
    assert!(failure.reason.contains("timed out"), "{}", failure.reason);
}

#[tokio::test]
async fn test_unreachable_host_is_transient() {
    let shopify = FakeShopify::start().await;
    let client = shopify.client();
    drop(shopify);
    // Give the aborted server task time to release the port.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let SyncResult::Transient(failure) = client.push(&shop(), &product("1"), &snapshot()).await
    else {
        panic!("expected transient");
    };
    assert!(failure.status.is_none());
}
