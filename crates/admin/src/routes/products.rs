//! Product label assignment and sync handlers.
//!
//! Responses always say whether associations were saved. The status code
//! adds whether the storefront copy is current:
//!
//! | Outcome           | Status |
//! |-------------------|--------|
//! | `synced`          | 200    |
//! | `partial_success` | 202    |
//! | `sync_failed`     | 202    |
//! | `reconcile_failed`| 422    |

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use product_labels_core::{LabelId, LabelSnapshot, ProductId};

use crate::error::AppError;
use crate::middleware::ShopContext;
use crate::services::{OutcomeReport, SyncOutcome};
use crate::state::AppState;

/// Build the products router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/products/{product_id}/labels",
            get(get_product_labels).put(apply_labels),
        )
        .route("/api/products/{product_id}/labels/sync", post(sync_product))
}

/// Desired label set for a product.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyLabelsRequest {
    pub label_ids: Vec<LabelId>,
}

/// A product's current labels as published to the storefront.
#[derive(Debug, Serialize)]
pub struct ProductLabelsResponse {
    pub product_id: ProductId,
    pub labels: LabelSnapshot,
}

/// Sync outcome for a single product.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub product_id: ProductId,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

fn parse_product(raw: &str) -> Result<ProductId, AppError> {
    ProductId::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// The product's labels, in storefront order.
///
/// # Errors
///
/// Returns 400 for a malformed product ID.
pub async fn get_product_labels(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Path(product_id): Path<String>,
) -> Result<Json<ProductLabelsResponse>, AppError> {
    let product_id = parse_product(&product_id)?;
    let labels = state.labels().labels_for_product(&shop, &product_id).await?;
    Ok(Json(ProductLabelsResponse { product_id, labels }))
}

/// Replace the product's label set and push it to Shopify.
///
/// # Errors
///
/// Returns 400 for a malformed product ID, 500 if storage failed before
/// anything was committed.
pub async fn apply_labels(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Path(product_id): Path<String>,
    Json(body): Json<ApplyLabelsRequest>,
) -> Result<(StatusCode, Json<OutcomeReport>), AppError> {
    let product_id = parse_product(&product_id)?;
    let report = state
        .labels()
        .apply_labels(&shop, &product_id, body.label_ids)
        .await?;

    let status = match &report {
        OutcomeReport::Synced { .. } => StatusCode::OK,
        OutcomeReport::PartialSuccess { .. } | OutcomeReport::SyncFailed { .. } => {
            StatusCode::ACCEPTED
        }
        OutcomeReport::ReconcileFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };

    Ok((status, Json(report)))
}

/// Re-push the product's current labels without changing them.
///
/// # Errors
///
/// Returns 400 for a malformed product ID. A failed push is reported with
/// 502 and the outcome in the body.
pub async fn sync_product(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Path(product_id): Path<String>,
) -> Result<(StatusCode, Json<SyncResponse>), AppError> {
    let product_id = parse_product(&product_id)?;
    let outcome = state.labels().sync_product(&shop, &product_id).await;

    let status = if outcome.is_synced() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    Ok((
        status,
        Json(SyncResponse {
            product_id,
            outcome,
        }),
    ))
}
