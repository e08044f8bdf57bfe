//! Label definition handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use product_labels_core::LabelId;

use crate::error::AppError;
use crate::middleware::ShopContext;
use crate::models::{Label, LabelWithCount, ShopStats};
use crate::services::{CreateLabelRequest, LabelChange, LabelDeletion, UpdateLabelRequest};
use crate::state::AppState;

/// Build the labels router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/labels", get(list_labels).post(create_label))
        .route(
            "/api/labels/{id}",
            get(get_label).patch(update_label).delete(delete_label),
        )
        .route("/api/stats", get(shop_stats))
}

/// List the shop's labels with product counts, newest first.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub async fn list_labels(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
) -> Result<Json<Vec<LabelWithCount>>, AppError> {
    Ok(Json(state.labels().list_labels(&shop).await?))
}

/// Create a label.
///
/// # Errors
///
/// Returns 400 for a blank name or color.
pub async fn create_label(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Json(body): Json<CreateLabelRequest>,
) -> Result<(StatusCode, Json<Label>), AppError> {
    let label = state.labels().create_label(&shop, body).await?;
    Ok((StatusCode::CREATED, Json(label)))
}

/// Fetch one label with its product count.
///
/// # Errors
///
/// Returns 404 if the label is not in the shop.
pub async fn get_label(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Path(id): Path<String>,
) -> Result<Json<LabelWithCount>, AppError> {
    let id = LabelId::new(id);
    let label = state.labels().get_label(&shop, &id).await?;
    let product_count = state.labels().count_associations(&shop, &id).await?;
    Ok(Json(LabelWithCount {
        label,
        product_count,
    }))
}

/// Update a label; products carrying it are resynced when name or color change.
///
/// # Errors
///
/// Returns 400 for blank fields, 404 if the label is not in the shop.
pub async fn update_label(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Path(id): Path<String>,
    Json(body): Json<UpdateLabelRequest>,
) -> Result<Json<LabelChange>, AppError> {
    let change = state
        .labels()
        .update_label(&shop, &LabelId::new(id), body)
        .await?;
    Ok(Json(change))
}

/// Delete a label and resync the products that carried it.
///
/// # Errors
///
/// Returns 404 if the label is not in the shop.
pub async fn delete_label(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
    Path(id): Path<String>,
) -> Result<Json<LabelDeletion>, AppError> {
    let deletion = state.labels().delete_label(&shop, &LabelId::new(id)).await?;
    Ok(Json(deletion))
}

/// Dashboard counts for the shop.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub async fn shop_stats(
    State(state): State<AppState>,
    ShopContext(shop): ShopContext,
) -> Result<Json<ShopStats>, AppError> {
    Ok(Json(state.labels().shop_stats(&shop).await?))
}
