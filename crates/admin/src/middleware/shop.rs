//! Tenant extractor.
//!
//! The front layer that completes the Shopify session handshake forwards the
//! authenticated shop in `X-Shopify-Shop-Domain`. Every label route is scoped
//! by it.

use axum::{extract::FromRequestParts, http::request::Parts};

use product_labels_core::ShopDomain;

use crate::error::AppError;

/// Header carrying the authenticated shop domain.
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";

/// Extractor for the shop a request acts on.
///
/// Rejects with 401 when the header is missing, blank, or not valid UTF-8.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(ShopContext(shop): ShopContext) -> String {
///     format!("Labels for {shop}")
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShopContext(pub ShopDomain);

impl<S> FromRequestParts<S> for ShopContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let shop = parts
            .headers
            .get(SHOP_DOMAIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| ShopDomain::parse(v).ok())
            .ok_or_else(|| AppError::Unauthorized("missing shop domain".to_string()))?;

        tracing::Span::current().record("shop", shop.as_str());

        Ok(Self(shop))
    }
}
