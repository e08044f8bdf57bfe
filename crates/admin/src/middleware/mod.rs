//! Request extractors for the labels API.
//!
//! - `shop` - Resolves the tenant from the `X-Shopify-Shop-Domain` header

pub mod shop;

pub use shop::{SHOP_DOMAIN_HEADER, ShopContext};
