//! Product labels admin library.
//!
//! Label definitions, product/label reconciliation, and the Shopify
//! metafield sync that publishes each product's labels to the storefront.
//! Exposed as a library so the binary, the CLI, and integration tests share
//! one implementation.
//!
//! # Layers
//!
//! - [`db`] - Storage trait with `PostgreSQL` and in-memory backends
//! - [`services`] - Reconciler, snapshot builder, sync orchestrator, label service
//! - [`shopify`] - Metafield REST client and outcome classification
//! - [`routes`] - JSON HTTP surface
//!
//! # Security
//!
//! The binary holds a Shopify Admin API token with metafield write access.
//! Deploy behind the front layer that authenticates the shop.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;
