//! Core types for Product Labels.
//!
//! This module provides type-safe wrappers for the label domain.

pub mod color;
pub mod id;
pub mod product;
pub mod snapshot;

pub use color::{ColorError, LabelColor};
pub use id::*;
pub use product::{ProductId, ProductIdError};
pub use snapshot::*;
