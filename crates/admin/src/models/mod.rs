//! Domain models for product labels.

pub mod label;

pub use label::{Label, LabelUpdate, LabelWithCount, NewLabel, ShopStats};
