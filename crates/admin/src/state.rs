//! Application state shared across handlers.

use std::sync::Arc;

use crate::services::LabelService;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    labels: LabelService,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(labels: LabelService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { labels }),
        }
    }

    /// Get a reference to the label service.
    #[must_use]
    pub fn labels(&self) -> &LabelService {
        &self.inner.labels
    }
}
