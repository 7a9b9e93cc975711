//! Shared request state. A plain value type cloned into every handler via
//! axum's `State` extractor — no globals, matching the core's own
//! values-over-globals stance.

use std::sync::Arc;

use queue_core::{AdmissionController, QueueConfig, QueueManager};

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub queue: Arc<QueueManager>,
    pub config: QueueConfig,
}
