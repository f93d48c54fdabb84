use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers::*;

pub fn create_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/queues/:name/next", get(next_job))
        .route("/queues/:name/ack/:tag", post(ack_job))
        .with_state(state)
}
