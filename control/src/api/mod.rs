pub mod error;
pub mod nodepools;
pub mod nodes;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::types::HealthResponse;
use nodes::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Node pools
        .route("/api/nodepools", post(nodepools::allocate_nodepool))
        .route("/api/nodepools/:cloud_id", get(nodepools::get_nodepool))
        .route("/api/nodepools/:cloud_id", delete(nodepools::release_nodepool))
        .route(
            "/api/nodepools/:cloud_id/groups/:group/nodes/:node",
            delete(nodepools::release_node),
        )
        // Node records and inventory
        .route("/api/nodes", get(nodes::list_nodes))
        .route("/api/nodes/:name", get(nodes::get_node))
        .route("/api/inventory", get(nodes::inventory))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
