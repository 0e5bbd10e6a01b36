use axum::{
    extract::{Path, State},
    Json,
};
use hwalloc_engine::{Engine, NodeRecord};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    api::error::ApiError,
    types::{InventoryResponse, ListNodesResponse},
};

pub struct AppState {
    pub engine: Arc<Engine>,
    pub pass_timeout: Duration,
}

/// GET /api/nodes - List all published node records
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListNodesResponse>, ApiError> {
    let nodes = state.engine.node_records().await?;
    Ok(Json(ListNodesResponse { nodes }))
}

/// GET /api/nodes/:name - Get one node record
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<NodeRecord>, ApiError> {
    state
        .engine
        .node_record(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("node {}", name)))
}

/// GET /api/inventory - Catalog nodes with their current owner
pub async fn inventory(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let nodes = state.engine.inventory().await?;
    Ok(Json(InventoryResponse { nodes }))
}
