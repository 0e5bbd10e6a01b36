use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use hwalloc_engine::NodePoolRequest;
use std::sync::Arc;
use tracing::info;

use crate::{
    api::{error::ApiError, nodes::AppState},
    types::{NodePoolResponse, ReleaseResponse},
};

/// POST /api/nodepools - Allocate and provision the requested node groups
pub async fn allocate_nodepool(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodePoolRequest>,
) -> Result<Json<NodePoolResponse>, ApiError> {
    info!(
        "Allocating node pool: cloud_id={}, groups={}",
        req.cloud_id,
        req.node_groups.len()
    );

    let outcome = tokio::time::timeout(state.pass_timeout, state.engine.reconcile(&req))
        .await
        .map_err(|_| ApiError::Timeout(req.cloud_id.clone()))??;

    let status = state.engine.cloud_status(&req.cloud_id).await?;

    info!(
        "Node pool ready: cloud_id={}, assigned={}, repaired={}",
        outcome.cloud_id,
        outcome.assigned.len(),
        outcome.repaired.len()
    );

    Ok(Json(NodePoolResponse {
        cloud_id: outcome.cloud_id,
        assigned: outcome.assigned,
        repaired: outcome.repaired,
        attempts: outcome.attempts,
        status,
    }))
}

/// GET /api/nodepools/:cloud_id - Ledger entries and node records of a cloud
pub async fn get_nodepool(
    State(state): State<Arc<AppState>>,
    Path(cloud_id): Path<String>,
) -> Result<Json<hwalloc_engine::CloudStatus>, ApiError> {
    let status = state.engine.cloud_status(&cloud_id).await?;
    if status.node_groups.is_empty() {
        return Err(ApiError::NotFound(format!("cloud {}", cloud_id)));
    }
    Ok(Json(status))
}

/// DELETE /api/nodepools/:cloud_id - Release every node of a cloud
pub async fn release_nodepool(
    State(state): State<Arc<AppState>>,
    Path(cloud_id): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    info!("Releasing node pool: cloud_id={}", cloud_id);

    let released = state.engine.release_cloud(&cloud_id).await?;
    Ok(Json(ReleaseResponse { cloud_id, released }))
}

/// DELETE /api/nodepools/:cloud_id/groups/:group/nodes/:node - Release one node
pub async fn release_node(
    State(state): State<Arc<AppState>>,
    Path((cloud_id, group, node)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    info!(
        "Releasing node: cloud_id={}, group={}, node={}",
        cloud_id, group, node
    );

    state.engine.deallocate_node(&cloud_id, &group, &node).await?;
    Ok(StatusCode::NO_CONTENT)
}
