use hwalloc_engine::{Assignment, CloudStatus, InventoryEntry, NodeRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

// ============================================================================
// Node Pool Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePoolResponse {
    pub cloud_id: String,
    pub assigned: Vec<Assignment>,
    pub repaired: Vec<Assignment>,
    pub attempts: u32,
    pub status: CloudStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub cloud_id: String,
    pub released: Vec<Assignment>,
}

// ============================================================================
// Node Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub nodes: Vec<InventoryEntry>,
}
