use serde::{Deserialize, Serialize};

use crate::catalog::Interface;

// ============================================================================
// Requests
// ============================================================================

/// Demand for one logical node group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub name: String,
    pub hw_profile: String,
    pub size: usize,
    /// Resource pool on a remote hardware manager. Unused by the loopback
    /// engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,
}

impl GroupRequest {
    pub fn new(name: impl Into<String>, hw_profile: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            hw_profile: hw_profile.into(),
            size,
            resource_pool_id: None,
        }
    }
}

/// All group requests of one cloud, processed as one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolRequest {
    pub cloud_id: String,
    pub node_groups: Vec<GroupRequest>,
}

// ============================================================================
// Allocation results
// ============================================================================

/// A node newly placed into a group by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub cloud_id: String,
    pub group: String,
    pub node: String,
}

impl Assignment {
    pub fn new(cloud_id: &str, group: &str, node: &str) -> Self {
        Self {
            cloud_id: cloud_id.to_string(),
            group: group.to_string(),
            node: node.to_string(),
        }
    }
}

// ============================================================================
// Node records
// ============================================================================

pub const CONDITION_PROVISIONED: &str = "Provisioned";
pub const REASON_COMPLETED: &str = "Completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: bool,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcStatus {
    pub address: String,
    pub credentials_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<BmcStatus>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NodeStatus {
    pub fn condition(&self, kind: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Insert or replace a condition. The transition time only moves when
    /// the status value flips.
    pub fn set_condition(&mut self, kind: &str, status: bool, reason: &str, message: &str, now: i64) {
        match self.conditions.iter_mut().find(|c| c.kind == kind) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                kind: kind.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }
}

/// Externally visible record of one allocated node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub cloud_id: String,
    pub group_name: String,
    pub hw_profile: String,
    #[serde(default)]
    pub status: NodeStatus,
}

impl NodeRecord {
    pub fn is_provisioned(&self) -> bool {
        self.status
            .condition(CONDITION_PROVISIONED)
            .map(|c| c.status)
            .unwrap_or(false)
    }

    pub fn same_identity(&self, other: &NodeRecord) -> bool {
        self.name == other.name
            && self.cloud_id == other.cloud_id
            && self.group_name == other.group_name
            && self.hw_profile == other.hw_profile
    }
}

// ============================================================================
// Queries
// ============================================================================

/// One catalog node and the group currently holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub name: String,
    pub hw_profile: String,
    pub cloud_id: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub name: String,
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudStatus {
    pub cloud_id: String,
    pub node_groups: Vec<GroupStatus>,
    pub nodes: Vec<NodeRecord>,
}

impl CloudStatus {
    pub fn node_count(&self) -> usize {
        self.node_groups.iter().map(|g| g.nodes.len()).sum()
    }

    /// True when every ledger entry has a provisioned record.
    pub fn is_provisioned(&self) -> bool {
        self.nodes.len() == self.node_count() && self.nodes.iter().all(NodeRecord::is_provisioned)
    }
}
