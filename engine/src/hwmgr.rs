//! Hardware manager contract.
//!
//! A driver asks a hardware manager for node pools without knowing whether
//! the nodes come from the local catalog ([`Engine`]) or from a remote
//! service. Allocation may be asynchronous: the report says whether the pool
//! is ready, still being worked on, or has failed for good.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::Engine;
use crate::types::{GroupStatus, NodePoolRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AllocationState {
    Completed,
    InProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    /// Re-submitting the same request will not help.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub cloud_id: String,
    #[serde(flatten)]
    pub state: AllocationState,
    #[serde(default)]
    pub node_groups: Vec<GroupStatus>,
}

impl AllocationReport {
    pub fn is_completed(&self) -> bool {
        self.state == AllocationState::Completed
    }
}

/// Errors returned as `Err` are transient; callers retry later.
#[async_trait]
pub trait HardwareManager: Send + Sync {
    async fn allocate(&self, request: &NodePoolRequest) -> anyhow::Result<AllocationReport>;

    async fn query(&self, cloud_id: &str) -> anyhow::Result<AllocationReport>;

    async fn deallocate(&self, cloud_id: &str) -> anyhow::Result<AllocationReport>;
}

impl Engine {
    async fn report(&self, cloud_id: &str) -> anyhow::Result<AllocationReport> {
        let status = self.cloud_status(cloud_id).await?;
        let state = if status.is_provisioned() {
            AllocationState::Completed
        } else {
            AllocationState::InProgress { job_id: None }
        };
        Ok(AllocationReport {
            cloud_id: status.cloud_id,
            state,
            node_groups: status.node_groups,
        })
    }
}

#[async_trait]
impl HardwareManager for Engine {
    async fn allocate(&self, request: &NodePoolRequest) -> anyhow::Result<AllocationReport> {
        match self.reconcile(request).await {
            Ok(_) => self.report(&request.cloud_id).await,
            Err(e) if !e.is_retryable() => {
                warn!("Allocation for cloud {} failed: {}", request.cloud_id, e);
                Ok(AllocationReport {
                    cloud_id: request.cloud_id.clone(),
                    state: AllocationState::Failed {
                        reason: e.to_string(),
                    },
                    node_groups: Vec::new(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, cloud_id: &str) -> anyhow::Result<AllocationReport> {
        self.report(cloud_id).await
    }

    async fn deallocate(&self, cloud_id: &str) -> anyhow::Result<AllocationReport> {
        self.release_cloud(cloud_id).await?;
        self.report(cloud_id).await
    }
}
