//! `HardwareManager` over the remote REST API.
//!
//! The remote side works asynchronously: creating or deleting a resource
//! group starts a job. Job ids are kept per cloud so later calls can report
//! progress instead of submitting the request again.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use hwalloc_engine::{AllocationReport, AllocationState, GroupStatus, HardwareManager, NodePoolRequest};

use crate::client::{validate_resource_selectors, HardwareManagerClient};
use crate::error::ClientError;
use crate::types::{JobPhase, ResourceGroupResponse};

pub struct RemoteHardwareManager {
    client: HardwareManagerClient,
    jobs: Mutex<HashMap<String, String>>,
}

impl RemoteHardwareManager {
    pub fn new(client: HardwareManagerClient) -> Self {
        Self {
            client,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &HardwareManagerClient {
        &self.client
    }

    fn in_progress(cloud_id: &str, job_id: String) -> AllocationReport {
        AllocationReport {
            cloud_id: cloud_id.to_string(),
            state: AllocationState::InProgress {
                job_id: Some(job_id),
            },
            node_groups: Vec::new(),
        }
    }

    fn failed(cloud_id: &str, reason: String) -> AllocationReport {
        AllocationReport {
            cloud_id: cloud_id.to_string(),
            state: AllocationState::Failed { reason },
            node_groups: Vec::new(),
        }
    }

    fn completed(cloud_id: &str, group: ResourceGroupResponse) -> AllocationReport {
        AllocationReport {
            cloud_id: cloud_id.to_string(),
            state: AllocationState::Completed,
            node_groups: group
                .resource_group
                .resource_selectors
                .into_iter()
                .map(|(name, selector)| GroupStatus {
                    name,
                    nodes: selector.resources,
                })
                .collect(),
        }
    }

    /// Check a pending job. Returns `None` once it succeeded; the job is
    /// forgotten when it finishes either way.
    async fn poll_job(
        &self,
        cloud_id: &str,
        job_id: String,
    ) -> Result<Option<AllocationReport>, ClientError> {
        let job = self.client.job_status(&job_id).await?;
        match job.phase() {
            JobPhase::Running => Ok(Some(Self::in_progress(cloud_id, job_id))),
            JobPhase::Failed => {
                self.jobs.lock().await.remove(cloud_id);
                let reason = job
                    .message
                    .unwrap_or_else(|| format!("job {} failed", job_id));
                Ok(Some(Self::failed(cloud_id, reason)))
            }
            JobPhase::Succeeded => {
                self.jobs.lock().await.remove(cloud_id);
                info!("Resource group job {} for cloud {} completed", job_id, cloud_id);
                Ok(None)
            }
        }
    }

    /// Report on a resource group that exists on the remote side.
    async fn existing(&self, request: &NodePoolRequest) -> anyhow::Result<AllocationReport> {
        let group = self.client.get_resource_group(&request.cloud_id).await?;
        match validate_resource_selectors(request, &group.resource_group.resource_selectors) {
            Ok(()) => Ok(Self::completed(&request.cloud_id, group)),
            Err(e @ ClientError::Mismatch { .. }) => {
                warn!("Resource group for cloud {} is unusable: {}", request.cloud_id, e);
                Ok(Self::failed(&request.cloud_id, e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HardwareManager for RemoteHardwareManager {
    async fn allocate(&self, request: &NodePoolRequest) -> anyhow::Result<AllocationReport> {
        let pending = self.jobs.lock().await.get(&request.cloud_id).cloned();

        if let Some(job_id) = pending {
            return match self.poll_job(&request.cloud_id, job_id).await? {
                Some(report) => Ok(report),
                None => self.existing(request).await,
            };
        }

        match self.client.create_resource_group(request).await {
            Ok(job_id) => {
                info!("Resource group for cloud {} requested, job {}", request.cloud_id, job_id);
                self.jobs
                    .lock()
                    .await
                    .insert(request.cloud_id.clone(), job_id.clone());
                Ok(Self::in_progress(&request.cloud_id, job_id))
            }
            Err(ClientError::AlreadyExists(_)) => self.existing(request).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, cloud_id: &str) -> anyhow::Result<AllocationReport> {
        let pending = self.jobs.lock().await.get(cloud_id).cloned();
        if let Some(job_id) = pending {
            if let Some(report) = self.poll_job(cloud_id, job_id).await? {
                return Ok(report);
            }
        }
        let group = self.client.get_resource_group(cloud_id).await?;
        Ok(Self::completed(cloud_id, group))
    }

    async fn deallocate(&self, cloud_id: &str) -> anyhow::Result<AllocationReport> {
        self.jobs.lock().await.remove(cloud_id);
        match self.client.delete_resource_group(cloud_id).await {
            Ok(job_id) => Ok(Self::in_progress(cloud_id, job_id)),
            Err(e) if e.is_not_found() => Ok(AllocationReport {
                cloud_id: cloud_id.to_string(),
                state: AllocationState::Completed,
                node_groups: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
