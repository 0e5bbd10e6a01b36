//! Allocation passes.
//!
//! A pass reads the catalog and the ledger, runs the allocator for one
//! cloud, provisions the new nodes and finally repairs any node of that
//! cloud whose record is missing, incomplete or names another owner. When the ledger commit loses
//! a race against another pass, the whole pass is repeated from a fresh
//! read.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::allocator;
use crate::catalog::CatalogSource;
use crate::deallocation;
use crate::error::EngineError;
use crate::ledger::{self, LedgerSnapshot};
use crate::provisioner::{secret_name, Provisioner};
use crate::store::{Kind, ObjectStore, Revision, StoreError};
use crate::types::{
    Assignment, CloudStatus, GroupStatus, InventoryEntry, NodePoolRequest, NodeRecord,
};

/// Delay before retry `attempt` (1-based) after a lost ledger race.
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubles per attempt, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Clone)]
pub struct EngineOptions {
    /// Retries after the first attempt when the ledger was modified
    /// concurrently.
    pub max_conflict_retries: u32,
    /// Pause before every allocation pass.
    pub allocation_delay: Duration,
    pub backoff: Arc<dyn Backoff>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            allocation_delay: Duration::ZERO,
            backoff: Arc::new(ExponentialBackoff {
                base: Duration::from_millis(100),
                max: Duration::from_secs(2),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub cloud_id: String,
    /// Nodes added to the ledger by this pass, in allocation order.
    pub assigned: Vec<Assignment>,
    /// Previously committed nodes whose records had to be completed.
    pub repaired: Vec<Assignment>,
    pub ledger_revision: Option<Revision>,
    pub attempts: u32,
}

pub struct Engine {
    store: Arc<dyn ObjectStore>,
    catalog: Arc<dyn CatalogSource>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(store: Arc<dyn ObjectStore>, catalog: Arc<dyn CatalogSource>) -> Self {
        Self {
            store,
            catalog,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Converge one cloud's node groups to the requested sizes.
    pub async fn reconcile(&self, request: &NodePoolRequest) -> Result<PassOutcome, EngineError> {
        if !self.options.allocation_delay.is_zero() {
            debug!(
                "Delaying allocation for cloud {} by {:?}",
                request.cloud_id, self.options.allocation_delay
            );
            tokio::time::sleep(self.options.allocation_delay).await;
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.run_pass(request).await {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    return Ok(outcome);
                }
                Err(e) if e.is_conflict() => {
                    if attempt > self.options.max_conflict_retries {
                        warn!(
                            "Giving up on cloud {} after {} conflicting attempt(s)",
                            request.cloud_id, attempt
                        );
                        return Err(EngineError::ConcurrentModification {
                            cloud_id: request.cloud_id.clone(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.options.backoff.delay(attempt);
                    warn!(
                        "Ledger changed during pass for cloud {} (attempt {}), retrying in {:?}",
                        request.cloud_id, attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_pass(&self, request: &NodePoolRequest) -> Result<PassOutcome, EngineError> {
        let catalog = self.catalog.load().await?;
        let snapshot = self.load_ledger().await?;

        let allocation = allocator::allocate(
            &catalog,
            &snapshot.ledger,
            &request.cloud_id,
            &request.node_groups,
        )?;

        if allocation.is_noop() {
            debug!("Cloud {} needs no new nodes", request.cloud_id);
        } else {
            info!(
                "Allocating {} node(s) to cloud {}",
                allocation.assigned.len(),
                request.cloud_id
            );
        }

        let provisioner = Provisioner::new(self.store.as_ref(), &catalog);
        let revision = provisioner
            .provision(&snapshot.ledger, snapshot.revision, &allocation.assigned)
            .await?;

        let mut repaired = Vec::new();
        if let Some(cloud) = allocation.ledger.cloud(&request.cloud_id) {
            for (group, nodes) in &cloud.node_groups {
                for node in nodes {
                    let assignment = Assignment::new(&request.cloud_id, group, node);
                    if allocation.assigned.contains(&assignment) {
                        continue;
                    }
                    if !self.is_healthy(&assignment).await? {
                        info!("Repairing node {} of cloud {} group {}", node, request.cloud_id, group);
                        provisioner.ensure_provisioned(&assignment).await?;
                        repaired.push(assignment);
                    }
                }
            }
        }

        Ok(PassOutcome {
            cloud_id: request.cloud_id.clone(),
            assigned: allocation.assigned,
            repaired,
            ledger_revision: revision,
            attempts: 0,
        })
    }

    /// A node is healthy when its record names the ledger owner and is
    /// provisioned, and its secret exists.
    async fn is_healthy(&self, assignment: &Assignment) -> Result<bool, EngineError> {
        let owned = match self.node_record(&assignment.node).await? {
            Some(record) => {
                record.cloud_id == assignment.cloud_id
                    && record.group_name == assignment.group
                    && record.is_provisioned()
            }
            None => false,
        };
        if !owned {
            return Ok(false);
        }
        let secret = self
            .store
            .get(Kind::Secret, &secret_name(&assignment.node))
            .await?;
        Ok(secret.is_some())
    }

    async fn load_ledger(&self) -> Result<LedgerSnapshot, EngineError> {
        ledger::load(self.store.as_ref())
            .await
            .map_err(EngineError::LedgerLoad)
    }

    /// Return one node to the free pool.
    pub async fn deallocate_node(
        &self,
        cloud_id: &str,
        group: &str,
        node: &str,
    ) -> Result<(), EngineError> {
        let assignment = Assignment::new(cloud_id, group, node);

        let snapshot = self.load_ledger().await?;
        match snapshot.ledger.owner_of(node) {
            Some((c, g)) if c == cloud_id && g == group => {}
            Some(_) => {
                return Err(EngineError::NotAssigned {
                    cloud_id: cloud_id.to_string(),
                    group: group.to_string(),
                    node: node.to_string(),
                })
            }
            None => debug!("Node {} is not in the ledger, cleaning up leftovers", node),
        }

        deallocation::remove_artifacts(self.store.as_ref(), &assignment).await?;

        let mut snapshot = snapshot;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match deallocation::release_from_ledger(self.store.as_ref(), &snapshot, &assignment).await
            {
                Ok(_) => break,
                Err(e) if e.is_conflict() => {
                    if attempt > self.options.max_conflict_retries {
                        return Err(EngineError::ConcurrentModification {
                            cloud_id: cloud_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.options.backoff.delay(attempt);
                    warn!(
                        "Ledger changed while releasing node {} (attempt {}), retrying in {:?}",
                        node, attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    snapshot = self.load_ledger().await?;
                }
                Err(e) => return Err(e),
            }
        }

        // A pass of the same cloud may have republished the node before the
        // release landed. Leave it if the ledger hands the node back.
        let republished = self
            .node_record(node)
            .await?
            .map(|r| r.cloud_id == cloud_id && r.group_name == group)
            .unwrap_or(false);
        if republished && self.load_ledger().await?.ledger.owner_of(node) != Some((cloud_id, group)) {
            warn!("Node {} was republished during release, cleaning up again", node);
            deallocation::remove_artifacts(self.store.as_ref(), &assignment).await?;
        }
        Ok(())
    }

    /// Release every node held by a cloud. Returns what was released.
    pub async fn release_cloud(&self, cloud_id: &str) -> Result<Vec<Assignment>, EngineError> {
        let snapshot = self.load_ledger().await?;
        let assignments: Vec<Assignment> = snapshot
            .ledger
            .cloud(cloud_id)
            .map(|cloud| {
                cloud
                    .node_groups
                    .iter()
                    .flat_map(|(group, nodes)| {
                        nodes.iter().map(move |node| Assignment::new(cloud_id, group, node))
                    })
                    .collect()
            })
            .unwrap_or_default();

        info!("Releasing {} node(s) of cloud {}", assignments.len(), cloud_id);
        for assignment in &assignments {
            self.deallocate_node(&assignment.cloud_id, &assignment.group, &assignment.node)
                .await?;
        }
        Ok(assignments)
    }

    pub async fn node_record(&self, name: &str) -> Result<Option<NodeRecord>, EngineError> {
        match self.store.get(Kind::NodeRecord, name).await? {
            Some(doc) => decode_record(name, &doc.data).map(Some),
            None => Ok(None),
        }
    }

    pub async fn node_records(&self) -> Result<Vec<NodeRecord>, EngineError> {
        let docs = self.store.list(Kind::NodeRecord).await?;
        docs.into_iter()
            .map(|(name, doc)| decode_record(&name, &doc.data))
            .collect()
    }

    pub async fn cloud_status(&self, cloud_id: &str) -> Result<CloudStatus, EngineError> {
        let snapshot = self.load_ledger().await?;
        let mut status = CloudStatus {
            cloud_id: cloud_id.to_string(),
            node_groups: Vec::new(),
            nodes: Vec::new(),
        };

        if let Some(cloud) = snapshot.ledger.cloud(cloud_id) {
            for (group, nodes) in &cloud.node_groups {
                status.node_groups.push(GroupStatus {
                    name: group.clone(),
                    nodes: nodes.clone(),
                });
                for node in nodes {
                    if let Some(record) = self.node_record(node).await? {
                        status.nodes.push(record);
                    }
                }
            }
        }

        Ok(status)
    }

    /// Every catalog node with the group holding it, in catalog order.
    pub async fn inventory(&self) -> Result<Vec<InventoryEntry>, EngineError> {
        let catalog = self.catalog.load().await?;
        let snapshot = self.load_ledger().await?;

        Ok(catalog
            .nodes
            .iter()
            .map(|node| {
                let owner = snapshot.ledger.owner_of(&node.name);
                InventoryEntry {
                    name: node.name.clone(),
                    hw_profile: node.hwprofile.clone(),
                    cloud_id: owner.map(|(c, _)| c.to_string()),
                    group: owner.map(|(_, g)| g.to_string()),
                }
            })
            .collect())
    }
}

fn decode_record(name: &str, data: &str) -> Result<NodeRecord, EngineError> {
    serde_json::from_str(data).map_err(|e| {
        EngineError::Store(StoreError::Backend(
            anyhow::Error::new(e).context(format!("unreadable node record {}", name)),
        ))
    })
}
