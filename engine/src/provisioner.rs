//! Side effects of handing a node to a group.
//!
//! For each assignment, in order: decode the BMC credentials, store them as
//! a secret, commit the ledger containing the assignment, create the node
//! record, then stamp the record with the node's hardware facts. A node
//! record is never published before the ledger entry backing it is durable,
//! and the ledger never names a node whose secret has not been written.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{BmcInfo, Catalog, PhysicalNode};
use crate::error::EngineError;
use crate::ledger::{self, Ledger};
use crate::store::{Kind, ObjectStore, Revision, StoreError};
use crate::types::{Assignment, BmcStatus, NodeRecord, CONDITION_PROVISIONED, REASON_COMPLETED};

const STATUS_UPDATE_ATTEMPTS: u32 = 3;

pub fn secret_name(node: &str) -> String {
    format!("{}-bmc-secret", node)
}

/// Plaintext BMC credentials as stored in the node's secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcCredentials {
    pub username: String,
    pub password: String,
}

fn decode_field(field: &str, value: &str) -> Result<String, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| format!("invalid base64 in {}: {}", field, e))?;
    String::from_utf8(bytes).map_err(|_| format!("{} is not valid UTF-8", field))
}

pub fn decode_credentials(bmc: &BmcInfo) -> Result<BmcCredentials, String> {
    Ok(BmcCredentials {
        username: decode_field("username", &bmc.username_base64)?,
        password: decode_field("password", &bmc.password_base64)?,
    })
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub struct Provisioner<'a> {
    store: &'a dyn ObjectStore,
    catalog: &'a Catalog,
}

impl<'a> Provisioner<'a> {
    pub fn new(store: &'a dyn ObjectStore, catalog: &'a Catalog) -> Self {
        Self { store, catalog }
    }

    /// Provision every assignment on top of `base`, which must be the ledger
    /// the assignments were computed from. Returns the last committed ledger
    /// revision.
    ///
    /// Stops at the first failing node. Nodes before it are fully committed;
    /// the failing node and those after it are not in the stored ledger.
    pub async fn provision(
        &self,
        base: &Ledger,
        revision: Option<Revision>,
        assigned: &[Assignment],
    ) -> Result<Option<Revision>, EngineError> {
        let mut ledger = base.clone();
        let mut revision = revision;

        for assignment in assigned {
            let node = self.resolve(assignment)?;
            let credentials = self.decode(assignment, node)?;
            self.store_credentials(assignment, &credentials).await?;

            ledger = ledger.with_assignment(&assignment.cloud_id, &assignment.group, &assignment.node);
            let committed = ledger::commit(self.store, &ledger, revision)
                .await
                .map_err(|source| EngineError::LedgerPersist {
                    cloud_id: assignment.cloud_id.clone(),
                    group: assignment.group.clone(),
                    node: assignment.node.clone(),
                    source,
                })?;
            info!(
                "Ledger revision {} assigns node {} to cloud {} group {}",
                committed, assignment.node, assignment.cloud_id, assignment.group
            );
            revision = Some(committed);

            self.create_node_record(assignment, node).await?;
            self.update_node_status(assignment, node).await?;
        }

        Ok(revision)
    }

    /// Bring the artifacts of an already committed assignment up to date.
    /// Every step is idempotent, so this is safe to run on healthy nodes.
    pub async fn ensure_provisioned(&self, assignment: &Assignment) -> Result<(), EngineError> {
        let node = self.resolve(assignment)?;
        let credentials = self.decode(assignment, node)?;
        self.store_credentials(assignment, &credentials).await?;
        self.create_node_record(assignment, node).await?;
        self.update_node_status(assignment, node).await
    }

    fn resolve(&self, assignment: &Assignment) -> Result<&'a PhysicalNode, EngineError> {
        self.catalog
            .node(&assignment.node)
            .ok_or_else(|| EngineError::UnknownNode {
                cloud_id: assignment.cloud_id.clone(),
                group: assignment.group.clone(),
                node: assignment.node.clone(),
            })
    }

    fn decode(
        &self,
        assignment: &Assignment,
        node: &PhysicalNode,
    ) -> Result<BmcCredentials, EngineError> {
        decode_credentials(&node.bmc).map_err(|reason| EngineError::CredentialDecode {
            cloud_id: assignment.cloud_id.clone(),
            group: assignment.group.clone(),
            node: assignment.node.clone(),
            reason,
        })
    }

    async fn store_credentials(
        &self,
        assignment: &Assignment,
        credentials: &BmcCredentials,
    ) -> Result<(), EngineError> {
        let name = secret_name(&assignment.node);
        info!("Creating bmc-secret {} for node {}", name, assignment.node);

        let store_err = |source: StoreError| EngineError::CredentialStore {
            cloud_id: assignment.cloud_id.clone(),
            group: assignment.group.clone(),
            node: assignment.node.clone(),
            source,
        };

        let data = serde_json::to_string(credentials)
            .map_err(|e| store_err(StoreError::Backend(e.into())))?;
        self.store
            .create_or_update(Kind::Secret, &name, data)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn create_node_record(
        &self,
        assignment: &Assignment,
        node: &PhysicalNode,
    ) -> Result<(), EngineError> {
        info!(
            "Creating node record: cloud_id={}, group={}, node={}",
            assignment.cloud_id, assignment.group, assignment.node
        );

        let create_err = |reason: String| EngineError::NodeRecordCreate {
            cloud_id: assignment.cloud_id.clone(),
            group: assignment.group.clone(),
            node: assignment.node.clone(),
            reason,
        };

        let record = NodeRecord {
            name: node.name.clone(),
            cloud_id: assignment.cloud_id.clone(),
            group_name: assignment.group.clone(),
            hw_profile: node.hwprofile.clone(),
            status: Default::default(),
        };
        let data = serde_json::to_string(&record).map_err(|e| create_err(e.to_string()))?;

        match self.store.create(Kind::NodeRecord, &node.name, data.clone()).await {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists { .. }) => {
                let existing = self
                    .store
                    .get(Kind::NodeRecord, &node.name)
                    .await
                    .map_err(|e| create_err(e.to_string()))?
                    .ok_or_else(|| create_err("record vanished after create conflict".to_string()))?;
                let revision = existing.revision;
                let existing: NodeRecord =
                    serde_json::from_str(&existing.data).map_err(|e| create_err(e.to_string()))?;

                if existing.same_identity(&record) {
                    debug!("Node record {} already exists", node.name);
                    return Ok(());
                }

                // The stored ledger decides who owns the node
                let snapshot = ledger::load(self.store)
                    .await
                    .map_err(|e| create_err(e.to_string()))?;
                let owner = snapshot.ledger.owner_of(&node.name);
                if owner != Some((assignment.cloud_id.as_str(), assignment.group.as_str())) {
                    return Err(create_err(format!(
                        "record already exists for cloud {} group {}",
                        existing.cloud_id, existing.group_name
                    )));
                }

                warn!(
                    "Replacing stale node record {} of cloud {} group {}",
                    node.name, existing.cloud_id, existing.group_name
                );
                self.store
                    .update(Kind::NodeRecord, &node.name, data, revision)
                    .await
                    .map_err(|e| create_err(e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(create_err(e.to_string())),
        }
    }

    async fn update_node_status(
        &self,
        assignment: &Assignment,
        node: &PhysicalNode,
    ) -> Result<(), EngineError> {
        info!("Updating node status: node={}", assignment.node);

        let update_err = |reason: String| EngineError::NodeStatusUpdate {
            cloud_id: assignment.cloud_id.clone(),
            group: assignment.group.clone(),
            node: assignment.node.clone(),
            reason,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let current = self
                .store
                .get(Kind::NodeRecord, &node.name)
                .await
                .map_err(|e| update_err(e.to_string()))?
                .ok_or_else(|| update_err("node record not found".to_string()))?;
            let mut record: NodeRecord =
                serde_json::from_str(&current.data).map_err(|e| update_err(e.to_string()))?;

            record.status.bmc = Some(BmcStatus {
                address: node.bmc.address.clone(),
                credentials_name: secret_name(&node.name),
            });
            record.status.hostname = node.hostname.clone();
            record.status.interfaces = node.interfaces.clone();
            record.status.set_condition(
                CONDITION_PROVISIONED,
                true,
                REASON_COMPLETED,
                "Provisioned",
                now(),
            );

            let data = serde_json::to_string(&record).map_err(|e| update_err(e.to_string()))?;
            match self
                .store
                .update(Kind::NodeRecord, &node.name, data, current.revision)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < STATUS_UPDATE_ATTEMPTS => {
                    warn!(
                        "Node record {} changed during status update, retrying (attempt {})",
                        node.name, attempt
                    );
                }
                Err(e) => return Err(update_err(e.to_string())),
            }
        }
    }
}
