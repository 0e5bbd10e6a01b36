//! Allocation ledger: which physical node belongs to which (cloud, group).
//!
//! The whole ledger is one document in the object store. Every mutation
//! writes the full document back, conditional on the revision that was read,
//! so two passes working from the same snapshot cannot both commit.
//!
//! # Invariants
//!
//! - A node name appears in at most one (cloud, group) list across all clouds.
//! - Group lists keep allocation order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::store::{Kind, ObjectStore, Revision, StoreError};

/// Object name of the ledger document.
pub const LEDGER_NAME: &str = "allocations";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ledger document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("node {node} is assigned twice ({first} and {second})")]
    DoubleAllocation {
        node: String,
        first: String,
        second: String,
    },
}

impl LedgerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_conflict())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudAllocation {
    #[serde(default)]
    pub node_groups: BTreeMap<String, Vec<String>>,
}

impl CloudAllocation {
    pub fn is_empty(&self) -> bool {
        self.node_groups.values().all(|nodes| nodes.is_empty())
    }

    pub fn node_count(&self) -> usize {
        self.node_groups.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub clouds: BTreeMap<String, CloudAllocation>,
}

impl Ledger {
    pub fn cloud(&self, cloud_id: &str) -> Option<&CloudAllocation> {
        self.clouds.get(cloud_id)
    }

    /// Nodes currently assigned to one group, in allocation order.
    pub fn assigned(&self, cloud_id: &str, group: &str) -> &[String] {
        self.clouds
            .get(cloud_id)
            .and_then(|c| c.node_groups.get(group))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every node name held by any cloud.
    pub fn allocated_nodes(&self) -> HashSet<&str> {
        self.clouds
            .values()
            .flat_map(|c| c.node_groups.values())
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// The (cloud, group) that holds a node, if any.
    pub fn owner_of(&self, node: &str) -> Option<(&str, &str)> {
        self.clouds.iter().find_map(|(cloud_id, cloud)| {
            cloud
                .node_groups
                .iter()
                .find(|(_, nodes)| nodes.iter().any(|n| n == node))
                .map(|(group, _)| (cloud_id.as_str(), group.as_str()))
        })
    }

    /// Returns a copy with `node` appended to the group list.
    pub fn with_assignment(&self, cloud_id: &str, group: &str, node: &str) -> Ledger {
        let mut cloud = self.clouds.get(cloud_id).cloned().unwrap_or_default();
        cloud
            .node_groups
            .entry(group.to_string())
            .or_default()
            .push(node.to_string());

        let mut next = self.clone();
        next.clouds.insert(cloud_id.to_string(), cloud);
        next
    }

    /// Returns a copy without `node` in the group list, dropping groups and
    /// clouds that become empty.
    pub fn without_assignment(&self, cloud_id: &str, group: &str, node: &str) -> Ledger {
        let mut next = self.clone();
        let Some(mut cloud) = next.clouds.remove(cloud_id) else {
            return next;
        };

        if let Some(nodes) = cloud.node_groups.get_mut(group) {
            nodes.retain(|n| n != node);
            if nodes.is_empty() {
                cloud.node_groups.remove(group);
            }
        }

        if !cloud.node_groups.is_empty() {
            next.clouds.insert(cloud_id.to_string(), cloud);
        }
        next
    }

    /// Checks the global exclusivity invariant.
    pub fn verify_exclusive(&self) -> Result<(), LedgerError> {
        let mut owners: HashMap<&str, String> = HashMap::new();
        for (cloud_id, cloud) in &self.clouds {
            for (group, nodes) in &cloud.node_groups {
                for node in nodes {
                    let here = format!("{}/{}", cloud_id, group);
                    if let Some(first) = owners.insert(node.as_str(), here.clone()) {
                        return Err(LedgerError::DoubleAllocation {
                            node: node.clone(),
                            first,
                            second: here,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A ledger as read from the store. `revision` is `None` when no ledger
/// document has been written yet.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub ledger: Ledger,
    pub revision: Option<Revision>,
}

pub async fn load(store: &dyn ObjectStore) -> Result<LedgerSnapshot, LedgerError> {
    match store.get(Kind::Ledger, LEDGER_NAME).await? {
        Some(doc) => {
            let ledger: Ledger = serde_json::from_str(&doc.data)?;
            debug!(
                "Loaded ledger revision {} ({} cloud(s))",
                doc.revision,
                ledger.clouds.len()
            );
            Ok(LedgerSnapshot {
                ledger,
                revision: Some(doc.revision),
            })
        }
        None => Ok(LedgerSnapshot::default()),
    }
}

/// Write the whole ledger, conditional on `revision` still being current.
pub async fn commit(
    store: &dyn ObjectStore,
    ledger: &Ledger,
    revision: Option<Revision>,
) -> Result<Revision, LedgerError> {
    ledger.verify_exclusive()?;
    let data = serde_json::to_string(ledger)?;

    let new_revision = match revision {
        Some(expected) => store.update(Kind::Ledger, LEDGER_NAME, data, expected).await?,
        None => match store.create(Kind::Ledger, LEDGER_NAME, data).await {
            Ok(rev) => rev,
            Err(StoreError::AlreadyExists { kind, name }) => {
                // Someone else wrote the first ledger since our read
                let actual = store
                    .get(kind, &name)
                    .await?
                    .map(|doc| doc.revision)
                    .unwrap_or_default();
                return Err(StoreError::Conflict {
                    kind,
                    name,
                    expected: 0,
                    actual,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        },
    };

    debug!("Committed ledger revision {}", new_revision);
    Ok(new_revision)
}
