//! Returning a node to the free pool.
//!
//! Order is the reverse of provisioning: node record, then secret, then the
//! ledger entry. The ledger keeps the node out of the free pool until
//! nothing downstream refers to it any more.

use tracing::{debug, info};

use crate::error::EngineError;
use crate::ledger::{self, LedgerSnapshot};
use crate::provisioner::secret_name;
use crate::store::{Kind, ObjectStore, Revision, StoreError};
use crate::types::{Assignment, NodeRecord};

/// Delete the node record and credentials of an assignment. Absent objects
/// are fine. A node whose record names a different owner is left alone,
/// secret included.
pub async fn remove_artifacts(
    store: &dyn ObjectStore,
    assignment: &Assignment,
) -> Result<(), EngineError> {
    let cleanup_err = |what: &'static str, source: StoreError| EngineError::Cleanup {
        cloud_id: assignment.cloud_id.clone(),
        group: assignment.group.clone(),
        node: assignment.node.clone(),
        what,
        source,
    };

    let existing = store
        .get(Kind::NodeRecord, &assignment.node)
        .await
        .map_err(|e| cleanup_err("node record", e))?;

    if let Some(doc) = existing {
        let owned_here = serde_json::from_str::<NodeRecord>(&doc.data)
            .map(|r| r.cloud_id == assignment.cloud_id && r.group_name == assignment.group)
            // Unparseable records cannot be published consistently; drop them
            .unwrap_or(true);

        if owned_here {
            info!("Deleting node record: node={}", assignment.node);
            store
                .delete(Kind::NodeRecord, &assignment.node)
                .await
                .map_err(|e| cleanup_err("node record", e))?;
        } else {
            debug!(
                "Node record {} belongs to another owner, keeping it and its secret",
                assignment.node
            );
            return Ok(());
        }
    }

    let secret = secret_name(&assignment.node);
    info!("Deleting bmc-secret {}", secret);
    store
        .delete(Kind::Secret, &secret)
        .await
        .map_err(|e| cleanup_err("bmc-secret", e))?;

    Ok(())
}

/// Drop the assignment from the ledger in one revision-guarded write.
/// Returns `None` when the ledger did not hold the assignment.
pub async fn release_from_ledger(
    store: &dyn ObjectStore,
    snapshot: &LedgerSnapshot,
    assignment: &Assignment,
) -> Result<Option<Revision>, EngineError> {
    let owner = snapshot.ledger.owner_of(&assignment.node);
    if owner != Some((assignment.cloud_id.as_str(), assignment.group.as_str())) {
        return Ok(None);
    }

    let next = snapshot.ledger.without_assignment(
        &assignment.cloud_id,
        &assignment.group,
        &assignment.node,
    );
    let revision = ledger::commit(store, &next, snapshot.revision)
        .await
        .map_err(|source| EngineError::LedgerPersist {
            cloud_id: assignment.cloud_id.clone(),
            group: assignment.group.clone(),
            node: assignment.node.clone(),
            source,
        })?;

    info!(
        "Ledger revision {} releases node {} from cloud {} group {}",
        revision, assignment.node, assignment.cloud_id, assignment.group
    );
    Ok(Some(revision))
}
