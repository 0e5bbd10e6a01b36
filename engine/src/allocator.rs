//! First-fit node selection.
//!
//! Pure function over a catalog and a ledger snapshot: no I/O, and the input
//! ledger is never touched. Either every group in the batch gets its full
//! complement or the caller gets an error and no new ledger.

use std::collections::HashSet;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::types::{Assignment, GroupRequest};

/// Outcome of a successful allocation: the ledger to commit and the nodes
/// that were added to it, in allocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub ledger: Ledger,
    pub assigned: Vec<Assignment>,
}

impl Allocation {
    pub fn is_noop(&self) -> bool {
        self.assigned.is_empty()
    }
}

fn validate(cloud_id: &str, requests: &[GroupRequest]) -> Result<(), EngineError> {
    let invalid = |reason: String| EngineError::InvalidRequest {
        cloud_id: cloud_id.to_string(),
        reason,
    };

    if cloud_id.is_empty() {
        return Err(invalid("empty cloud id".to_string()));
    }

    let mut names = HashSet::new();
    for req in requests {
        if req.name.is_empty() {
            return Err(invalid("node group with empty name".to_string()));
        }
        if !names.insert(req.name.as_str()) {
            return Err(invalid(format!("duplicate node group {}", req.name)));
        }
    }
    Ok(())
}

/// Select free nodes for every group request of one cloud.
pub fn allocate(
    catalog: &Catalog,
    ledger: &Ledger,
    cloud_id: &str,
    requests: &[GroupRequest],
) -> Result<Allocation, EngineError> {
    validate(cloud_id, requests)?;

    let mut working = ledger.clone();
    let mut taken: HashSet<String> = ledger
        .allocated_nodes()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut assigned = Vec::new();

    for req in requests {
        let existing = working.assigned(cloud_id, &req.name).len();
        let remaining = req.size.saturating_sub(existing);
        if remaining == 0 {
            debug!(
                "Node group {} of cloud {} is fully allocated ({}/{})",
                req.name, cloud_id, existing, req.size
            );
            continue;
        }

        let free: Vec<&str> = catalog
            .nodes_in_profile(&req.hw_profile)
            .map(|n| n.name.as_str())
            .filter(|name| !taken.contains(*name))
            .collect();

        if remaining > free.len() {
            return Err(EngineError::InsufficientCapacity {
                cloud_id: cloud_id.to_string(),
                group: req.name.clone(),
                profile: req.hw_profile.clone(),
                requested: remaining,
                available: free.len(),
            });
        }

        for node in free.into_iter().take(remaining) {
            debug!(
                "Selected node {} for cloud {} group {}",
                node, cloud_id, req.name
            );
            taken.insert(node.to_string());
            working = working.with_assignment(cloud_id, &req.name, node);
            assigned.push(Assignment::new(cloud_id, &req.name, node));
        }
    }

    Ok(Allocation {
        ledger: working,
        assigned,
    })
}
