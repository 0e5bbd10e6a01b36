use thiserror::Error;

use crate::catalog::CatalogError;
use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Failures of one allocation or deallocation pass.
///
/// Every operational variant names the cloud, and the group and node when
/// the failure is scoped to one node, so a driver can report it upstream
/// without further lookups.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "insufficient capacity in cloud {cloud_id}: group {group} needs {requested} more node(s) \
         of profile {profile}, {available} free"
    )]
    InsufficientCapacity {
        cloud_id: String,
        group: String,
        profile: String,
        requested: usize,
        available: usize,
    },

    #[error("invalid request for cloud {cloud_id}: {reason}")]
    InvalidRequest { cloud_id: String, reason: String },

    #[error("ledger for cloud {cloud_id} modified concurrently, gave up after {attempts} attempt(s)")]
    ConcurrentModification { cloud_id: String, attempts: u32 },

    #[error("failed to load catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to load ledger: {0}")]
    LedgerLoad(#[source] LedgerError),

    #[error("node {node} (cloud {cloud_id}, group {group}) is not in the catalog")]
    UnknownNode {
        cloud_id: String,
        group: String,
        node: String,
    },

    #[error("failed to decode credentials for node {node} (cloud {cloud_id}, group {group}): {reason}")]
    CredentialDecode {
        cloud_id: String,
        group: String,
        node: String,
        reason: String,
    },

    #[error("failed to store credentials for node {node} (cloud {cloud_id}, group {group}): {source}")]
    CredentialStore {
        cloud_id: String,
        group: String,
        node: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist ledger for node {node} (cloud {cloud_id}, group {group}): {source}")]
    LedgerPersist {
        cloud_id: String,
        group: String,
        node: String,
        #[source]
        source: LedgerError,
    },

    #[error("failed to create node record {node} (cloud {cloud_id}, group {group}): {reason}")]
    NodeRecordCreate {
        cloud_id: String,
        group: String,
        node: String,
        reason: String,
    },

    #[error("failed to update status of node {node} (cloud {cloud_id}, group {group}): {reason}")]
    NodeStatusUpdate {
        cloud_id: String,
        group: String,
        node: String,
        reason: String,
    },

    #[error("node {node} is not assigned to cloud {cloud_id} group {group}")]
    NotAssigned {
        cloud_id: String,
        group: String,
        node: String,
    },

    #[error("failed to delete {what} for node {node} (cloud {cloud_id}, group {group}): {source}")]
    Cleanup {
        cloud_id: String,
        group: String,
        node: String,
        what: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether re-running the same pass can succeed without the request or
    /// the catalog changing first.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::InsufficientCapacity { .. }
                | EngineError::InvalidRequest { .. }
                | EngineError::Catalog(_)
                | EngineError::UnknownNode { .. }
                | EngineError::CredentialDecode { .. }
                | EngineError::NotAssigned { .. }
        )
    }

    pub(crate) fn is_conflict(&self) -> bool {
        match self {
            EngineError::LedgerPersist { source, .. } => source.is_conflict(),
            EngineError::ConcurrentModification { .. } => true,
            _ => false,
        }
    }
}
