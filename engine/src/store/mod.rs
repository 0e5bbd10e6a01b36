//! Object store collaborators.
//!
//! The engine persists three kinds of named records: the allocation ledger
//! document, per-node credential secrets and published node records. Every
//! object carries a revision that increases on each write, so callers can
//! make a read-modify-write cycle conditional on nothing having changed in
//! between.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Monotonic per-object revision assigned by the store.
pub type Revision = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Ledger,
    Secret,
    NodeRecord,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Ledger => "ledger",
            Kind::Secret => "secret",
            Kind::NodeRecord => "node",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored JSON document together with its current revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub data: String,
    pub revision: Revision,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: Kind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: Kind, name: String },

    #[error("{kind} {name} was modified concurrently (expected revision {expected}, found {actual})")]
    Conflict {
        kind: Kind,
        name: String,
        expected: Revision,
        actual: Revision,
    },

    #[error("storage backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Storage interface consumed by the engine.
///
/// Implementations must make `create`, `update` and `create_or_update`
/// atomic with respect to each other for a single `(kind, name)`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: Kind, name: &str) -> Result<Option<Versioned>, StoreError>;

    /// Insert a new object. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, kind: Kind, name: &str, data: String) -> Result<Revision, StoreError>;

    /// Replace an object only if its revision still equals `expected`.
    async fn update(
        &self,
        kind: Kind,
        name: &str,
        data: String,
        expected: Revision,
    ) -> Result<Revision, StoreError>;

    /// Unconditional upsert.
    async fn create_or_update(
        &self,
        kind: Kind,
        name: &str,
        data: String,
    ) -> Result<Revision, StoreError>;

    /// Remove an object. Returns false when nothing was stored under the name.
    async fn delete(&self, kind: Kind, name: &str) -> Result<bool, StoreError>;

    /// All objects of a kind, ordered by name.
    async fn list(&self, kind: Kind) -> Result<Vec<(String, Versioned)>, StoreError>;
}
