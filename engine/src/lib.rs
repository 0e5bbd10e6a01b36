//! Hardware inventory allocation engine.
//!
//! Hands physical nodes from a static catalog to the node groups of clouds,
//! records ownership in a single ledger document and publishes one record per
//! allocated node.

pub mod allocator;
pub mod catalog;
pub mod deallocation;
pub mod engine;
pub mod error;
pub mod hwmgr;
pub mod ledger;
pub mod provisioner;
pub mod store;
pub mod types;

pub use catalog::{Catalog, CatalogFile, CatalogSource};
pub use engine::{Backoff, Engine, EngineOptions, ExponentialBackoff, FixedBackoff, PassOutcome};
pub use error::EngineError;
pub use hwmgr::{AllocationReport, AllocationState, HardwareManager};
pub use store::{Kind, MemoryStore, ObjectStore, SqliteStore, StoreError};
pub use types::*;
