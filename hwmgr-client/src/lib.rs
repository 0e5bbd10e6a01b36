//! Client for remote hardware managers that hand out nodes as resource
//! groups.

pub mod adaptor;
pub mod client;
pub mod error;
pub mod types;

pub use adaptor::RemoteHardwareManager;
pub use client::{
    resource_group_from_request, resource_group_id, validate_resource_selectors, ClientConfig,
    HardwareManagerClient,
};
pub use error::ClientError;
