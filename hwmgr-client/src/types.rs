use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ROLE_KEY: &str = "role";
pub const DEFAULT_TENANT: &str = "default_tenant";
pub const GRANT_TYPE_PASSWORD: &str = "password";

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub grant_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

// ============================================================================
// Resource Groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorLabel {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorInclude {
    #[serde(default)]
    pub labels: Vec<SelectorLabel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorFilter {
    #[serde(default)]
    pub include: SelectorInclude,
    #[serde(default)]
    pub exclude: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelectorRequest {
    pub rp_id: String,
    pub resource_profile_id: String,
    pub num_resources: usize,
    pub filters: SelectorFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupRequest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub resource_type_id: String,
    pub resource_selectors: BTreeMap<String, ResourceSelectorRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResourceGroupRequest {
    pub tenant: String,
    pub resource_group: ResourceGroupRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub jobid: Option<String>,
}

/// Resource selector as reported back by the hardware manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelectorStatus {
    #[serde(default)]
    pub rp_id: Option<String>,
    #[serde(default)]
    pub resource_profile_id: Option<String>,
    /// Sent as a JSON number that may carry a fraction.
    #[serde(default)]
    pub num_resources: Option<f64>,
    /// Names of the resources bound to this selector.
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource_selectors: BTreeMap<String, ResourceSelectorStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupResponse {
    #[serde(default)]
    pub resource_group: ResourceGroupObject,
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub jobid: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn phase(&self) -> JobPhase {
        match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("completed") | Some("succeeded") | Some("success") => JobPhase::Succeeded,
            Some("failed") | Some("error") | Some("cancelled") => JobPhase::Failed,
            _ => JobPhase::Running,
        }
    }
}
