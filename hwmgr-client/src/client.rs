use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hwalloc_engine::NodePoolRequest;

use crate::error::ClientError;
use crate::types::*;

/// Connection settings for a remote hardware manager.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub tenant: Option<String>,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub resource_type_id: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn tenant(&self) -> &str {
        match self.tenant.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => DEFAULT_TENANT,
        }
    }
}

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn resource_group_id(cloud_id: &str) -> String {
    format!("rhplugin-rg-{}", cloud_id)
}

fn segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// Build the resource group creation body for a node pool: one selector per
/// node group, labelled with the group name as its role.
pub fn resource_group_from_request(
    request: &NodePoolRequest,
    tenant: &str,
    resource_type_id: &str,
) -> CreateResourceGroupRequest {
    let id = resource_group_id(&request.cloud_id);

    let resource_selectors = request
        .node_groups
        .iter()
        .map(|group| {
            let selector = ResourceSelectorRequest {
                rp_id: group.resource_pool_id.clone().unwrap_or_default(),
                resource_profile_id: group.hw_profile.clone(),
                num_resources: group.size,
                filters: SelectorFilter {
                    include: SelectorInclude {
                        labels: vec![SelectorLabel {
                            key: ROLE_KEY.to_string(),
                            value: group.name.clone(),
                        }],
                    },
                    exclude: BTreeMap::new(),
                },
            };
            (group.name.clone(), selector)
        })
        .collect();

    CreateResourceGroupRequest {
        tenant: tenant.to_string(),
        resource_group: ResourceGroupRequest {
            id: id.clone(),
            name: id,
            description: "Resource group managed by the hardware allocation service".to_string(),
            resource_type_id: resource_type_id.to_string(),
            resource_selectors,
        },
    }
}

/// Check that a resource group carries every requested node group with the
/// expected count and resource pool.
pub fn validate_resource_selectors(
    request: &NodePoolRequest,
    selectors: &BTreeMap<String, ResourceSelectorStatus>,
) -> Result<(), ClientError> {
    let mismatch = |reason: String| ClientError::Mismatch {
        group: resource_group_id(&request.cloud_id),
        reason,
    };

    for group in &request.node_groups {
        let Some(selector) = selectors.get(&group.name) else {
            return Err(mismatch(format!(
                "node group {} does not exist in resource group",
                group.name
            )));
        };

        match selector.num_resources {
            Some(n) if n == group.size as f64 => {}
            Some(n) => {
                return Err(mismatch(format!(
                    "invalid number of resources for node group {}: expected {} found {}",
                    group.name, group.size, n
                )))
            }
            None => {
                return Err(mismatch(format!(
                    "missing number of resources for node group {}: expected {}",
                    group.name, group.size
                )))
            }
        }

        let expected_pool = group.resource_pool_id.as_deref().unwrap_or_default();
        match selector.rp_id.as_deref() {
            Some(rp) if rp == expected_pool => {}
            Some(rp) => {
                return Err(mismatch(format!(
                    "invalid resource pool id for node group {}: expected {} found {}",
                    group.name, expected_pool, rp
                )))
            }
            None => {
                return Err(mismatch(format!(
                    "missing resource pool id for node group {}: expected {}",
                    group.name, expected_pool
                )))
            }
        }
    }
    Ok(())
}

/// REST client for a remote hardware manager. Authenticates with the
/// password grant and sends the token as a bearer credential; the token is
/// fetched again once when the server answers 401.
pub struct HardwareManagerClient {
    config: ClientConfig,
    base_url: Url,
    http: reqwest::Client,
    user_agent: String,
    token: Mutex<Option<String>>,
}

impl HardwareManagerClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        // Paths are joined relative to the API root, which may carry a prefix
        let mut root = config.api_url.clone();
        if !root.ends_with('/') {
            root.push('/');
        }
        let base_url = Url::parse(&root).map_err(|e| ClientError::Url(e.to_string()))?;
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            config,
            base_url,
            http,
            user_agent: format!("hwalloc/{}", env!("CARGO_PKG_VERSION")),
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url.join(path.trim_start_matches('/')).map_err(|e| {
            ClientError::Url(format!(
                "failed to join base_url={} with path={}: {}",
                self.base_url, path, e
            ))
        })
    }

    fn tenant_path(&self, rest: &str) -> String {
        format!("/v1/tenants/{}/{}", segment(self.config.tenant()), rest)
    }

    /// Request a new access token.
    pub async fn acquire_token(&self) -> Result<String, ClientError> {
        const OP: &str = "token request";

        let url = self.build_url("/identity/v1/tenant/Fulcrum/token/create")?;
        let body = TokenRequest {
            client_id: self.config.client_id.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            grant_type: GRANT_TYPE_PASSWORD.to_string(),
        };

        debug!("HTTP POST {}", url);
        let resp = self
            .http
            .post(url)
            .header("user-agent", &self.user_agent)
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await?;

        let token: TokenResponse = decode(OP, resp).await?;
        token.access_token.filter(|t| !t.is_empty()).ok_or(ClientError::Decode {
            operation: OP,
            reason: "access_token field empty".to_string(),
        })
    }

    async fn bearer(&self) -> Result<String, ClientError> {
        let mut token = self.token.lock().await;
        if let Some(t) = token.as_ref() {
            return Ok(t.clone());
        }
        let fresh = self.acquire_token().await?;
        info!("Acquired hardware manager token for tenant {}", self.config.tenant());
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.build_url(path)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let token = self.bearer().await?;
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header("user-agent", &self.user_agent)
                .header("x-request-id", Uuid::new_v4().to_string())
                .bearer_auth(&token);
            if let Some(b) = body {
                req = req.json(b);
            }

            debug!("HTTP {} {} (attempt {})", method, url, attempt);
            let resp = req.send().await?;
            if resp.status() == StatusCode::UNAUTHORIZED && attempt == 1 {
                warn!("Hardware manager rejected token, re-authenticating");
                *self.token.lock().await = None;
                continue;
            }
            return Ok(resp);
        }
    }

    pub async fn get_resource_group(
        &self,
        cloud_id: &str,
    ) -> Result<ResourceGroupResponse, ClientError> {
        let path = self.tenant_path(&format!("resourcegroups/{}", segment(&resource_group_id(cloud_id))));
        let resp = self.send::<()>(Method::GET, &path, None).await?;
        decode("resource group get", resp).await
    }

    /// Ask the hardware manager to build the resource group for a node pool.
    /// Returns the job id tracking the request.
    pub async fn create_resource_group(
        &self,
        request: &NodePoolRequest,
    ) -> Result<String, ClientError> {
        let group_id = resource_group_id(&request.cloud_id);

        match self.get_resource_group(&request.cloud_id).await {
            Ok(_) => return Err(ClientError::AlreadyExists(group_id)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let body = resource_group_from_request(
            request,
            self.config.tenant(),
            &self.config.resource_type_id,
        );
        info!(
            "Creating resource group {} with {} selector(s)",
            group_id,
            body.resource_group.resource_selectors.len()
        );

        let path = self.tenant_path("resourcegroups");
        let resp = self.send(Method::POST, &path, Some(&body)).await?;
        let job: JobResponse = decode("resource group create", resp).await?;
        job_id("resource group create", job)
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus, ClientError> {
        let path = self.tenant_path(&format!("jobs/{}", segment(job_id)));
        let resp = self.send::<()>(Method::GET, &path, None).await?;
        decode("job query", resp).await
    }

    /// Returns the job id tracking the deletion.
    pub async fn delete_resource_group(&self, cloud_id: &str) -> Result<String, ClientError> {
        let group_id = resource_group_id(cloud_id);
        info!("Deleting resource group {}", group_id);

        let path = self.tenant_path(&format!("resourcegroups/{}", segment(&group_id)));
        let resp = self.send::<()>(Method::DELETE, &path, None).await?;
        let job: JobResponse = decode("resource group delete", resp).await?;
        job_id("resource group delete", job)
    }
}

fn job_id(operation: &'static str, job: JobResponse) -> Result<String, ClientError> {
    job.jobid.filter(|j| !j.is_empty()).ok_or(ClientError::Decode {
        operation,
        reason: "missing jobid".to_string(),
    })
}

async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;

    if status != StatusCode::OK {
        return Err(ClientError::Status {
            operation,
            status,
            body: String::from_utf8_lossy(&bytes).to_string(),
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
        operation,
        reason: e.to_string(),
    })
}
