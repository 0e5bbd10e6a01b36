use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use hwalloc_engine::{AllocationState, GroupRequest, HardwareManager, NodePoolRequest};
use hwalloc_hwmgr_client::{
    types::{CreateResourceGroupRequest, TokenRequest},
    ClientConfig, HardwareManagerClient, RemoteHardwareManager,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::wait_for_port;

/// In-process stand-in for a remote hardware manager
#[derive(Default)]
struct MockState {
    tokens_issued: u32,
    /// Tokens numbered below this are rejected with 401
    valid_from: u32,
    groups: HashMap<String, Value>,
    /// Job id -> polls left before it reports completion
    jobs: HashMap<String, u32>,
    next_job: u32,
}

type Shared = Arc<Mutex<MockState>>;

fn authorized(state: &MockState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer token-"))
        .and_then(|n| n.parse::<u32>().ok());
    match token {
        Some(n) if n >= state.valid_from && n <= state.tokens_issued => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "invalid token" })),
        )),
    }
}

async fn create_token(State(state): State<Shared>, Json(req): Json<TokenRequest>) -> Json<Value> {
    assert_eq!(req.grant_type, "password");
    assert_eq!(req.client_id, "hwalloc");
    let mut state = state.lock().unwrap();
    state.tokens_issued += 1;
    Json(json!({ "access_token": format!("token-{}", state.tokens_issued) }))
}

async fn create_group(
    State(state): State<Shared>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateResourceGroupRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authorized(&state, &headers)?;
    assert_eq!(tenant, req.tenant);

    let selectors: serde_json::Map<String, Value> = req
        .resource_group
        .resource_selectors
        .iter()
        .map(|(name, sel)| {
            let resources: Vec<String> =
                (0..sel.num_resources).map(|i| format!("{}-{}", name, i)).collect();
            (
                name.clone(),
                json!({
                    "rp_id": sel.rp_id,
                    "resource_profile_id": sel.resource_profile_id,
                    "num_resources": sel.num_resources as f64,
                    "resources": resources,
                }),
            )
        })
        .collect();
    state.groups.insert(
        req.resource_group.id.clone(),
        json!({ "resource_group": { "id": req.resource_group.id, "resource_selectors": selectors } }),
    );

    state.next_job += 1;
    let job = format!("job-{}", state.next_job);
    state.jobs.insert(job.clone(), 1);
    Ok(Json(json!({ "jobid": job })))
}

async fn get_group(
    State(state): State<Shared>,
    Path((_tenant, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authorized(&state, &headers)?;
    state.groups.get(&id).cloned().map(Json).ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "not found" })),
    ))
}

async fn delete_group(
    State(state): State<Shared>,
    Path((_tenant, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authorized(&state, &headers)?;
    if state.groups.remove(&id).is_none() {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))));
    }
    state.next_job += 1;
    Ok(Json(json!({ "jobid": format!("job-{}", state.next_job) })))
}

async fn job_status(
    State(state): State<Shared>,
    Path((_tenant, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authorized(&state, &headers)?;
    let Some(left) = state.jobs.get_mut(&id) else {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "message": "no such job" }))));
    };
    let status = if *left == 0 {
        "COMPLETED"
    } else {
        *left -= 1;
        "STARTED"
    };
    Ok(Json(json!({ "jobid": id, "status": status })))
}

async fn start_mock(state: Shared) -> String {
    let app = Router::new()
        .route("/identity/v1/tenant/Fulcrum/token/create", post(create_token))
        .route("/v1/tenants/:tenant/resourcegroups", post(create_group))
        .route(
            "/v1/tenants/:tenant/resourcegroups/:id",
            get(get_group).delete(delete_group),
        )
        .route("/v1/tenants/:tenant/jobs/:id", get(job_status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    wait_for_port(port, Duration::from_secs(5)).await;
    format!("http://127.0.0.1:{}", port)
}

fn config(api_url: String) -> ClientConfig {
    ClientConfig {
        api_url,
        tenant: None,
        client_id: "hwalloc".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        resource_type_id: "ResourceGroup~2.1.1".to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn request() -> NodePoolRequest {
    let mut controller = GroupRequest::new("controller", "profile-spr-single-processor-64G", 1);
    controller.resource_pool_id = Some("pool-a".to_string());
    let mut worker = GroupRequest::new("worker", "profile-spr-dual-processor-128G", 2);
    worker.resource_pool_id = Some("pool-b".to_string());
    NodePoolRequest {
        cloud_id: "cloud-1".to_string(),
        node_groups: vec![controller, worker],
    }
}

#[tokio::test]
async fn test_remote_allocation_lifecycle() {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let url = start_mock(state.clone()).await;
    let hwmgr = RemoteHardwareManager::new(HardwareManagerClient::new(config(url)).unwrap());
    let request = request();

    // First call submits the resource group
    let report = hwmgr.allocate(&request).await.unwrap();
    assert_eq!(
        report.state,
        AllocationState::InProgress {
            job_id: Some("job-1".to_string())
        }
    );
    assert!(state.lock().unwrap().groups.contains_key("rhplugin-rg-cloud-1"));

    // Job still running
    let report = hwmgr.allocate(&request).await.unwrap();
    assert!(matches!(report.state, AllocationState::InProgress { .. }));

    // Job done, selectors validated
    let report = hwmgr.allocate(&request).await.unwrap();
    assert!(report.is_completed());
    assert_eq!(report.node_groups.len(), 2);
    assert_eq!(report.node_groups[1].name, "worker");
    assert_eq!(report.node_groups[1].nodes, vec!["worker-0", "worker-1"]);

    // Submitting again finds the existing group instead of creating a new one
    let report = hwmgr.allocate(&request).await.unwrap();
    assert!(report.is_completed());
    assert_eq!(state.lock().unwrap().next_job, 1);

    let report = hwmgr.query("cloud-1").await.unwrap();
    assert!(report.is_completed());

    let report = hwmgr.deallocate("cloud-1").await.unwrap();
    assert!(matches!(report.state, AllocationState::InProgress { job_id: Some(_) }));
    let report = hwmgr.deallocate("cloud-1").await.unwrap();
    assert!(report.is_completed());

    // One token was enough for all of it
    assert_eq!(state.lock().unwrap().tokens_issued, 1);
}

#[tokio::test]
async fn test_existing_group_with_other_shape_fails() {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let url = start_mock(state.clone()).await;
    let hwmgr = RemoteHardwareManager::new(HardwareManagerClient::new(config(url)).unwrap());

    state.lock().unwrap().groups.insert(
        "rhplugin-rg-cloud-1".to_string(),
        json!({ "resource_group": { "resource_selectors": {
            "controller": { "rp_id": "pool-a", "num_resources": 1.0 },
            "worker": { "rp_id": "pool-b", "num_resources": 5.0 }
        } } }),
    );

    let report = hwmgr.allocate(&request()).await.unwrap();
    match report.state {
        AllocationState::Failed { reason } => {
            assert!(reason.contains("invalid number of resources"), "{}", reason)
        }
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_token_is_renewed_once() {
    let state: Shared = Arc::new(Mutex::new(MockState {
        valid_from: 2,
        ..Default::default()
    }));
    let url = start_mock(state.clone()).await;
    let client = HardwareManagerClient::new(config(url)).unwrap();

    let err = client.get_resource_group("cloud-1").await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);
    assert_eq!(state.lock().unwrap().tokens_issued, 2);
}

#[tokio::test]
async fn test_query_follows_pending_job_to_completion() {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let url = start_mock(state.clone()).await;
    let hwmgr = RemoteHardwareManager::new(HardwareManagerClient::new(config(url)).unwrap());

    let report = hwmgr.allocate(&request()).await.unwrap();
    assert!(matches!(report.state, AllocationState::InProgress { .. }));

    // Only queries from here on
    let report = hwmgr.query("cloud-1").await.unwrap();
    assert_eq!(
        report.state,
        AllocationState::InProgress {
            job_id: Some("job-1".to_string())
        }
    );

    let report = hwmgr.query("cloud-1").await.unwrap();
    assert!(report.is_completed());
    assert_eq!(report.node_groups.len(), 2);
    assert_eq!(report.node_groups[0].nodes, vec!["controller-0"]);

    // The finished job is forgotten, a further query reads the group directly
    state.lock().unwrap().jobs.clear();
    let report = hwmgr.query("cloud-1").await.unwrap();
    assert!(report.is_completed());
}
