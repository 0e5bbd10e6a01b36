use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;

/// Find a free TCP port by binding to port 0
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    listener.local_addr().unwrap().port()
}

/// Wait for a TCP port to accept connections
pub async fn wait_for_port(port: u16, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for port {} to be ready", port);
        }
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn find_bin(name: &str) -> Option<PathBuf> {
    // target/debug/deps/integration-<hash> -> target/debug
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No grandparent")
        .to_path_buf();
    path.push(name);
    if path.exists() {
        return Some(path);
    }

    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // integration-tests -> workspace root
    path.push("target");
    path.push("debug");
    path.push(name);
    path.exists().then_some(path)
}

/// Get the path to the control binary. `cargo test` only builds binaries for
/// the package under test, so fall back to building it into a separate target
/// directory; the outer cargo still holds the lock on the default one.
fn control_bin() -> &'static Path {
    static BIN: OnceLock<PathBuf> = OnceLock::new();
    BIN.get_or_init(|| {
        if let Some(path) = find_bin("hwalloc-control") {
            return path;
        }

        let mut root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        root.pop();
        let target_dir = root.join("target").join("integration-bin");

        let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
        let status = Command::new(cargo)
            .args(["build", "-p", "hwalloc-control", "--bin", "hwalloc-control"])
            .arg("--target-dir")
            .arg(&target_dir)
            .current_dir(&root)
            .status()
            .expect("Failed to run cargo build");
        assert!(status.success(), "Building hwalloc-control failed");

        let path = target_dir.join("debug").join("hwalloc-control");
        assert!(path.exists(), "Binary 'hwalloc-control' not found at {:?}", path);
        path
    })
}

/// Four nodes: three `dell-r740` and one `dell-r640`, in that order.
pub const CATALOG: &str = r#"
hwprofiles = ["dell-r740", "dell-r640"]

[[nodes]]
name = "dell-0"
hwprofile = "dell-r740"
hostname = "dell-0.localhost"
[nodes.bmc]
address = "idrac-virtualmedia+https://192.168.2.10/redfish/v1/Systems/System.Embedded.1"
username_base64 = "YWRtaW4="
password_base64 = "cGFzc3dvcmQ="
[[nodes.interfaces]]
name = "eno1"
label = "bootable-interface"
mac_address = "c6:b6:13:a0:02:00"

[[nodes]]
name = "dell-1"
hwprofile = "dell-r740"
hostname = "dell-1.localhost"
[nodes.bmc]
address = "idrac-virtualmedia+https://192.168.2.11/redfish/v1/Systems/System.Embedded.1"
username_base64 = "YWRtaW4="
password_base64 = "cGFzc3dvcmQ="

[[nodes]]
name = "dell-2"
hwprofile = "dell-r740"
[nodes.bmc]
address = "idrac-virtualmedia+https://192.168.2.12/redfish/v1/Systems/System.Embedded.1"
username_base64 = "YWRtaW4="
password_base64 = "cGFzc3dvcmQ="

[[nodes]]
name = "dell-3"
hwprofile = "dell-r640"
[nodes.bmc]
address = "idrac-virtualmedia+https://192.168.2.13/redfish/v1/Systems/System.Embedded.1"
username_base64 = "YWRtaW4="
password_base64 = "cGFzc3dvcmQ="
"#;

/// A control service with its own database, catalog and config file
pub struct TestControl {
    pub port: u16,
    child: Child,
    _temp_dir: TempDir,
    db_path: PathBuf,
    catalog_path: PathBuf,
    config_path: PathBuf,
}

impl TestControl {
    /// Start a control service on an ephemeral port
    pub async fn new(catalog: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("hwalloc.db");
        let catalog_path = temp_dir.path().join("catalog.toml");
        let config_path = temp_dir.path().join("control.toml");

        std::fs::write(&catalog_path, catalog).expect("Failed to write catalog");
        std::fs::write(
            &config_path,
            "max_conflict_retries = 20\nretry_backoff_ms = 10\nmax_backoff_ms = 100\n",
        )
        .expect("Failed to write config");

        let port = find_free_port();
        let child = spawn_control(port, &db_path, &catalog_path, &config_path);
        wait_for_port(port, Duration::from_secs(30)).await;

        Self {
            port,
            child,
            _temp_dir: temp_dir,
            db_path,
            catalog_path,
            config_path,
        }
    }

    /// Get the control API URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Restart the control service (same DB path, new port)
    pub async fn restart(&mut self) -> u16 {
        let _ = self.child.kill();
        let _ = self.child.wait();

        let port = find_free_port();
        self.child = spawn_control(port, &self.db_path, &self.catalog_path, &self.config_path);
        wait_for_port(port, Duration::from_secs(30)).await;

        self.port = port;
        port
    }
}

fn spawn_control(port: u16, db_path: &Path, catalog_path: &Path, config_path: &Path) -> Child {
    Command::new(control_bin())
        .args(["--bind", &format!("127.0.0.1:{}", port)])
        .args(["--db-path", db_path.to_str().unwrap()])
        .args(["--catalog", catalog_path.to_str().unwrap()])
        .args(["--config", config_path.to_str().unwrap()])
        .args(["--log-level", "debug"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("Failed to start control service")
}

impl Drop for TestControl {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn nodepool(cloud_id: &str, groups: &[(&str, &str, usize)]) -> serde_json::Value {
    serde_json::json!({
        "cloud_id": cloud_id,
        "node_groups": groups
            .iter()
            .map(|(name, profile, size)| serde_json::json!({
                "name": name,
                "hw_profile": profile,
                "size": size,
            }))
            .collect::<Vec<_>>(),
    })
}

/// Response types for deserialization
#[derive(Debug, serde::Deserialize)]
pub struct Assignment {
    pub cloud_id: String,
    pub group: String,
    pub node: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct GroupStatus {
    pub name: String,
    pub nodes: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct NodeStatus {
    pub hostname: String,
    pub conditions: Vec<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub cloud_id: String,
    pub group_name: String,
    pub hw_profile: String,
    pub status: NodeStatus,
}

#[derive(Debug, serde::Deserialize)]
pub struct CloudStatus {
    pub cloud_id: String,
    pub node_groups: Vec<GroupStatus>,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, serde::Deserialize)]
pub struct NodePoolResponse {
    pub cloud_id: String,
    pub assigned: Vec<Assignment>,
    pub status: CloudStatus,
}

#[derive(Debug, serde::Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, serde::Deserialize)]
pub struct InventoryEntry {
    pub name: String,
    pub cloud_id: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct InventoryResponse {
    pub nodes: Vec<InventoryEntry>,
}

#[derive(Debug, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}
