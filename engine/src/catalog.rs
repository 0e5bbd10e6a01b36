//! Inventory catalog: every physical node the engine may hand out, in the
//! order it was declared. The engine never mutates it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("catalog node with empty name")]
    EmptyName,

    #[error("duplicate catalog node {0}")]
    DuplicateNode(String),

    #[error("node {node} references undeclared hardware profile {profile}")]
    UnknownProfile { node: String, profile: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcInfo {
    pub address: String,
    pub username_base64: String,
    pub password_base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalNode {
    pub name: String,
    pub hwprofile: String,
    pub bmc: BmcInfo,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Declared profiles. When empty, any profile name is accepted.
    #[serde(default)]
    pub hwprofiles: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<PhysicalNode>,
}

impl Catalog {
    pub fn from_toml_str(s: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = toml::from_str(s)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_toml_str(&contents)?;
        debug!("Loaded catalog from {:?}: {} node(s)", path, catalog.nodes.len());
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if !seen.insert(node.name.as_str()) {
                return Err(CatalogError::DuplicateNode(node.name.clone()));
            }
            if !self.hwprofiles.is_empty() && !self.hwprofiles.contains(&node.hwprofile) {
                return Err(CatalogError::UnknownProfile {
                    node: node.name.clone(),
                    profile: node.hwprofile.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&PhysicalNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Nodes of one profile in declaration order.
    pub fn nodes_in_profile<'a>(
        &'a self,
        profile: &'a str,
    ) -> impl Iterator<Item = &'a PhysicalNode> + 'a {
        self.nodes.iter().filter(move |n| n.hwprofile == profile)
    }
}

/// Where the engine gets a fresh catalog at the start of every pass.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> Result<Catalog, CatalogError>;
}

#[async_trait]
impl CatalogSource for Catalog {
    async fn load(&self) -> Result<Catalog, CatalogError> {
        Ok(self.clone())
    }
}

/// Catalog kept in a TOML file, re-read on every pass.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
}

impl CatalogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogSource for CatalogFile {
    async fn load(&self) -> Result<Catalog, CatalogError> {
        let path = self.path.clone();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| CatalogError::Read {
                path: path.clone(),
                source,
            })?;
        Catalog::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
hwprofiles = ["profile-spr-single-processor-64G", "profile-spr-dual-processor-128G"]

[[nodes]]
name = "dummy-sp-64g-0"
hwprofile = "profile-spr-single-processor-64G"
hostname = "dummy-sp-64g-0.localhost"

[nodes.bmc]
address = "idrac-virtualmedia+https://192.168.2.0/redfish/v1/Systems/System.Embedded.1"
username_base64 = "YWRtaW4="
password_base64 = "bXlwYXNz"

[[nodes.interfaces]]
name = "eno1"
label = "bootable-interface"
mac_address = "c6:b6:13:a0:02:00"

[[nodes]]
name = "dummy-dp-128g-0"
hwprofile = "profile-spr-dual-processor-128G"

[nodes.bmc]
address = "idrac-virtualmedia+https://192.168.1.0/redfish/v1/Systems/System.Embedded.1"
username_base64 = "YWRtaW4="
password_base64 = "bXlwYXNz"
"#;

    #[test]
    fn test_parse_catalog_preserves_order() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.nodes.len(), 2);
        assert_eq!(catalog.nodes[0].name, "dummy-sp-64g-0");
        assert_eq!(catalog.nodes[0].interfaces[0].label, "bootable-interface");
        assert!(catalog.nodes[1].interfaces.is_empty());
        assert_eq!(catalog.nodes[1].hostname, "");

        let single: Vec<_> = catalog
            .nodes_in_profile("profile-spr-single-processor-64G")
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(single, vec!["dummy-sp-64g-0"]);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let doubled = format!(
            "{}\n{}",
            CATALOG,
            r#"
[[nodes]]
name = "dummy-sp-64g-0"
hwprofile = "profile-spr-single-processor-64G"

[nodes.bmc]
address = "x"
username_base64 = ""
password_base64 = ""
"#
        );
        match Catalog::from_toml_str(&doubled) {
            Err(CatalogError::DuplicateNode(name)) => assert_eq!(name, "dummy-sp-64g-0"),
            other => panic!("expected duplicate node error, got {:?}", other),
        }
    }

    #[test]
    fn test_undeclared_profile_rejected() {
        let catalog = Catalog {
            hwprofiles: vec!["small".to_string()],
            nodes: vec![PhysicalNode {
                name: "n1".to_string(),
                hwprofile: "large".to_string(),
                bmc: BmcInfo {
                    address: String::new(),
                    username_base64: String::new(),
                    password_base64: String::new(),
                },
                hostname: String::new(),
                interfaces: Vec::new(),
            }],
        };
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::UnknownProfile { .. })
        ));
    }

    #[tokio::test]
    async fn test_catalog_file_reread() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, CATALOG).unwrap();

        let source = CatalogFile::new(&path);
        assert_eq!(source.load().await.unwrap().nodes.len(), 2);

        std::fs::write(&path, "hwprofiles = []\n").unwrap();
        assert!(source.load().await.unwrap().nodes.is_empty());
    }
}
