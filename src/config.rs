//! Configuration: client settings and the cluster registry.
//!
//! The registry is a YAML document of the form
//!
//! ```yaml
//! clusters:
//!   - name: prod
//!     host: ldap1.example.com
//!     port: 389
//!     base_dn: dc=example,dc=com
//!     bind_dn: cn=admin,dc=example,dc=com
//!     readonly: false
//!     description: Production directory
//!   - name: replicated
//!     nodes:
//!       - { host: ldap-a.example.com, port: 389 }
//!       - { host: ldap-b.example.com, port: 389 }
//!     bind_dn: cn=reader,dc=example,dc=com
//!     readonly: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{DirectoryError, Result};

/// Default LDAP port.
pub const DEFAULT_PORT: u16 = 389;

/// Default connection timeout (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default per-operation timeout (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

const APP_DIR: &str = "ldap-manager";

/// Client-wide settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// TCP connect + bind timeout
    pub connect_timeout: Duration,
    /// Timeout for each search, write or unbind
    pub operation_timeout: Duration,
    /// Cluster registry location
    pub config_path: PathBuf,
    /// Credential cache root
    pub cache_dir: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let config_path = dirs::config_dir()
            .map(|p| p.join(APP_DIR).join("config.yml"))
            .unwrap_or_else(|| PathBuf::from("config.yml"));
        let cache_dir = dirs::cache_dir()
            .map(|p| p.join(APP_DIR).join("credentials"))
            .unwrap_or_else(|| PathBuf::from(".cache"));

        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            config_path,
            cache_dir,
        }
    }
}

impl ClientSettings {
    /// Defaults overridden by `LDAP_MANAGER_*` environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(path) = std::env::var("LDAP_MANAGER_CONFIG") {
            settings.config_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("LDAP_MANAGER_CACHE_DIR") {
            settings.cache_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_secs("LDAP_MANAGER_CONNECT_TIMEOUT_SECS") {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("LDAP_MANAGER_OPERATION_TIMEOUT_SECS") {
            settings.operation_timeout = Duration::from_secs(secs);
        }

        settings
    }
}

fn env_secs(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            warn!("Ignoring {}={:?}: expected a positive number of seconds", name, raw);
            None
        }
    }
}

/// One replica of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Connection facts for one configured cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub nodes: Vec<NodeAddress>,
    #[serde(default)]
    pub base_dn: Option<String>,
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub description: String,
}

impl ClusterConfig {
    /// The endpoint used for single-connection operations: the direct host,
    /// otherwise the first node.
    pub fn endpoint(&self) -> Result<NodeAddress> {
        if let Some(host) = self.host.as_deref().filter(|h| !h.trim().is_empty()) {
            return Ok(NodeAddress {
                host: host.to_string(),
                port: self.port.unwrap_or(DEFAULT_PORT),
            });
        }
        self.nodes.first().cloned().ok_or_else(|| {
            DirectoryError::ConfigError(format!(
                "Cluster '{}' has neither a host nor any nodes",
                self.name
            ))
        })
    }

    /// Every endpoint of the cluster: all nodes, or the direct host alone.
    pub fn endpoints(&self) -> Result<Vec<NodeAddress>> {
        if self.nodes.is_empty() {
            Ok(vec![self.endpoint()?])
        } else {
            Ok(self.nodes.clone())
        }
    }

    pub fn require_bind_dn(&self) -> Result<&str> {
        self.bind_dn
            .as_deref()
            .filter(|dn| !dn.trim().is_empty())
            .ok_or_else(|| {
                DirectoryError::ConfigError(format!(
                    "Cluster '{}' has no bind_dn configured",
                    self.name
                ))
            })
    }

    /// Connection target for the primary endpoint.
    pub fn target(&self) -> Result<ConnectTarget> {
        let endpoint = self.endpoint()?;
        self.target_for(&endpoint)
    }

    /// Connection target for a specific node of this cluster.
    pub fn target_for(&self, node: &NodeAddress) -> Result<ConnectTarget> {
        Ok(ConnectTarget {
            cluster: self.name.clone(),
            host: node.host.clone(),
            port: node.port,
            bind_dn: self.require_bind_dn()?.to_string(),
            base_dn: self.base_dn.clone().filter(|dn| !dn.is_empty()),
        })
    }
}

/// Everything needed to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub cluster: String,
    pub host: String,
    pub port: u16,
    pub bind_dn: String,
    /// `None` triggers base DN discovery after bind.
    pub base_dn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    clusters: Vec<ClusterConfig>,
}

/// Static list of configured clusters
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: Vec<ClusterConfig>,
}

impl ClusterRegistry {
    pub fn new(clusters: Vec<ClusterConfig>) -> Self {
        Self { clusters }
    }

    /// Loads the registry; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Cluster config {} not found, no clusters available", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let registry = Self::from_yaml(&content)?;
        info!("Loaded {} cluster(s) from {}", registry.clusters.len(), path.display());
        Ok(registry)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: RegistryFile = serde_yaml::from_str(content)
            .map_err(|e| DirectoryError::ConfigError(format!("Invalid cluster config: {}", e)))?;
        Ok(Self::new(file.clusters))
    }

    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.clusters
    }

    pub fn find(&self, name: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Result<&ClusterConfig> {
        self.find(name)
            .ok_or_else(|| DirectoryError::ConfigError(format!("Cluster '{}' not found", name)))
    }
}
