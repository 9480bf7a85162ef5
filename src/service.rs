//! Per-request orchestration.
//!
//! Each operation looks the cluster up, resolves the bind secret from the
//! credential cache, opens one session through the [`Connector`], runs and
//! closes it. The session is closed on every path, including failures.

use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::{ClusterConfig, ClusterRegistry, ConnectTarget};
use crate::credential_cache::CredentialCache;
use crate::entry::{AttributeMap, DirectoryEntry};
use crate::errors::{DirectoryError, Result};
use crate::monitoring::{
    operation_statistics, snapshot, ActivityRecord, ClusterHealth, ClusterMetrics, NodeMetrics,
    MONITOR_BASE,
};
use crate::pagination::{fetch_page, Page, PageRequest};
use crate::query::{compose_filter, EntityType};
use crate::secure_types::{Credentials, SecureString};
use crate::session::{Connector, DirectorySession, SearchQuery, SearchScope, MATCH_ALL_FILTER};

/// Reply to a successful connect
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub status: String,
    pub message: String,
    pub base_dn: String,
}

/// Ad-hoc search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub entries: Vec<DirectoryEntry>,
    pub count: usize,
}

/// Echo of an accepted write
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub status: String,
    pub dn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeMap>,
}

impl WriteOutcome {
    fn success(dn: &str, attributes: Option<AttributeMap>) -> Self {
        Self {
            status: "success".to_string(),
            dn: dn.to_string(),
            attributes,
        }
    }
}

pub struct DirectoryService<C: Connector> {
    registry: ClusterRegistry,
    cache: CredentialCache,
    connector: C,
}

impl<C: Connector> DirectoryService<C> {
    pub fn new(registry: ClusterRegistry, cache: CredentialCache, connector: C) -> Self {
        Self {
            registry,
            cache,
            connector,
        }
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub fn clusters(&self) -> &[ClusterConfig] {
        self.registry.clusters()
    }

    /// Binds once to verify the cluster is reachable with the resolved secret.
    ///
    /// A cached secret takes precedence over `password`. When nothing was
    /// cached, the supplied password is cached after the bind succeeds.
    pub async fn connect(&self, cluster: &str, password: Option<SecureString>) -> Result<ConnectResponse> {
        let config = self.registry.get(cluster)?;
        let bind_dn = config.require_bind_dn()?;
        let cached = self.cache.get(cluster, bind_dn)?;

        let secret = match (&cached, password) {
            (Some(secret), _) => secret.clone(),
            (None, Some(supplied)) if !supplied.is_empty() => supplied,
            _ => {
                return Err(DirectoryError::ConfigError(format!(
                    "Password required for cluster '{}'",
                    cluster
                )))
            }
        };

        let target = config.target()?;
        let credentials = Credentials::new(bind_dn, secret.clone());
        let mut session = self.connector.open(&target, &credentials).await?;
        let base_dn = session.base_dn().to_string();
        session.close().await;

        if cached.is_none() {
            if let Err(e) = self.cache.save_if_absent(cluster, bind_dn, &secret) {
                warn!("Connected to {} but could not cache the password: {}", cluster, e);
            }
        }

        info!("Connected to cluster {} (base DN: '{}')", cluster, base_dn);
        Ok(ConnectResponse {
            status: "success".to_string(),
            message: "Connected successfully".to_string(),
            base_dn,
        })
    }

    /// Whether a secret is cached for the cluster's bind identity.
    /// Unknown clusters are never cached.
    pub fn password_cached(&self, cluster: &str) -> bool {
        let Some(bind_dn) = self.registry.find(cluster).and_then(|c| c.bind_dn.as_deref()) else {
            return false;
        };
        match self.cache.get(cluster, bind_dn) {
            Ok(secret) => secret.is_some(),
            Err(e) => {
                warn!("Unreadable cached password for {}: {}", cluster, e);
                false
            }
        }
    }

    pub fn forget_password(&self, cluster: &str) -> Result<()> {
        let config = self.registry.get(cluster)?;
        self.cache.clear(cluster, config.require_bind_dn()?)
    }

    /// One page of the cluster browse view over the (possibly discovered) base DN.
    pub async fn browse(
        &self,
        cluster: &str,
        entity: EntityType,
        search: Option<&str>,
        request: PageRequest,
    ) -> Result<Page> {
        let config = self.registry.get(cluster)?;
        let credentials = self.credentials(config)?;
        let target = config.target()?;

        let filter = compose_filter(entity, search);
        info!(
            "Browsing {} page {} (size {}) with {}",
            cluster,
            request.page(),
            request.page_size(),
            filter
        );

        let mut session = self.connector.open(&target, &credentials).await?;
        let query = SearchQuery::subtree(session.base_dn(), filter);
        let result = fetch_page(&mut session, &query, request).await;
        session.close().await;
        result
    }

    /// Unpaginated search with an explicit base, filter, scope and attribute list.
    pub async fn query(
        &self,
        cluster: &str,
        base_dn: &str,
        filter: &str,
        scope: SearchScope,
        attributes: &[String],
    ) -> Result<SearchResults> {
        let config = self.registry.get(cluster)?;
        let credentials = self.credentials(config)?;
        let target = scoped_target(config, base_dn)?;

        let filter = if filter.trim().is_empty() {
            MATCH_ALL_FILTER
        } else {
            filter
        };
        let query = SearchQuery::new(base_dn, scope, filter).with_attributes(attributes);

        let mut session = self.connector.open(&target, &credentials).await?;
        let result = session.search_all(&query).await;
        session.close().await;

        let entries = result?;
        Ok(SearchResults {
            count: entries.len(),
            entries,
        })
    }

    pub async fn create_entry(&self, cluster: &str, dn: &str, attributes: AttributeMap) -> Result<WriteOutcome> {
        let config = self.writable(cluster)?;
        require_dn(dn)?;
        if attributes.is_empty() {
            return Err(DirectoryError::ValidationError(format!(
                "no attributes given for new entry '{}'",
                dn
            )));
        }
        let credentials = self.credentials(config)?;
        let target = scoped_target(config, dn)?;

        let mut session = self.connector.open(&target, &credentials).await?;
        let result = session.add(dn, &attributes).await;
        session.close().await;
        result?;

        info!("Created {} on {}", dn, cluster);
        Ok(WriteOutcome::success(dn, Some(normalize_attributes(attributes))))
    }

    /// Replaces each named attribute of `dn` with the given values.
    pub async fn update_entry(&self, cluster: &str, dn: &str, changes: AttributeMap) -> Result<WriteOutcome> {
        let config = self.writable(cluster)?;
        require_dn(dn)?;
        if changes.is_empty() {
            return Err(DirectoryError::ValidationError(format!(
                "no changes given for '{}'",
                dn
            )));
        }
        let credentials = self.credentials(config)?;
        let target = scoped_target(config, dn)?;

        let mut session = self.connector.open(&target, &credentials).await?;
        let result = session.modify(dn, &changes).await;
        session.close().await;
        result?;

        info!("Updated {} on {}", dn, cluster);
        Ok(WriteOutcome::success(dn, Some(normalize_attributes(changes))))
    }

    pub async fn delete_entry(&self, cluster: &str, dn: &str) -> Result<WriteOutcome> {
        let config = self.writable(cluster)?;
        require_dn(dn)?;
        let credentials = self.credentials(config)?;
        let target = scoped_target(config, dn)?;

        let mut session = self.connector.open(&target, &credentials).await?;
        let result = session.delete(dn).await;
        session.close().await;
        result?;

        info!("Deleted {} on {}", dn, cluster);
        Ok(WriteOutcome::success(dn, None))
    }

    /// Probes the cluster's primary endpoint.
    ///
    /// Configuration problems are returned as errors; a server that cannot
    /// be reached or bound is reported as unhealthy.
    pub async fn health(&self, cluster: &str) -> Result<ClusterHealth> {
        let config = self.registry.get(cluster)?;
        let credentials = self.credentials(config)?;
        let target = config.target()?;

        let started = Instant::now();
        let mut session = match self.connector.open(&target, &credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Health check of {} failed: {}", cluster, e);
                return Ok(ClusterHealth::unhealthy(cluster, e));
            }
        };
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (entry_count, csn) = snapshot(&mut session).await;
        session.close().await;

        Ok(ClusterHealth::healthy(cluster, response_time_ms, entry_count, csn))
    }

    /// Entry count and `contextCSN` of every node, with a sync summary.
    pub async fn node_metrics(&self, cluster: &str) -> Result<ClusterMetrics> {
        let config = self.registry.get(cluster)?;
        let credentials = self.credentials(config)?;

        let mut nodes = Vec::new();
        for endpoint in config.endpoints()? {
            let target = config.target_for(&endpoint)?;
            let metrics = match self.connector.open(&target, &credentials).await {
                Ok(mut session) => {
                    let (entry_count, csn) = snapshot(&mut session).await;
                    session.close().await;
                    NodeMetrics::healthy(&endpoint.host, endpoint.port, entry_count, csn)
                }
                Err(e) => {
                    warn!("Node {}:{} of {} unreachable: {}", endpoint.host, endpoint.port, cluster, e);
                    NodeMetrics::unhealthy(&endpoint.host, endpoint.port, e)
                }
            };
            nodes.push(metrics);
        }

        Ok(ClusterMetrics::summarize(cluster, nodes))
    }

    /// Completed-operation counters from the monitor backend.
    ///
    /// Only an unknown cluster is an error; anything else yields an INFO record.
    pub async fn activity(&self, cluster: &str) -> Result<Vec<ActivityRecord>> {
        let config = self.registry.get(cluster)?;

        let opened = match (self.credentials(config), scoped_target(config, MONITOR_BASE)) {
            (Ok(credentials), Ok(target)) => self.connector.open(&target, &credentials).await,
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        match opened {
            Ok(mut session) => {
                let records = operation_statistics(&mut session).await;
                session.close().await;
                Ok(records)
            }
            Err(e) => {
                warn!("Activity of {} unavailable: {}", cluster, e);
                Ok(vec![ActivityRecord::unavailable()])
            }
        }
    }

    /// Bind identity plus the cached secret for it.
    fn credentials(&self, config: &ClusterConfig) -> Result<Credentials> {
        let bind_dn = config.require_bind_dn()?;
        let secret = self.cache.get(&config.name, bind_dn)?.ok_or_else(|| {
            DirectoryError::ConfigError(format!(
                "Password not configured for cluster '{}'",
                config.name
            ))
        })?;
        Ok(Credentials::new(bind_dn, secret))
    }

    fn writable(&self, cluster: &str) -> Result<&ClusterConfig> {
        let config = self.registry.get(cluster)?;
        if config.readonly {
            return Err(DirectoryError::ConfigError(format!(
                "Cluster '{}' is read-only",
                cluster
            )));
        }
        Ok(config)
    }
}

/// Primary endpoint with an explicit base, so no discovery runs.
fn scoped_target(config: &ClusterConfig, base_dn: &str) -> Result<ConnectTarget> {
    let mut target = config.target()?;
    target.base_dn = Some(base_dn.to_string());
    Ok(target)
}

fn require_dn(dn: &str) -> Result<()> {
    if dn.trim().is_empty() {
        return Err(DirectoryError::ValidationError("DN must not be empty".to_string()));
    }
    Ok(())
}

fn normalize_attributes(attributes: AttributeMap) -> AttributeMap {
    attributes
        .into_iter()
        .map(|(name, value)| (name, value.normalized()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AttributeValue;

    #[test]
    fn test_write_echo_collapses_single_values() {
        let mut attrs = AttributeMap::new();
        attrs.insert("cn".to_string(), AttributeValue::Multi(vec!["Alice".to_string()]));
        attrs.insert(
            "objectClass".to_string(),
            AttributeValue::Multi(vec!["top".to_string(), "person".to_string()]),
        );

        let echoed = normalize_attributes(attrs);
        assert_eq!(echoed["cn"], AttributeValue::Single("Alice".to_string()));
        assert!(echoed["objectClass"].is_multi());
    }

    #[test]
    fn test_write_outcome_serialization() {
        let json = serde_json::to_value(WriteOutcome::success("cn=x,dc=example,dc=com", None)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["dn"], "cn=x,dc=example,dc=com");
        assert!(json.get("attributes").is_none());
    }

    #[test]
    fn test_require_dn() {
        assert!(require_dn("cn=x").is_ok());
        assert!(matches!(require_dn("  "), Err(DirectoryError::ValidationError(_))));
    }
}
