//! Health, replication and activity reads.
//!
//! Everything here is a single round trip per value and degrades to an
//! informational result instead of failing: a missing `contextCSN` is an
//! empty string, an unreadable monitor backend is an INFO record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::session::{DirectorySession, SearchQuery};

/// Replication marker on a naming context
pub const CONTEXT_CSN: &str = "contextCSN";

/// Root of the monitor backend
pub const MONITOR_BASE: &str = "cn=Monitor";

const OPERATIONS_BASE: &str = "cn=Operations,cn=Monitor";
const OP_COMPLETED: &str = "monitorOpCompleted";

/// Operations reported by [`operation_statistics`], in report order
pub const MONITORED_OPERATIONS: [&str; 7] =
    ["Bind", "Unbind", "Search", "Compare", "Modify", "Add", "Delete"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Healthy,
    Degraded,
}

/// Result of a single-server health probe
#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealth {
    pub cluster: String,
    pub status: HealthStatus,
    /// Connect + bind time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    #[serde(rename = "contextCSN", skip_serializing_if = "Option::is_none")]
    pub context_csn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClusterHealth {
    pub fn healthy(cluster: &str, response_time_ms: u64, entry_count: usize, context_csn: String) -> Self {
        Self {
            cluster: cluster.to_string(),
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            entry_count: Some(entry_count),
            context_csn: Some(context_csn),
            error: None,
        }
    }

    pub fn unhealthy(cluster: &str, error: impl ToString) -> Self {
        Self {
            cluster: cluster.to_string(),
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            entry_count: None,
            context_csn: None,
            error: Some(error.to_string()),
        }
    }
}

/// Per-node replication snapshot
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    pub node: String,
    pub port: u16,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    #[serde(rename = "contextCSN", skip_serializing_if = "Option::is_none")]
    pub context_csn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeMetrics {
    pub fn healthy(node: &str, port: u16, entry_count: usize, context_csn: String) -> Self {
        Self {
            node: node.to_string(),
            port,
            status: HealthStatus::Healthy,
            entry_count: Some(entry_count),
            context_csn: Some(context_csn),
            error: None,
        }
    }

    pub fn unhealthy(node: &str, port: u16, error: impl ToString) -> Self {
        Self {
            node: node.to_string(),
            port,
            status: HealthStatus::Unhealthy,
            entry_count: None,
            context_csn: None,
            error: Some(error.to_string()),
        }
    }
}

/// Multi-node summary
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMetrics {
    pub cluster: String,
    pub nodes: Vec<NodeMetrics>,
    pub cluster_status: ClusterStatus,
    /// At most one distinct non-empty `contextCSN` across nodes
    pub in_sync: bool,
}

impl ClusterMetrics {
    pub fn summarize(cluster: &str, nodes: Vec<NodeMetrics>) -> Self {
        let all_healthy = nodes.iter().all(|n| n.status == HealthStatus::Healthy);
        let distinct_csns: HashSet<&str> = nodes
            .iter()
            .filter_map(|n| n.context_csn.as_deref())
            .filter(|csn| !csn.is_empty())
            .collect();
        let in_sync = distinct_csns.len() <= 1;

        Self {
            cluster: cluster.to_string(),
            cluster_status: if all_healthy {
                ClusterStatus::Healthy
            } else {
                ClusterStatus::Degraded
            },
            in_sync,
            nodes,
        }
    }
}

/// One line of the activity view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub client: String,
    pub operation: String,
    pub dn: String,
    pub filter: String,
}

impl ActivityRecord {
    /// Completed-operation counter from the monitor backend.
    pub fn statistic(operation: &str, completed: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            client: "Statistics".to_string(),
            operation: operation.to_uppercase(),
            dn: format!("Completed: {}", completed),
            filter: String::new(),
        }
    }

    /// Informational record shown in place of statistics.
    pub fn info(message: &str, hint: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            client: "System".to_string(),
            operation: "INFO".to_string(),
            dn: message.to_string(),
            filter: hint.to_string(),
        }
    }

    pub fn monitor_disabled() -> Self {
        Self::info(
            "cn=Monitor backend not enabled on this LDAP server",
            "Enable monitoring in slapd.conf or cn=config to view activity logs",
        )
    }

    pub fn unavailable() -> Self {
        Self::info(
            "Activity logging unavailable",
            "cn=Monitor backend must be enabled in LDAP configuration",
        )
    }
}

/// `contextCSN` of `base_dn`, or the empty string when unreadable.
pub async fn context_csn<S>(session: &mut S, base_dn: &str) -> String
where
    S: DirectorySession + ?Sized,
{
    match session.read_attribute(base_dn, CONTEXT_CSN).await {
        Ok(csn) => csn.unwrap_or_default(),
        Err(e) => {
            warn!("context_csn: read of '{}' failed: {}", base_dn, e);
            String::new()
        }
    }
}

/// Entry count and replication marker under the session's base DN.
pub async fn snapshot<S>(session: &mut S) -> (usize, String)
where
    S: DirectorySession + ?Sized,
{
    let base_dn = session.base_dn().to_string();
    let entry_count = session.entry_count(&base_dn).await;
    let csn = context_csn(session, &base_dn).await;
    debug!("snapshot: {} entries under '{}', csn '{}'", entry_count, base_dn, csn);
    (entry_count, csn)
}

/// Completed-operation counters from `cn=Operations,cn=Monitor`.
///
/// Operations whose monitor entry cannot be read are skipped. When none can
/// be read the result is a single INFO record.
pub async fn operation_statistics<S>(session: &mut S) -> Vec<ActivityRecord>
where
    S: DirectorySession + ?Sized,
{
    let mut records = Vec::new();

    for op in MONITORED_OPERATIONS {
        let dn = format!("cn={},{}", op, OPERATIONS_BASE);
        match session
            .search_all(&SearchQuery::base_object(dn.as_str(), &[OP_COMPLETED]))
            .await
        {
            Ok(entries) => {
                if let Some(entry) = entries.first() {
                    let completed = entry.first_value(OP_COMPLETED).unwrap_or("0");
                    records.push(ActivityRecord::statistic(op, completed));
                }
            }
            Err(e) => debug!("operation_statistics: {} unreadable: {}", dn, e),
        }
    }

    if records.is_empty() {
        records.push(ActivityRecord::monitor_disabled());
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, status: HealthStatus, csn: Option<&str>) -> NodeMetrics {
        NodeMetrics {
            node: name.to_string(),
            port: 389,
            status,
            entry_count: None,
            context_csn: csn.map(str::to_string),
            error: None,
        }
    }

    #[test]
    fn test_all_healthy_same_csn_is_in_sync() {
        let metrics = ClusterMetrics::summarize(
            "prod",
            vec![
                node("a", HealthStatus::Healthy, Some("20240101000000.000000Z#000000#000#000000")),
                node("b", HealthStatus::Healthy, Some("20240101000000.000000Z#000000#000#000000")),
            ],
        );
        assert_eq!(metrics.cluster_status, ClusterStatus::Healthy);
        assert!(metrics.in_sync);
    }

    #[test]
    fn test_differing_csns_are_out_of_sync() {
        let metrics = ClusterMetrics::summarize(
            "prod",
            vec![
                node("a", HealthStatus::Healthy, Some("csn-1")),
                node("b", HealthStatus::Healthy, Some("csn-2")),
            ],
        );
        assert!(!metrics.in_sync);
    }

    #[test]
    fn test_empty_csns_and_unhealthy_nodes() {
        let metrics = ClusterMetrics::summarize(
            "prod",
            vec![
                node("a", HealthStatus::Healthy, Some("csn-1")),
                node("b", HealthStatus::Healthy, Some("")),
                node("c", HealthStatus::Unhealthy, None),
            ],
        );
        assert!(metrics.in_sync);
        assert_eq!(metrics.cluster_status, ClusterStatus::Degraded);
    }

    #[test]
    fn test_health_serialization() {
        let json = serde_json::to_value(ClusterHealth::healthy("prod", 12, 40, "csn".to_string())).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["contextCSN"], "csn");
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(ClusterHealth::unhealthy("prod", "refused")).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error"], "refused");
        assert!(json.get("entry_count").is_none());
    }

    #[test]
    fn test_activity_records() {
        let record = ActivityRecord::statistic("Search", "42");
        assert_eq!(record.operation, "SEARCH");
        assert_eq!(record.dn, "Completed: 42");
        assert_eq!(record.client, "Statistics");

        let info = ActivityRecord::monitor_disabled();
        assert_eq!(info.operation, "INFO");
        assert_eq!(info.client, "System");
    }
}
