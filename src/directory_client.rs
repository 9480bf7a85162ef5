//! LDAP-backed directory sessions.
//!
//! A [`DirectoryConnection`] owns exactly one ldap3 connection for the
//! duration of one request. It is never pooled or shared; the service closes
//! it before returning.

use async_trait::async_trait;
use ldap3::{LdapConn, SearchEntry};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{ClientSettings, ConnectTarget};
use crate::entry::{AttributeMap, DirectoryEntry};
use crate::errors::{DirectoryError, Result};
use crate::ldap_helpers::{normalize_results, root_dse_entry};
use crate::ldap_timeout::{
    add_blocking, delete_blocking, ldap_bind_with_timeout, ldap_connect_with_timeout,
    ldap_unbind_with_timeout, modify_blocking, run_with_timeout, search_all_blocking,
    search_page_blocking,
};
use crate::ldap_utils::ldap_url;
use crate::secure_types::Credentials;
use crate::session::{discover_base_dn, Connector, DirectorySession, PageCursor, SearchQuery};

/// Opens [`DirectoryConnection`]s over plain `ldap://`.
#[derive(Debug, Clone, Default)]
pub struct LdapConnector {
    settings: ClientSettings,
}

impl LdapConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for LdapConnector {
    type Session = DirectoryConnection;

    async fn open(&self, target: &ConnectTarget, credentials: &Credentials) -> Result<DirectoryConnection> {
        let url = ldap_url(&target.host, target.port);
        info!("Connecting to LDAP server: {} (cluster: {})", url, target.cluster);

        let ldap = match ldap_connect_with_timeout(&url, self.settings.connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                error!("LDAP connection failed to {}: {}", url, e);
                return Err(e);
            }
        };

        let ldap = match ldap_bind_with_timeout(
            ldap,
            credentials.bind_dn(),
            credentials.password(),
            self.settings.connect_timeout,
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                error!("LDAP bind failed for {}: {}", credentials.bind_dn(), e);
                return Err(e);
            }
        };

        info!("Successfully connected and authenticated to {}", url);

        let mut session = DirectoryConnection {
            target: target.clone(),
            conn: Some(ldap),
            base_dn: target.base_dn.clone().unwrap_or_default(),
            operation_timeout: self.settings.operation_timeout,
        };

        if target.base_dn.is_none() {
            session.base_dn = discover_base_dn(&mut session).await;
            info!(
                "Discovered base DN for {}: '{}'",
                target.cluster, session.base_dn
            );
        }

        Ok(session)
    }
}

/// One bound connection to one directory server.
pub struct DirectoryConnection {
    target: ConnectTarget,
    conn: Option<LdapConn>,
    base_dn: String,
    operation_timeout: Duration,
}

impl DirectoryConnection {
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Runs one blocking operation, putting the connection back afterwards
    /// unless it was lost to a timeout.
    async fn run<T, F>(&mut self, label: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut LdapConn) -> Result<T> + Send + 'static,
    {
        let ldap = self.conn.take().ok_or_else(|| {
            DirectoryError::ConnectionError(format!(
                "{}: not connected to {}:{}",
                label, self.target.host, self.target.port
            ))
        })?;

        let (ldap, result) = run_with_timeout(ldap, self.operation_timeout, label, op).await;
        self.conn = ldap;
        result
    }

    /// A session that was never bound.
    #[cfg(test)]
    pub(crate) fn detached(target: ConnectTarget) -> Self {
        Self {
            base_dn: target.base_dn.clone().unwrap_or_default(),
            target,
            conn: None,
            operation_timeout: crate::config::DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// A connection still open here was never closed, e.g. the request future
/// was cancelled. ldap3's blocking connection owns a runtime that must not
/// be dropped on an async worker, so it is released on the blocking pool.
impl Drop for DirectoryConnection {
    fn drop(&mut self) {
        let Some(ldap) = self.conn.take() else {
            return;
        };
        warn!(
            "Connection to {}:{} dropped without close",
            self.target.host, self.target.port
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let mut ldap = ldap;
                    let _ = ldap.unbind();
                });
            }
            Err(_) => drop(ldap),
        }
    }
}

impl fmt::Debug for DirectoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConnection")
            .field("target", &self.target)
            .field("base_dn", &self.base_dn)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

#[async_trait]
impl DirectorySession for DirectoryConnection {
    fn base_dn(&self) -> &str {
        &self.base_dn
    }

    async fn search_page(
        &mut self,
        query: &SearchQuery,
        page_size: u32,
        cursor: &PageCursor,
    ) -> Result<(Vec<DirectoryEntry>, PageCursor)> {
        let query = query.clone();
        let cookie = cursor.as_bytes().to_vec();
        let (raw, next) = self
            .run("search_page", move |ldap| {
                search_page_blocking(ldap, &query, page_size, cookie)
            })
            .await?;
        Ok((normalize_results(raw), PageCursor::from_bytes(next)))
    }

    async fn search_all(&mut self, query: &SearchQuery) -> Result<Vec<DirectoryEntry>> {
        let query = query.clone();
        let raw = self
            .run("search_all", move |ldap| search_all_blocking(ldap, &query))
            .await?;
        Ok(normalize_results(raw))
    }

    async fn read_root_dse(&mut self, attributes: &[&str]) -> Result<Option<DirectoryEntry>> {
        let query = SearchQuery::base_object("", attributes);
        let raw = self
            .run("read_root_dse", move |ldap| search_all_blocking(ldap, &query))
            .await?;
        Ok(root_dse_entry(
            raw.into_iter().map(SearchEntry::construct).collect(),
        ))
    }

    async fn add(&mut self, dn: &str, attributes: &AttributeMap) -> Result<()> {
        info!("Adding entry {}", dn);
        let dn = dn.to_string();
        let attributes = attributes.clone();
        self.run("add", move |ldap| add_blocking(ldap, &dn, &attributes))
            .await
    }

    async fn modify(&mut self, dn: &str, changes: &AttributeMap) -> Result<()> {
        info!("Modifying entry {} ({} attribute(s))", dn, changes.len());
        let dn = dn.to_string();
        let changes = changes.clone();
        self.run("modify", move |ldap| modify_blocking(ldap, &dn, &changes))
            .await
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        info!("Deleting entry {}", dn);
        let dn = dn.to_string();
        self.run("delete", move |ldap| delete_blocking(ldap, &dn)).await
    }

    async fn close(&mut self) {
        if let Some(ldap) = self.conn.take() {
            ldap_unbind_with_timeout(ldap, self.operation_timeout).await;
            info!("Disconnected from {}:{}", self.target.host, self.target.port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AttributeValue;
    use crate::ldap_helpers::normalize_entry;
    use crate::secure_types::SecureString;
    use crate::session::discover_base_dn;
    use std::collections::HashMap;

    /// Serves raw ldap3 entries through the same conversions as
    /// `DirectoryConnection`.
    struct RawEntrySession {
        raw: Vec<SearchEntry>,
    }

    #[async_trait]
    impl DirectorySession for RawEntrySession {
        fn base_dn(&self) -> &str {
            ""
        }

        async fn search_page(
            &mut self,
            query: &SearchQuery,
            _page_size: u32,
            _cursor: &PageCursor,
        ) -> Result<(Vec<DirectoryEntry>, PageCursor)> {
            Ok((self.search_all(query).await?, PageCursor::start()))
        }

        async fn search_all(&mut self, _query: &SearchQuery) -> Result<Vec<DirectoryEntry>> {
            Ok(self.raw.iter().cloned().filter_map(normalize_entry).collect())
        }

        async fn read_root_dse(&mut self, _attributes: &[&str]) -> Result<Option<DirectoryEntry>> {
            Ok(root_dse_entry(self.raw.clone()))
        }

        async fn add(&mut self, _dn: &str, _attributes: &AttributeMap) -> Result<()> {
            Ok(())
        }

        async fn modify(&mut self, _dn: &str, _changes: &AttributeMap) -> Result<()> {
            Ok(())
        }

        async fn delete(&mut self, _dn: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn root_dse(naming_contexts: Vec<&str>) -> SearchEntry {
        let mut attrs = HashMap::new();
        attrs.insert(
            "namingContexts".to_string(),
            naming_contexts.into_iter().map(str::to_string).collect(),
        );
        SearchEntry {
            dn: String::new(),
            attrs,
            bin_attrs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_discovery_reads_root_dse_with_empty_dn() {
        let mut session = RawEntrySession {
            raw: vec![root_dse(vec!["dc=example,dc=com", "o=other"])],
        };
        // ordinary searches still drop the empty DN
        let query = SearchQuery::base_object("", &["namingContexts"]);
        assert!(session.search_all(&query).await.unwrap().is_empty());

        assert_eq!(discover_base_dn(&mut session).await, "dc=example,dc=com");
    }

    #[tokio::test]
    async fn test_discovery_without_naming_contexts_is_empty() {
        let mut session = RawEntrySession {
            raw: vec![root_dse(vec![])],
        };
        assert_eq!(discover_base_dn(&mut session).await, "");

        let root = session.read_root_dse(&["namingContexts"]).await.unwrap().unwrap();
        assert_eq!(root.attributes["namingContexts"], AttributeValue::Multi(vec![]));
    }

    #[tokio::test]
    async fn test_drop_of_unclosed_session_inside_runtime() {
        let session = DirectoryConnection::detached(target(389));
        drop(session);
    }

    fn target(port: u16) -> ConnectTarget {
        ConnectTarget {
            cluster: "local".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            bind_dn: "cn=admin,dc=example,dc=com".to_string(),
            base_dn: Some("dc=example,dc=com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let connector = LdapConnector::new(ClientSettings {
            connect_timeout: Duration::from_secs(5),
            ..ClientSettings::default()
        });
        let credentials = Credentials::new("cn=admin,dc=example,dc=com", SecureString::from("pw"));
        let result = connector.open(&target(1), &credentials).await;
        assert!(matches!(result, Err(DirectoryError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_close_never_bound_session_is_noop() {
        let mut session = DirectoryConnection::detached(target(389));
        assert!(!session.is_open());
        session.close().await;
        session.close().await;
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_operations_on_closed_session_fail() {
        let mut session = DirectoryConnection::detached(target(389));
        let query = SearchQuery::subtree("dc=example,dc=com", "(objectClass=*)");
        let err = session.search_all(&query).await.unwrap_err();
        assert!(err.is_connection());
        assert!(session.delete("cn=x,dc=example,dc=com").await.is_err());
    }

    #[tokio::test]
    async fn test_entry_count_on_closed_session_is_zero() {
        let mut session = DirectoryConnection::detached(target(389));
        assert_eq!(session.entry_count("dc=example,dc=com").await, 0);
    }

    #[test]
    fn test_detached_keeps_configured_base() {
        let session = DirectoryConnection::detached(target(389));
        assert_eq!(session.base_dn(), "dc=example,dc=com");
        assert!(format!("{:?}", session).contains("open: false"));
    }
}
