//! In-memory directory used by the integration tests.
//!
//! Filters are not evaluated: a subtree search returns every entry under the
//! base, a base-object search returns the entry itself. Like a real server
//! connection, searches never return the root DSE; it is only reachable
//! through `read_root_dse`. Paged cursors are the decimal offset of the next
//! entry.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ldap_manager::config::{ClusterConfig, ClusterRegistry, ConnectTarget, NodeAddress};
use ldap_manager::session::discover_base_dn;
use ldap_manager::{
    AttributeMap, AttributeValue, Connector, Credentials, CredentialCache, DirectoryEntry, DirectoryError,
    DirectoryService, DirectorySession, PageCursor, Result, SearchQuery, SearchScope, SecureString,
};

pub const BASE_DN: &str = "dc=example,dc=com";
pub const BIND_DN: &str = "cn=admin,dc=example,dc=com";
pub const PASSWORD: &str = "secret";

#[derive(Default)]
pub struct FakeState {
    pub entries: Vec<DirectoryEntry>,
    pub naming_contexts: Vec<String>,
    pub password: String,
    pub unreachable_hosts: HashSet<String>,
    pub fail_searches: bool,
    /// (host, password) of every successful bind
    pub binds: Vec<(String, String)>,
    pub opened: usize,
    pub closed: usize,
    pub modified: Vec<(String, AttributeMap)>,
}

#[derive(Clone)]
pub struct FakeDirectory {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        let state = FakeState {
            password: PASSWORD.to_string(),
            naming_contexts: vec![BASE_DN.to_string()],
            ..FakeState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// `count` people under `ou=people`, named `user00`, `user01`, ...
    pub fn with_people(count: usize) -> Self {
        let directory = Self::new();
        for i in 0..count {
            let uid = format!("user{:02}", i);
            directory.insert(DirectoryEntry::from_raw(
                format!("uid={},ou=people,{}", uid, BASE_DN),
                vec![
                    ("uid".to_string(), vec![uid.clone()]),
                    (
                        "objectClass".to_string(),
                        vec!["top".to_string(), "inetOrgPerson".to_string()],
                    ),
                ],
            ));
        }
        directory
    }

    pub fn insert(&self, entry: DirectoryEntry) {
        self.lock().entries.push(entry);
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            directory: self.clone(),
        }
    }
}

pub struct FakeConnector {
    pub directory: FakeDirectory,
}

pub struct FakeSession {
    directory: FakeDirectory,
    base_dn: String,
    open: bool,
}

fn under(dn: &str, base: &str) -> bool {
    let suffix = format!(",{}", base.to_ascii_lowercase());
    base.is_empty() || dn.eq_ignore_ascii_case(base) || dn.to_ascii_lowercase().ends_with(&suffix)
}

impl FakeSession {
    fn state(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        if !self.open {
            return Err(DirectoryError::ConnectionError("session closed".to_string()));
        }
        let state = self.directory.lock();
        if state.fail_searches {
            return Err(DirectoryError::QueryError("LDAP error code 80 (other): unavailable".to_string()));
        }
        Ok(state)
    }

    fn matching(&self, query: &SearchQuery) -> Result<Vec<DirectoryEntry>> {
        let state = self.state()?;

        if query.scope == SearchScope::BaseObject {
            return Ok(state
                .entries
                .iter()
                .filter(|e| e.dn.eq_ignore_ascii_case(&query.base_dn))
                .cloned()
                .collect());
        }

        Ok(state
            .entries
            .iter()
            .filter(|e| !e.dn.is_empty() && under(&e.dn, &query.base_dn))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DirectorySession for FakeSession {
    fn base_dn(&self) -> &str {
        &self.base_dn
    }

    async fn search_page(
        &mut self,
        query: &SearchQuery,
        page_size: u32,
        cursor: &PageCursor,
    ) -> Result<(Vec<DirectoryEntry>, PageCursor)> {
        let all = self.matching(query)?;
        let offset: usize = std::str::from_utf8(cursor.as_bytes())
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let end = (offset + page_size as usize).min(all.len());
        let page = all[offset.min(end)..end].to_vec();
        let next = if end < all.len() {
            PageCursor::from_bytes(end.to_string().into_bytes())
        } else {
            PageCursor::start()
        };
        Ok((page, next))
    }

    async fn search_all(&mut self, query: &SearchQuery) -> Result<Vec<DirectoryEntry>> {
        self.matching(query)
    }

    async fn read_root_dse(&mut self, _attributes: &[&str]) -> Result<Option<DirectoryEntry>> {
        let state = self.state()?;
        if state.naming_contexts.is_empty() {
            return Ok(None);
        }
        Ok(Some(DirectoryEntry::new(
            "",
            vec![(
                "namingContexts".to_string(),
                AttributeValue::Multi(state.naming_contexts.clone()),
            )],
        )))
    }

    async fn add(&mut self, dn: &str, attributes: &AttributeMap) -> Result<()> {
        let mut state = self.directory.lock();
        if state.entries.iter().any(|e| e.dn == dn) {
            return Err(DirectoryError::WriteError {
                code: 68,
                reason: "entryAlreadyExists".to_string(),
            });
        }
        state
            .entries
            .push(DirectoryEntry::new(dn, attributes.clone()));
        Ok(())
    }

    async fn modify(&mut self, dn: &str, changes: &AttributeMap) -> Result<()> {
        let mut state = self.directory.lock();
        let Some(entry) = state.entries.iter_mut().find(|e| e.dn == dn) else {
            return Err(DirectoryError::WriteError {
                code: 32,
                reason: "noSuchObject".to_string(),
            });
        };
        for (name, value) in changes {
            entry.attributes.insert(name.clone(), value.clone().normalized());
        }
        state.modified.push((dn.to_string(), changes.clone()));
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        let mut state = self.directory.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.dn != dn);
        if state.entries.len() == before {
            return Err(DirectoryError::WriteError {
                code: 32,
                reason: "noSuchObject".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.directory.lock().closed += 1;
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self, target: &ConnectTarget, credentials: &Credentials) -> Result<FakeSession> {
        {
            let mut state = self.directory.lock();
            if state.unreachable_hosts.contains(&target.host) {
                return Err(DirectoryError::ConnectionError(format!(
                    "I/O error: connection refused ({}:{})",
                    target.host, target.port
                )));
            }
            if credentials.password() != state.password {
                return Err(DirectoryError::ConnectionError(
                    "Invalid credentials: bad password".to_string(),
                ));
            }
            state
                .binds
                .push((target.host.clone(), credentials.password().to_string()));
            state.opened += 1;
        }

        let mut session = FakeSession {
            directory: self.directory.clone(),
            base_dn: target.base_dn.clone().unwrap_or_default(),
            open: true,
        };
        if target.base_dn.is_none() {
            session.base_dn = discover_base_dn(&mut session).await;
        }
        Ok(session)
    }
}

pub fn cluster(name: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        host: Some("ldap1.example.com".to_string()),
        port: Some(389),
        nodes: vec![],
        base_dn: Some(BASE_DN.to_string()),
        bind_dn: Some(BIND_DN.to_string()),
        readonly: false,
        description: String::new(),
    }
}

pub fn replicated(name: &str, hosts: &[&str]) -> ClusterConfig {
    ClusterConfig {
        host: None,
        port: None,
        nodes: hosts
            .iter()
            .map(|h| NodeAddress {
                host: h.to_string(),
                port: 389,
            })
            .collect(),
        ..cluster(name)
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub directory: FakeDirectory,
    pub service: DirectoryService<FakeConnector>,
}

impl Harness {
    pub fn new(directory: FakeDirectory, clusters: Vec<ClusterConfig>) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = CredentialCache::open(dir.path().join("credentials")).unwrap();
        let service = DirectoryService::new(ClusterRegistry::new(clusters), cache, directory.connector());
        Self {
            dir,
            directory,
            service,
        }
    }

    /// Harness with one writable cluster `prod` and its password cached.
    pub fn with_cached(directory: FakeDirectory) -> Self {
        let harness = Self::new(directory, vec![cluster("prod")]);
        harness.cache_password("prod", PASSWORD);
        harness
    }

    pub fn cache_password(&self, cluster: &str, password: &str) {
        self.service
            .cache()
            .save(cluster, BIND_DN, &SecureString::from(password))
            .unwrap();
    }
}
