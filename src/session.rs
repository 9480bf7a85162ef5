//! Directory session abstraction.
//!
//! [`DirectorySession`] is one bound connection to one server. Implementors
//! provide the protocol primitives (one paged round trip, one unpaginated
//! search, the three writes, unbind); the combined `search`, `entry_count`
//! and base DN discovery are built on top of them here so every backend
//! follows the same rules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::ConnectTarget;
use crate::entry::{AttributeMap, DirectoryEntry};
use crate::errors::Result;
use crate::secure_types::Credentials;

/// Filter matching every entry
pub const MATCH_ALL_FILTER: &str = "(objectClass=*)";

/// Root DSE attribute advertising the server's base DNs
pub const NAMING_CONTEXTS: &str = "namingContexts";

/// Search breadth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchScope {
    /// The base entry only
    BaseObject,
    /// Immediate children of the base entry
    SingleLevel,
    /// The base entry and all descendants
    #[default]
    Subtree,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::BaseObject => "base-object",
            SearchScope::SingleLevel => "single-level",
            SearchScope::Subtree => "subtree",
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base-object" | "base" => Ok(SearchScope::BaseObject),
            "single-level" | "one" | "onelevel" => Ok(SearchScope::SingleLevel),
            "subtree" | "sub" => Ok(SearchScope::Subtree),
            other => Err(format!(
                "unknown scope '{}', expected base-object, single-level or subtree",
                other
            )),
        }
    }
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::BaseObject => ldap3::Scope::Base,
            SearchScope::SingleLevel => ldap3::Scope::OneLevel,
            SearchScope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

/// Where and what to search. An empty attribute list requests all user attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchQuery {
    pub fn new(base_dn: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
        }
    }

    pub fn subtree(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self::new(base_dn, SearchScope::Subtree, filter)
    }

    /// Base-object read of a single entry.
    pub fn base_object(dn: impl Into<String>, attributes: &[&str]) -> Self {
        Self::new(dn, SearchScope::BaseObject, MATCH_ALL_FILTER).with_attributes(attributes)
    }

    pub fn with_attributes<S: AsRef<str>>(mut self, attributes: &[S]) -> Self {
        self.attributes = attributes.iter().map(|a| a.as_ref().to_string()).collect();
        self
    }

    /// Same base, scope and filter, requesting only the DN.
    pub fn dn_only(&self) -> Self {
        Self {
            attributes: vec!["dn".to_string()],
            ..self.clone()
        }
    }
}

/// Opaque continuation token produced by the server.
///
/// Only valid for continuing the query that produced it (same base DN and
/// filter). Emptiness is not used as the has-more signal; see
/// [`SearchOutcome::has_more`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PageCursor(Vec<u8>);

impl PageCursor {
    /// The cursor that starts a paged search.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageCursor({} bytes)", self.0.len())
    }
}

/// Result of one protocol search
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub entries: Vec<DirectoryEntry>,
    pub next_cursor: PageCursor,
    /// Whether the server reported further pages
    pub has_more: bool,
    /// Size of the full result set; `None` on continuation pages where it is not recomputed
    pub total: Option<usize>,
}

/// One bound connection to one directory server.
#[async_trait]
pub trait DirectorySession: Send {
    /// Base DN in effect: configured, discovered, or empty.
    fn base_dn(&self) -> &str;

    /// One paged-results round trip starting at `cursor`.
    /// Returns the page and the server's continuation cursor.
    async fn search_page(
        &mut self,
        query: &SearchQuery,
        page_size: u32,
        cursor: &PageCursor,
    ) -> Result<(Vec<DirectoryEntry>, PageCursor)>;

    /// Unpaginated search returning every match. Entries with an empty DN
    /// are dropped.
    async fn search_all(&mut self, query: &SearchQuery) -> Result<Vec<DirectoryEntry>>;

    /// Base-object read of the root DSE (`""`), whose DN is empty and so
    /// never comes back from [`search_all`](Self::search_all).
    async fn read_root_dse(&mut self, attributes: &[&str]) -> Result<Option<DirectoryEntry>>;

    async fn add(&mut self, dn: &str, attributes: &AttributeMap) -> Result<()>;

    /// Replaces each named attribute with the given values.
    async fn modify(&mut self, dn: &str, changes: &AttributeMap) -> Result<()>;

    async fn delete(&mut self, dn: &str) -> Result<()>;

    /// Releases the connection. Never fails; closing twice is a no-op.
    async fn close(&mut self);

    /// Paginated (`page_size > 0`) or unpaginated (`page_size == 0`) search.
    ///
    /// On a paged search from the start cursor the total is taken from a
    /// second, DN-only unpaginated search; continuation pages leave it `None`.
    async fn search(
        &mut self,
        query: &SearchQuery,
        page_size: u32,
        cursor: &PageCursor,
    ) -> Result<SearchOutcome> {
        if page_size == 0 {
            let entries = self.search_all(query).await?;
            let total = entries.len();
            return Ok(SearchOutcome {
                entries,
                next_cursor: PageCursor::start(),
                has_more: false,
                total: Some(total),
            });
        }

        let (entries, next_cursor) = self.search_page(query, page_size, cursor).await?;
        let total = if cursor.is_empty() {
            Some(self.count_matches(query).await?)
        } else {
            None
        };

        Ok(SearchOutcome {
            has_more: !next_cursor.is_empty(),
            entries,
            next_cursor,
            total,
        })
    }

    /// Number of entries matching the query, fetched DN-only.
    async fn count_matches(&mut self, query: &SearchQuery) -> Result<usize> {
        Ok(self.search_all(&query.dn_only()).await?.len())
    }

    /// Number of entries in the subtree under `base_dn`; 0 on any error.
    async fn entry_count(&mut self, base_dn: &str) -> usize {
        match self
            .count_matches(&SearchQuery::subtree(base_dn, MATCH_ALL_FILTER))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!("entry_count: count under '{}' failed, reporting 0: {}", base_dn, e);
                0
            }
        }
    }

    /// First value of `attribute` on the entry `dn`, if readable.
    async fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Option<String>> {
        let entries = self
            .search_all(&SearchQuery::base_object(dn, &[attribute]))
            .await?;
        Ok(entries
            .first()
            .and_then(|entry| entry.first_value(attribute))
            .map(str::to_string))
    }
}

/// Opens bound sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: DirectorySession;

    /// Connects and binds. When the target carries no base DN the returned
    /// session has already run discovery.
    async fn open(&self, target: &ConnectTarget, credentials: &Credentials) -> Result<Self::Session>;
}

/// Reads the first `namingContexts` value of the root DSE.
///
/// Returns the empty string when the read fails or the attribute is absent;
/// callers must then scope every operation explicitly.
pub async fn discover_base_dn<S>(session: &mut S) -> String
where
    S: DirectorySession + ?Sized,
{
    match session.read_root_dse(&[NAMING_CONTEXTS]).await {
        Ok(root) => {
            let found = root
                .as_ref()
                .and_then(|entry| entry.first_value(NAMING_CONTEXTS))
                .unwrap_or_default()
                .to_string();
            if found.is_empty() {
                warn!("discover_base_dn: root DSE advertises no {}", NAMING_CONTEXTS);
            } else {
                debug!("discover_base_dn: using '{}'", found);
            }
            found
        }
        Err(e) => {
            warn!("discover_base_dn: root DSE read failed: {}", e);
            String::new()
        }
    }
}
