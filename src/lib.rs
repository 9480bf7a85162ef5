//! Multi-cluster LDAP directory client.
//!
//! Browse, search and edit entries across configured clusters with paged
//! results, base DN discovery and a per-cluster bind password cache.

pub mod config;
pub mod credential_cache;
pub mod directory_client;
pub mod entry;
pub mod errors;
pub mod ldap_utils;
pub mod monitoring;
pub mod pagination;
pub mod query;
pub mod secure_types;
pub mod service;
pub mod session;

mod ldap_helpers;
mod ldap_timeout;

pub use config::{ClientSettings, ClusterConfig, ClusterRegistry, ConnectTarget, NodeAddress};
pub use credential_cache::CredentialCache;
pub use directory_client::{DirectoryConnection, LdapConnector};
pub use entry::{AttributeMap, AttributeValue, DirectoryEntry};
pub use errors::{DirectoryError, Result};
pub use pagination::{Page, PageRequest};
pub use query::EntityType;
pub use secure_types::{Credentials, SecureString};
pub use service::DirectoryService;
pub use session::{Connector, DirectorySession, PageCursor, SearchOutcome, SearchQuery, SearchScope};
