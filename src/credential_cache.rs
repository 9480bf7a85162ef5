//! Bind password cache.
//!
//! One JSON file per (cluster, bind DN) under an injected root directory,
//! named `sha256_hex("cluster:bind_dn").json` and holding
//! `{cluster, bind_dn, password_hash, password}`.
//!
//! The password is stored in clear text at rest. `password_hash` is kept for
//! integrity checks and debugging only; it is never used to authenticate.
//!
//! Every write produces a complete record in a temporary file first, so a
//! reader never observes a partially written entry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::errors::{DirectoryError, Result};
use crate::secure_types::SecureString;

/// Persisted cache record
#[derive(Clone, Serialize, Deserialize)]
pub struct CachedCredential {
    pub cluster: String,
    pub bind_dn: String,
    pub password_hash: String,
    pub password: String,
}

impl CachedCredential {
    fn new(cluster: &str, bind_dn: &str, secret: &SecureString) -> Self {
        Self {
            cluster: cluster.to_string(),
            bind_dn: bind_dn.to_string(),
            password_hash: sha256_hex(secret.expose_secret()),
            password: secret.expose_secret().to_string(),
        }
    }

    /// True when the stored hash still matches the stored password.
    pub fn is_consistent(&self) -> bool {
        sha256_hex(&self.password) == self.password_hash
    }
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("cluster", &self.cluster)
            .field("bind_dn", &self.bind_dn)
            .field("password_hash", &self.password_hash)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn sha256_hex(data: &str) -> String {
    format!("{:x}", Sha256::digest(data.as_bytes()))
}

/// Cache key for a cluster and bind identity.
pub fn cache_key(cluster: &str, bind_dn: &str) -> String {
    sha256_hex(&format!("{}:{}", cluster, bind_dn))
}

/// Handle on a cache directory
#[derive(Debug, Clone)]
pub struct CredentialCache {
    root: PathBuf,
}

impl CredentialCache {
    /// Opens (and creates if needed) the cache directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            DirectoryError::CacheError(format!(
                "Cannot create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;
        debug!("Credential cache at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, cluster: &str, bind_dn: &str) -> PathBuf {
        self.root.join(format!("{}.json", cache_key(cluster, bind_dn)))
    }

    /// Writes the full record to a uniquely named temporary file in the cache root.
    fn write_temp(&self, record: &CachedCredential) -> Result<PathBuf> {
        let tmp = self.root.join(format!(
            ".{}.{}.{}.tmp",
            cache_key(&record.cluster, &record.bind_dn),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let json = serde_json::to_vec(record)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(|e| io_error("create", &tmp, e))?;
        file.write_all(&json).map_err(|e| io_error("write", &tmp, e))?;
        file.sync_all().map_err(|e| io_error("sync", &tmp, e))?;

        Ok(tmp)
    }

    /// Stores the secret, replacing any existing record for the key.
    pub fn save(&self, cluster: &str, bind_dn: &str, secret: &SecureString) -> Result<()> {
        let record = CachedCredential::new(cluster, bind_dn, secret);
        let path = self.entry_path(cluster, bind_dn);
        let tmp = self.write_temp(&record)?;

        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_error("rename", &path, e));
        }

        info!("Cached bind password for {} on cluster {}", bind_dn, cluster);
        Ok(())
    }

    /// Stores the secret only if no record exists for the key yet.
    ///
    /// Returns `false` when another record was already present; that record
    /// is left untouched.
    pub fn save_if_absent(&self, cluster: &str, bind_dn: &str, secret: &SecureString) -> Result<bool> {
        let record = CachedCredential::new(cluster, bind_dn, secret);
        let path = self.entry_path(cluster, bind_dn);
        let tmp = self.write_temp(&record)?;

        // hard_link refuses to replace an existing file
        let linked = std::fs::hard_link(&tmp, &path);
        let _ = std::fs::remove_file(&tmp);

        match linked {
            Ok(()) => {
                info!("Cached bind password for {} on cluster {}", bind_dn, cluster);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Password for {} on cluster {} already cached", bind_dn, cluster);
                Ok(false)
            }
            Err(e) => Err(io_error("link", &path, e)),
        }
    }

    /// Reads the full record, if any.
    pub fn record(&self, cluster: &str, bind_dn: &str) -> Result<Option<CachedCredential>> {
        let path = self.entry_path(cluster, bind_dn);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &path, e)),
        };

        let record: CachedCredential = serde_json::from_slice(&content)?;
        if !record.is_consistent() {
            warn!(
                "Cached password hash mismatch for {} on cluster {}",
                record.bind_dn, record.cluster
            );
        }
        Ok(Some(record))
    }

    /// Returns the cached secret, if any.
    pub fn get(&self, cluster: &str, bind_dn: &str) -> Result<Option<SecureString>> {
        Ok(self
            .record(cluster, bind_dn)?
            .map(|record| SecureString::new(record.password.clone())))
    }

    pub fn contains(&self, cluster: &str, bind_dn: &str) -> bool {
        self.entry_path(cluster, bind_dn).is_file()
    }

    /// Removes the cached secret; no-op when nothing is cached.
    pub fn clear(&self, cluster: &str, bind_dn: &str) -> Result<()> {
        let path = self.entry_path(cluster, bind_dn);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Cleared cached password for {} on cluster {}", bind_dn, cluster);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> DirectoryError {
    DirectoryError::CacheError(format!("Failed to {} {}: {}", action, path.display(), err))
}
