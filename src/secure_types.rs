//! Secure Types Module
//!
//! Bind secrets held in memory are wrapped so they are zeroed on drop and
//! never appear in `Debug` or `Display` output (and therefore never in logs).

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secret string that is zeroed from memory when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Takes ownership of the string; no copy of it is left behind.
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Temporarily exposes the secret as a string slice.
    ///
    /// # Security
    /// The returned reference should be used immediately and not stored.
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Bind identity plus its secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    bind_dn: String,
    password: SecureString,
}

impl Credentials {
    pub fn new(bind_dn: impl Into<String>, password: SecureString) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            password,
        }
    }

    /// Returns the bind DN.
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Temporarily exposes the password.
    ///
    /// # Security
    /// Use this method only when needed for authentication.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bind_dn", &self.bind_dn)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(bind_dn: {}, password: [REDACTED])", self.bind_dn)
    }
}
