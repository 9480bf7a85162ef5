//! Error handling module
//!
//! Structured error types for directory operations. Discovery and count
//! failures never surface here; they degrade to an empty base DN and a zero
//! count at the call site.

use thiserror::Error;

use crate::ldap_utils::result_code_name;

/// Main error type for directory operations
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Unknown cluster, missing bind identity, missing secret, read-only target
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport, bind or timeout failure
    #[error("LDAP connection failed: {0}")]
    ConnectionError(String),

    /// Search rejected by the server
    #[error("LDAP query failed: {0}")]
    QueryError(String),

    /// Add, modify or delete rejected by the server
    #[error("LDAP write rejected ({}): {reason}", code_name(.code))]
    WriteError { code: u32, reason: String },

    /// Input validation error
    #[error("Invalid input: {0}")]
    ValidationError(String),

    /// Credential cache storage error
    #[error("Credential cache error: {0}")]
    CacheError(String),
}

impl DirectoryError {
    /// Builds a write rejection from an ldap3 error, keeping the server's
    /// result code and diagnostic text.
    pub(crate) fn write_rejected(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => DirectoryError::WriteError {
                code: result.rc,
                reason: if result.text.is_empty() {
                    result_code_name(result.rc).to_string()
                } else {
                    result.text
                },
            },
            other => other.into(),
        }
    }

    /// True for failures of the transport or bind rather than the request.
    pub fn is_connection(&self) -> bool {
        matches!(self, DirectoryError::ConnectionError(_))
    }
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => {
                match result.rc {
                    // 49 = Invalid credentials
                    49 => DirectoryError::ConnectionError(format!(
                        "Invalid credentials: {}",
                        result.text
                    )),
                    // 51 = Busy, 52 = Unavailable
                    51 | 52 => DirectoryError::ConnectionError(format!(
                        "Server {}: {}",
                        result_code_name(result.rc),
                        result.text
                    )),
                    _ => DirectoryError::QueryError(format!(
                        "LDAP error code {} ({}): {}",
                        result.rc,
                        result_code_name(result.rc),
                        result.text
                    )),
                }
            }
            // Connection-related errors
            ldap3::LdapError::EndOfStream => {
                DirectoryError::ConnectionError("Connection closed unexpectedly".to_string())
            }
            ldap3::LdapError::Io { source } => {
                DirectoryError::ConnectionError(format!("I/O error: {}", source))
            }
            ldap3::LdapError::Timeout { elapsed } => DirectoryError::ConnectionError(format!(
                "LDAP operation timed out after {:?}",
                elapsed
            )),
            // Generic fallback
            _ => DirectoryError::QueryError(format!("LDAP error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        DirectoryError::CacheError(format!("JSON parse error: {}", err))
    }
}

fn code_name(code: &u32) -> &'static str {
    result_code_name(*code)
}

/// Result type alias for directory operations
pub type Result<T> = std::result::Result<T, DirectoryError>;
