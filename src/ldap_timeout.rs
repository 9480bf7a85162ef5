//! Timeout wrappers for synchronous LDAP operations
//!
//! The ldap3 crate's `LdapConn` is blocking and can hang indefinitely if the
//! server stops answering. Every call here runs on tokio's blocking pool
//! under an explicit timeout; expiry is reported as a connection error.
//!
//! Operations take the connection by value and hand it back next to the
//! result, so a rejected request does not cost the connection. Only a
//! timeout or a panicked task loses it.

use ldap3::controls::{ControlParser, PagedResults, RawControl};
use ldap3::{LdapConn, LdapConnSettings, Mod, ResultEntry};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::entry::AttributeMap;
use crate::errors::{DirectoryError, Result};
use crate::session::SearchQuery;

/// Simple Paged Results control (RFC 2696)
const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Opens a plain LDAP connection with a timeout.
pub(crate) async fn ldap_connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<LdapConn> {
    let url = url.to_string();

    let result = timeout(connect_timeout, async {
        tokio::task::spawn_blocking(move || {
            let settings = LdapConnSettings::new().set_conn_timeout(connect_timeout);
            LdapConn::with_settings(settings, &url)
        })
        .await
        .map_err(|e| DirectoryError::ConnectionError(format!("Task join error: {}", e)))?
        .map_err(DirectoryError::from)
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(DirectoryError::ConnectionError(format!(
            "Connection timeout: Server did not respond within {} seconds",
            connect_timeout.as_secs()
        ))),
    }
}

/// Performs a simple bind with a timeout, returning the bound connection.
pub(crate) async fn ldap_bind_with_timeout(
    ldap: LdapConn,
    bind_dn: &str,
    password: &str,
    bind_timeout: Duration,
) -> Result<LdapConn> {
    let bind_dn = bind_dn.to_string();
    let password = zeroize::Zeroizing::new(password.to_string());

    let result = timeout(bind_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.simple_bind(&bind_dn, &password)?.success()?;
            Ok::<LdapConn, ldap3::LdapError>(ldap)
        })
        .await
        .map_err(|e| DirectoryError::ConnectionError(format!("Task join error: {}", e)))?
        .map_err(|e| match DirectoryError::from(e) {
            DirectoryError::QueryError(msg) => DirectoryError::ConnectionError(msg),
            other => other,
        })
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(DirectoryError::ConnectionError(format!(
            "Authentication timeout: Bind did not complete within {} seconds",
            bind_timeout.as_secs()
        ))),
    }
}

/// Unbinds with a timeout. Failures are logged, never returned.
pub(crate) async fn ldap_unbind_with_timeout(ldap: LdapConn, unbind_timeout: Duration) {
    let result = timeout(
        unbind_timeout,
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.unbind()
        }),
    )
    .await;

    match result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Unbind failed: {}", e),
        Ok(Err(e)) => warn!("Unbind task error: {}", e),
        // connection is dropped either way
        Err(_) => warn!("Unbind timed out (connection will be dropped)"),
    }
}

/// Runs one blocking operation on the connection under a timeout.
///
/// Returns the connection (unless it was lost to a timeout or a panic)
/// together with the operation's result.
pub(crate) async fn run_with_timeout<T, F>(
    ldap: LdapConn,
    op_timeout: Duration,
    label: &'static str,
    op: F,
) -> (Option<LdapConn>, Result<T>)
where
    T: Send + 'static,
    F: FnOnce(&mut LdapConn) -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let mut ldap = ldap;
        let result = op(&mut ldap);
        (ldap, result)
    });

    match timeout(op_timeout, task).await {
        Ok(Ok((ldap, result))) => (Some(ldap), result),
        Ok(Err(e)) => {
            error!("{}: task join error: {}", label, e);
            (
                None,
                Err(DirectoryError::ConnectionError(format!("Task join error: {}", e))),
            )
        }
        Err(_) => {
            error!("{}: timed out after {}s", label, op_timeout.as_secs());
            (
                None,
                Err(DirectoryError::ConnectionError(format!(
                    "{}: operation did not complete within {} seconds",
                    label,
                    op_timeout.as_secs()
                ))),
            )
        }
    }
}

fn attr_refs(query: &SearchQuery) -> Vec<&str> {
    query.attributes.iter().map(String::as_str).collect()
}

/// Unpaginated search. sizeLimitExceeded (rc=4) returns the partial results.
pub(crate) fn search_all_blocking(ldap: &mut LdapConn, query: &SearchQuery) -> Result<Vec<ResultEntry>> {
    info!(
        "search_all: {} ({}) filter {}",
        query.base_dn, query.scope, query.filter
    );

    let search_result = ldap.search(
        &query.base_dn,
        query.scope.into(),
        &query.filter,
        attr_refs(query),
    )?;

    // SearchResult is a tuple struct: (Vec<ResultEntry>, LdapResult)
    let entries = search_result.0;
    let ldap_result = search_result.1;

    match ldap_result.rc {
        0 => {
            info!("search_all: returned {} entries", entries.len());
            Ok(entries)
        }
        4 => {
            warn!(
                "search_all: size limit exceeded (rc=4), returning {} partial entries",
                entries.len()
            );
            Ok(entries)
        }
        _ => {
            error!(
                "search_all: failed with rc={}: {}",
                ldap_result.rc, ldap_result.text
            );
            Err(ldap3::LdapError::LdapResult { result: ldap_result }.into())
        }
    }
}

/// One paged-results round trip. Returns the page and the server's cookie
/// (empty when the server reports no further pages or ignored the control).
pub(crate) fn search_page_blocking(
    ldap: &mut LdapConn,
    query: &SearchQuery,
    page_size: u32,
    cookie: Vec<u8>,
) -> Result<(Vec<ResultEntry>, Vec<u8>)> {
    info!(
        "search_page: {} ({}) filter {} (page_size: {}, continuing: {})",
        query.base_dn,
        query.scope,
        query.filter,
        page_size,
        !cookie.is_empty()
    );

    let control: RawControl = PagedResults {
        size: i32::try_from(page_size).unwrap_or(i32::MAX),
        cookie,
    }
    .into();

    let search_result = ldap.with_controls(vec![control]).search(
        &query.base_dn,
        query.scope.into(),
        &query.filter,
        attr_refs(query),
    )?;

    let entries = search_result.0;
    let ldap_result = search_result.1;

    if ldap_result.rc != 0 && ldap_result.rc != 4 {
        error!(
            "search_page: failed with rc={}: {}",
            ldap_result.rc, ldap_result.text
        );
        return Err(ldap3::LdapError::LdapResult { result: ldap_result }.into());
    }

    // Control is a tuple struct where .1 is RawControl
    let mut next_cookie = Vec::new();
    for ctrl in &ldap_result.ctrls {
        let raw_ctrl = &ctrl.1;
        if raw_ctrl.ctype == PAGED_RESULTS_OID {
            if let Some(ref val) = raw_ctrl.val {
                let pr: PagedResults = PagedResults::parse(val);
                next_cookie = pr.cookie;
            }
            break;
        }
    }

    info!(
        "search_page: returned {} entries (more pages: {})",
        entries.len(),
        !next_cookie.is_empty()
    );
    Ok((entries, next_cookie))
}

fn value_set(values: Vec<&str>) -> HashSet<&str> {
    values.into_iter().collect()
}

pub(crate) fn add_blocking(ldap: &mut LdapConn, dn: &str, attributes: &AttributeMap) -> Result<()> {
    let attrs: Vec<(&str, HashSet<&str>)> = attributes
        .iter()
        .map(|(name, value)| (name.as_str(), value_set(value.values())))
        .filter(|(_, values)| !values.is_empty())
        .collect();

    ldap.add(dn, attrs)
        .and_then(|result| result.success())
        .map_err(DirectoryError::write_rejected)?;
    Ok(())
}

pub(crate) fn modify_blocking(ldap: &mut LdapConn, dn: &str, changes: &AttributeMap) -> Result<()> {
    let mods: Vec<Mod<&str>> = changes
        .iter()
        .map(|(name, value)| Mod::Replace(name.as_str(), value_set(value.values())))
        .collect();

    ldap.modify(dn, mods)
        .and_then(|result| result.success())
        .map_err(DirectoryError::write_rejected)?;
    Ok(())
}

pub(crate) fn delete_blocking(ldap: &mut LdapConn, dn: &str) -> Result<()> {
    ldap.delete(dn)
        .and_then(|result| result.success())
        .map_err(DirectoryError::write_rejected)?;
    Ok(())
}
