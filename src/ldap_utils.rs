//! LDAP Utilities
//!
//! RFC 4515 filter escaping, RFC 4511 result-code names and server URL
//! construction.

/// Escapes a string for safe use inside an LDAP search filter (RFC 4515).
///
/// The following characters are escaped:
/// - `*` (asterisk) -> `\2a`
/// - `(` (left parenthesis) -> `\28`
/// - `)` (right parenthesis) -> `\29`
/// - `\` (backslash) -> `\5c`
/// - `\0` (NUL) -> `\00`
///
/// # Examples
///
/// ```
/// use ldap_manager::ldap_utils::escape_ldap_filter;
///
/// let safe = escape_ldap_filter("admin*");
/// assert_eq!(safe, "admin\\2a");
/// ```
pub fn escape_ldap_filter(input: &str) -> String {
    input.chars().fold(String::with_capacity(input.len()), |mut acc, c| {
        match c {
            '*' => acc.push_str("\\2a"),
            '(' => acc.push_str("\\28"),
            ')' => acc.push_str("\\29"),
            '\\' => acc.push_str("\\5c"),
            '\0' => acc.push_str("\\00"),
            _ => acc.push(c),
        }
        acc
    })
}

/// Returns the RFC 4511 name of an LDAP result code.
pub fn result_code_name(rc: u32) -> &'static str {
    match rc {
        0 => "success",
        1 => "operationsError",
        2 => "protocolError",
        3 => "timeLimitExceeded",
        4 => "sizeLimitExceeded",
        7 => "authMethodNotSupported",
        8 => "strongerAuthRequired",
        10 => "referral",
        11 => "adminLimitExceeded",
        12 => "unavailableCriticalExtension",
        13 => "confidentialityRequired",
        16 => "noSuchAttribute",
        17 => "undefinedAttributeType",
        18 => "inappropriateMatching",
        19 => "constraintViolation",
        20 => "attributeOrValueExists",
        21 => "invalidAttributeSyntax",
        32 => "noSuchObject",
        34 => "invalidDNSyntax",
        48 => "inappropriateAuthentication",
        49 => "invalidCredentials",
        50 => "insufficientAccessRights",
        51 => "busy",
        52 => "unavailable",
        53 => "unwillingToPerform",
        54 => "loopDetect",
        64 => "namingViolation",
        65 => "objectClassViolation",
        66 => "notAllowedOnNonLeaf",
        67 => "notAllowedOnRDN",
        68 => "entryAlreadyExists",
        69 => "objectClassModsProhibited",
        71 => "affectsMultipleDSAs",
        80 => "other",
        _ => "unknown",
    }
}

/// Builds the plain-LDAP URL for a host and port. IPv6 literals are
/// bracketed.
pub(crate) fn ldap_url(host: &str, port: u16) -> String {
    let host = host.trim_start_matches("ldap://");
    if host.contains(':') && !host.starts_with('[') {
        format!("ldap://[{}]:{}", host, port)
    } else {
        format!("ldap://{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_ldap_filter_asterisk() {
        assert_eq!(escape_ldap_filter("admin*"), "admin\\2a");
        assert_eq!(escape_ldap_filter("*"), "\\2a");
    }

    #[test]
    fn test_escape_ldap_filter_parentheses() {
        assert_eq!(escape_ldap_filter("test(value)"), "test\\28value\\29");
    }

    #[test]
    fn test_escape_ldap_filter_backslash_and_null() {
        assert_eq!(escape_ldap_filter("path\\to"), "path\\5cto");
        assert_eq!(escape_ldap_filter("test\0value"), "test\\00value");
    }

    #[test]
    fn test_escape_ldap_filter_injection() {
        let malicious = "*)(objectClass=*))(|(objectClass=*";
        assert_eq!(
            escape_ldap_filter(malicious),
            "\\2a\\29\\28objectClass=\\2a\\29\\29\\28|\\28objectClass=\\2a"
        );
    }

    #[test]
    fn test_escape_ldap_filter_safe_input() {
        assert_eq!(escape_ldap_filter("alice"), "alice");
        assert_eq!(escape_ldap_filter("user@example.com"), "user@example.com");
    }

    #[test]
    fn test_result_code_names() {
        assert_eq!(result_code_name(32), "noSuchObject");
        assert_eq!(result_code_name(50), "insufficientAccessRights");
        assert_eq!(result_code_name(19), "constraintViolation");
        assert_eq!(result_code_name(4242), "unknown");
    }

    #[test]
    fn test_ldap_url() {
        assert_eq!(ldap_url("ldap1.example.com", 389), "ldap://ldap1.example.com:389");
        assert_eq!(ldap_url("ldap://10.0.0.5", 1389), "ldap://10.0.0.5:1389");
    }

    #[test]
    fn test_ldap_url_ipv6() {
        assert_eq!(ldap_url("::1", 389), "ldap://[::1]:389");
        assert_eq!(ldap_url("fd00::10", 1389), "ldap://[fd00::10]:1389");
        assert_eq!(ldap_url("[::1]", 389), "ldap://[::1]:389");
    }
}
