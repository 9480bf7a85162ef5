//! LDAP Helper Utilities
//!
//! Conversion of raw ldap3 search results into [`DirectoryEntry`] values.

use ldap3::{ResultEntry, SearchEntry};

use crate::entry::DirectoryEntry;

/// Renders bytes that are not valid UTF-8 as a byte literal, e.g. `b'\xff\x00'`.
///
/// Identical bytes always produce the identical string.
pub(crate) fn bytes_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 3);
    out.push_str("b'");
    for &b in bytes {
        out.extend(std::ascii::escape_default(b).map(char::from));
    }
    out.push('\'');
    out
}

/// Decodes one attribute value, falling back to [`bytes_literal`].
pub(crate) fn decode_value(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes_literal(bytes),
    }
}

/// Converts a constructed search entry, keeping whatever DN it has.
///
/// ldap3 moves a whole attribute into `bin_attrs` as soon as one of its
/// values is not UTF-8, so those are decoded again value by value.
pub(crate) fn convert_entry(entry: SearchEntry) -> DirectoryEntry {
    let text_attrs = entry.attrs.into_iter();
    let bin_attrs = entry.bin_attrs.into_iter().map(|(name, values)| {
        let decoded = values.iter().map(|v| decode_value(v)).collect();
        (name, decoded)
    });

    DirectoryEntry::from_raw(entry.dn, text_attrs.chain(bin_attrs))
}

/// Normalizes a constructed search entry.
///
/// Returns `None` for entries with an empty DN (continuation references).
pub(crate) fn normalize_entry(entry: SearchEntry) -> Option<DirectoryEntry> {
    if entry.dn.is_empty() {
        return None;
    }
    Some(convert_entry(entry))
}

/// The root DSE from the results of a base-object read of `""`.
pub(crate) fn root_dse_entry(entries: Vec<SearchEntry>) -> Option<DirectoryEntry> {
    entries
        .into_iter()
        .find(|entry| entry.dn.is_empty())
        .map(convert_entry)
}

/// Normalizes a batch of raw results, dropping continuation markers.
pub(crate) fn normalize_results(results: Vec<ResultEntry>) -> Vec<DirectoryEntry> {
    results
        .into_iter()
        .map(SearchEntry::construct)
        .filter_map(normalize_entry)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AttributeValue;
    use std::collections::HashMap;

    fn create_test_entry(dn: &str, attrs: Vec<(&str, Vec<&str>)>) -> SearchEntry {
        let mut attr_map = HashMap::new();
        for (key, values) in attrs {
            attr_map.insert(key.to_string(), values.into_iter().map(|s| s.to_string()).collect());
        }
        SearchEntry {
            dn: dn.to_string(),
            attrs: attr_map,
            bin_attrs: HashMap::new(),
        }
    }

    #[test]
    fn test_empty_dn_is_dropped() {
        let entry = create_test_entry("", vec![("ref", vec!["ldap://elsewhere"])]);
        assert!(normalize_entry(entry).is_none());
    }

    #[test]
    fn test_collapse_rule_on_search_path() {
        let entry = create_test_entry(
            "uid=alice,ou=people,dc=example,dc=com",
            vec![
                ("uid", vec!["alice"]),
                ("objectClass", vec!["top", "person", "inetOrgPerson"]),
            ],
        );
        let normalized = normalize_entry(entry).unwrap();
        assert_eq!(normalized.attributes["uid"], AttributeValue::Single("alice".to_string()));
        assert_eq!(
            normalized.attributes["objectClass"].values(),
            vec!["top", "person", "inetOrgPerson"]
        );
    }

    #[test]
    fn test_binary_values_use_stable_fallback() {
        let mut entry = create_test_entry("cn=blob,dc=example,dc=com", vec![]);
        entry
            .bin_attrs
            .insert("jpegPhoto".to_string(), vec![vec![0xff, 0xd8, b'A']]);
        entry.bin_attrs.insert(
            "userCertificate".to_string(),
            vec![vec![0x80], b"plain".to_vec()],
        );

        let normalized = normalize_entry(entry).unwrap();
        assert_eq!(normalized.first_value("jpegPhoto"), Some("b'\\xff\\xd8A'"));
        assert_eq!(
            normalized.attributes["userCertificate"].values(),
            vec!["b'\\x80'", "plain"]
        );
    }

    #[test]
    fn test_root_dse_keeps_empty_dn() {
        let root = create_test_entry("", vec![("namingContexts", vec!["dc=example,dc=com"])]);
        assert!(normalize_entry(root.clone()).is_none());

        let entry = root_dse_entry(vec![root]).unwrap();
        assert_eq!(entry.dn, "");
        assert_eq!(entry.first_value("namingContexts"), Some("dc=example,dc=com"));
        assert!(root_dse_entry(vec![]).is_none());
    }

    #[test]
    fn test_bytes_literal_is_deterministic() {
        let bytes = [0x00, b'\'', 0xfe];
        assert_eq!(bytes_literal(&bytes), bytes_literal(&bytes));
        assert_eq!(bytes_literal(&bytes), "b'\\x00\\'\\xfe'");
        assert_eq!(decode_value("héllo".as_bytes()), "héllo");
    }
}
