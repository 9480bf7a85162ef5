//! Filter composition for the browse view.
//!
//! Two independent facets: the entity type and a free-text term. When the
//! entity type is the match-all default the text filter stands alone;
//! otherwise both are ANDed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ldap_utils::escape_ldap_filter;
use crate::session::MATCH_ALL_FILTER;

/// Attributes searched by the free-text facet, in filter order
pub const TEXT_SEARCH_ATTRIBUTES: [&str; 4] = ["uid", "cn", "mail", "sn"];

/// Entity-type facet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    #[default]
    All,
    Users,
    Groups,
    OrganizationalUnits,
}

impl EntityType {
    /// Parses a facet name; anything unrecognized means [`EntityType::All`].
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
            Some("users") => EntityType::Users,
            Some("groups") => EntityType::Groups,
            Some("ous") | Some("organizational-units") => EntityType::OrganizationalUnits,
            _ => EntityType::All,
        }
    }

    /// The object-class filter for this facet.
    pub fn filter(&self) -> &'static str {
        match self {
            EntityType::All => MATCH_ALL_FILTER,
            EntityType::Users => {
                "(|(objectClass=inetOrgPerson)(objectClass=posixAccount)(objectClass=account))"
            }
            EntityType::Groups => {
                "(|(objectClass=groupOfNames)(objectClass=groupOfUniqueNames)(objectClass=posixGroup))"
            }
            EntityType::OrganizationalUnits => "(objectClass=organizationalUnit)",
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, EntityType::All)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::All => "all",
            EntityType::Users => "users",
            EntityType::Groups => "groups",
            EntityType::OrganizationalUnits => "ous",
        };
        f.write_str(name)
    }
}

/// `(|(uid=*t*)(cn=*t*)(mail=*t*)(sn=*t*))` with `t` escaped.
pub fn text_filter(term: &str) -> String {
    let escaped = escape_ldap_filter(term);
    let clauses: String = TEXT_SEARCH_ATTRIBUTES
        .iter()
        .map(|attr| format!("({}=*{}*)", attr, escaped))
        .collect();
    format!("(|{})", clauses)
}

/// Combines both facets into one filter.
///
/// A term made only of whitespace counts as absent; any other term is used
/// as given, surrounding whitespace included.
pub fn compose_filter(entity: EntityType, search: Option<&str>) -> String {
    let base = entity.filter();
    match search.filter(|term| !term.trim().is_empty()) {
        None => base.to_string(),
        Some(term) if entity.is_match_all() => text_filter(term),
        Some(term) => format!("(&{}{})", base, text_filter(term)),
    }
}
