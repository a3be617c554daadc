//! Domain types for principals as the account-level SCIM endpoint sees them.
//!
//! The three principal kinds share one reconciliation algorithm; everything
//! that differs between them (human-name attribute, compared fields, SCIM
//! collection, cache file) lives in the [`KindSpec`] table reachable through
//! [`PrincipalKind::spec`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Principal kinds
// ---------------------------------------------------------------------------

/// Kind of security principal managed by the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    ServicePrincipal,
    Group,
}

/// Per-kind configuration consulted by the reconciliation engine.
#[derive(Debug, PartialEq, Eq)]
pub struct KindSpec {
    /// SCIM attribute carrying the human-readable unique name.
    pub key_attribute: &'static str,
    /// Attributes compared between desired and actual state.
    pub compare_fields: &'static [&'static str],
    /// Collection segment under `/scim/v2/`.
    pub endpoint: &'static str,
    /// Name of the persisted name-to-id cache document.
    pub cache_file: &'static str,
    /// SCIM core schema URN sent on create.
    pub schema: &'static str,
}

const USER_SPEC: KindSpec = KindSpec {
    key_attribute: "userName",
    compare_fields: &["displayName", "active"],
    endpoint: "Users",
    cache_file: "cache_user.json",
    schema: "urn:ietf:params:scim:schemas:core:2.0:User",
};

const SERVICE_PRINCIPAL_SPEC: KindSpec = KindSpec {
    key_attribute: "applicationId",
    compare_fields: &["displayName", "active"],
    endpoint: "ServicePrincipals",
    cache_file: "cache_spn.json",
    schema: "urn:ietf:params:scim:schemas:core:2.0:ServicePrincipal",
};

const GROUP_SPEC: KindSpec = KindSpec {
    key_attribute: "displayName",
    compare_fields: &["displayName"],
    endpoint: "Groups",
    cache_file: "cache_group.json",
    schema: "urn:ietf:params:scim:schemas:core:2.0:Group",
};

impl PrincipalKind {
    /// All kinds in reconciliation order: groups last so member ids exist.
    pub const ALL: [PrincipalKind; 3] = [
        PrincipalKind::User,
        PrincipalKind::ServicePrincipal,
        PrincipalKind::Group,
    ];

    pub fn spec(self) -> &'static KindSpec {
        match self {
            PrincipalKind::User => &USER_SPEC,
            PrincipalKind::ServicePrincipal => &SERVICE_PRINCIPAL_SPEC,
            PrincipalKind::Group => &GROUP_SPEC,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::ServicePrincipal => "service_principal",
            PrincipalKind::Group => "group",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(PrincipalKind::User),
            "group" | "groups" => Ok(PrincipalKind::Group),
            "spn" | "service_principal" | "service-principal" | "serviceprincipal" => {
                Ok(PrincipalKind::ServicePrincipal)
            }
            other => Err(format!(
                "unknown principal kind '{other}' (expected user, group or spn)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Target-side records
// ---------------------------------------------------------------------------

/// Reference to a member inside a SCIM group (`{"value": id, "display": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetServicePrincipal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub application_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub members: Vec<MemberRef>,
}

/// A principal record in target (SCIM) shape, desired or actual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetPrincipal {
    User(TargetUser),
    ServicePrincipal(TargetServicePrincipal),
    Group(TargetGroup),
}

impl TargetPrincipal {
    /// Decode a SCIM resource body returned for `kind`.
    pub fn from_resource(kind: PrincipalKind, resource: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            PrincipalKind::User => TargetPrincipal::User(serde_json::from_value(resource)?),
            PrincipalKind::ServicePrincipal => {
                TargetPrincipal::ServicePrincipal(serde_json::from_value(resource)?)
            }
            PrincipalKind::Group => TargetPrincipal::Group(serde_json::from_value(resource)?),
        })
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            TargetPrincipal::User(_) => PrincipalKind::User,
            TargetPrincipal::ServicePrincipal(_) => PrincipalKind::ServicePrincipal,
            TargetPrincipal::Group(_) => PrincipalKind::Group,
        }
    }

    /// The unique human-readable name (`userName`, `applicationId` or `displayName`).
    pub fn human_name(&self) -> &str {
        match self {
            TargetPrincipal::User(u) => &u.user_name,
            TargetPrincipal::ServicePrincipal(s) => &s.application_id,
            TargetPrincipal::Group(g) => &g.display_name,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            TargetPrincipal::User(u) => u.id.as_deref(),
            TargetPrincipal::ServicePrincipal(s) => s.id.as_deref(),
            TargetPrincipal::Group(g) => g.id.as_deref(),
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            TargetPrincipal::User(u) => u.external_id.as_deref(),
            TargetPrincipal::ServicePrincipal(s) => s.external_id.as_deref(),
            TargetPrincipal::Group(g) => g.external_id.as_deref(),
        }
    }

    pub fn members(&self) -> &[MemberRef] {
        match self {
            TargetPrincipal::Group(g) => &g.members,
            _ => &[],
        }
    }

    /// Copy used for creation: groups are created empty and filled later.
    pub fn without_members(&self) -> TargetPrincipal {
        match self {
            TargetPrincipal::Group(g) => TargetPrincipal::Group(TargetGroup {
                members: Vec::new(),
                ..g.clone()
            }),
            other => other.clone(),
        }
    }

    /// The record as a flat SCIM attribute object (no `kind` tag).
    pub fn attributes(&self) -> serde_json::Result<Map<String, Value>> {
        let value = match self {
            TargetPrincipal::User(u) => serde_json::to_value(u)?,
            TargetPrincipal::ServicePrincipal(s) => serde_json::to_value(s)?,
            TargetPrincipal::Group(g) => serde_json::to_value(g)?,
        };
        Ok(match value {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(PrincipalKind::User, "userName", "Users", "cache_user.json")]
    #[case(PrincipalKind::Group, "displayName", "Groups", "cache_group.json")]
    #[case(
        PrincipalKind::ServicePrincipal,
        "applicationId",
        "ServicePrincipals",
        "cache_spn.json"
    )]
    fn kind_table_entries(
        #[case] kind: PrincipalKind,
        #[case] key: &str,
        #[case] endpoint: &str,
        #[case] cache_file: &str,
    ) {
        let spec = kind.spec();
        assert_eq!(spec.key_attribute, key);
        assert_eq!(spec.endpoint, endpoint);
        assert_eq!(spec.cache_file, cache_file);
    }

    #[rstest]
    #[case("user", PrincipalKind::User)]
    #[case("Groups", PrincipalKind::Group)]
    #[case("spn", PrincipalKind::ServicePrincipal)]
    #[case("service-principal", PrincipalKind::ServicePrincipal)]
    fn kind_parses_cli_spellings(#[case] input: &str, #[case] expected: PrincipalKind) {
        assert_eq!(input.parse::<PrincipalKind>().unwrap(), expected);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("robot".parse::<PrincipalKind>().is_err());
    }

    #[test]
    fn user_resource_decodes_camel_case_and_ignores_extra_fields() {
        let resource = json!({
            "id": "123",
            "userName": "ada@example.com",
            "displayName": "Ada",
            "active": true,
            "externalId": "aad-1",
            "emails": [{"value": "ada@example.com"}],
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"]
        });
        let principal = TargetPrincipal::from_resource(PrincipalKind::User, resource).unwrap();
        assert_eq!(principal.kind(), PrincipalKind::User);
        assert_eq!(principal.human_name(), "ada@example.com");
        assert_eq!(principal.id(), Some("123"));
        assert_eq!(principal.external_id(), Some("aad-1"));
    }

    #[test]
    fn group_without_members_field_decodes_empty() {
        let principal = TargetPrincipal::from_resource(
            PrincipalKind::Group,
            json!({"id": "g1", "displayName": "admins"}),
        )
        .unwrap();
        assert!(principal.members().is_empty());
    }

    #[test]
    fn without_members_clears_group_members_only() {
        let group = TargetPrincipal::Group(TargetGroup {
            id: None,
            external_id: Some("aad-g".into()),
            display_name: "admins".into(),
            members: vec![MemberRef {
                value: "aad-u".into(),
                display: Some("Ada".into()),
            }],
        });
        let stripped = group.without_members();
        assert!(stripped.members().is_empty());
        assert_eq!(stripped.external_id(), Some("aad-g"));
    }

    #[test]
    fn attributes_are_flat_and_skip_missing_fields() {
        let user = TargetPrincipal::User(TargetUser {
            id: None,
            external_id: Some("aad-1".into()),
            user_name: "ada@example.com".into(),
            display_name: Some("Ada".into()),
            active: None,
        });
        let attrs = user.attributes().unwrap();
        assert_eq!(attrs.get("userName"), Some(&json!("ada@example.com")));
        assert!(!attrs.contains_key("kind"));
        assert!(!attrs.contains_key("active"));
        assert!(!attrs.contains_key("id"));
    }
}
