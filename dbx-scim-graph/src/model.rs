//! Directory-side principal records and the desired-state graph.
//!
//! Member payloads returned by the directory are loosely typed JSON. Each one
//! is classified by its `@odata.type` and mapped into a typed record, with
//! every field resolved through an ordered alias list (first non-null wins).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use dbx_scim_core::{
    MemberRef, PrincipalKind, TargetGroup, TargetPrincipal, TargetServicePrincipal, TargetUser,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::error::{io_err, GraphError};

pub const ODATA_TYPE: &str = "@odata.type";
pub const USER_TYPE: &str = "#microsoft.graph.user";
pub const SERVICE_PRINCIPAL_TYPE: &str = "#microsoft.graph.servicePrincipal";
pub const GROUP_TYPE: &str = "#microsoft.graph.group";

/// `extra_data` key holding the crawl depth a principal was discovered at.
pub const SEARCH_DEPTH_KEY: &str = "search_depth";

const ID_ALIASES: &[&str] = &["id"];
const DISPLAY_NAME_ALIASES: &[&str] = &["displayName"];
const MAIL_ALIASES: &[&str] = &["mail", "mailNickname"];
const APP_ID_ALIASES: &[&str] = &["appId"];
const ACTIVE_ALIASES: &[&str] = &["accountEnabled"];

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrincipalParseError {
    #[error("payload has no @odata.type")]
    MissingType,

    #[error("unsupported principal type '{0}'")]
    UnsupportedType(String),

    #[error("{kind} is missing required field '{field}'")]
    MissingField {
        kind: PrincipalKind,
        field: &'static str,
    },

    #[error("{kind} field '{field}' has the wrong type")]
    WrongType {
        kind: PrincipalKind,
        field: &'static str,
    },
}

fn first_present<'a>(payload: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| payload.get(*alias))
        .find(|v| !v.is_null())
}

fn required_str(
    payload: &Value,
    aliases: &[&'static str],
    kind: PrincipalKind,
) -> Result<String, PrincipalParseError> {
    let field = aliases[0];
    match first_present(payload, aliases) {
        None => Err(PrincipalParseError::MissingField { kind, field }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(PrincipalParseError::WrongType { kind, field }),
    }
}

fn optional_bool(
    payload: &Value,
    aliases: &[&'static str],
    kind: PrincipalKind,
    default: bool,
) -> Result<bool, PrincipalParseError> {
    match first_present(payload, aliases) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(PrincipalParseError::WrongType {
            kind,
            field: aliases[0],
        }),
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryUser {
    pub id: String,
    pub display_name: String,
    pub mail: String,
    pub active: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_data: BTreeMap<String, String>,
}

impl DirectoryUser {
    pub fn from_payload(payload: &Value) -> Result<Self, PrincipalParseError> {
        let kind = PrincipalKind::User;
        Ok(Self {
            id: required_str(payload, ID_ALIASES, kind)?,
            display_name: required_str(payload, DISPLAY_NAME_ALIASES, kind)?,
            mail: required_str(payload, MAIL_ALIASES, kind)?,
            active: optional_bool(payload, ACTIVE_ALIASES, kind, true)?,
            extra_data: BTreeMap::new(),
        })
    }

    pub fn to_target(&self) -> TargetUser {
        TargetUser {
            id: None,
            external_id: Some(self.id.clone()),
            user_name: self.mail.clone(),
            display_name: Some(self.display_name.clone()),
            active: Some(self.active),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryServicePrincipal {
    pub id: String,
    pub display_name: String,
    pub application_id: String,
    pub active: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_data: BTreeMap<String, String>,
}

impl DirectoryServicePrincipal {
    pub fn from_payload(payload: &Value) -> Result<Self, PrincipalParseError> {
        let kind = PrincipalKind::ServicePrincipal;
        Ok(Self {
            id: required_str(payload, ID_ALIASES, kind)?,
            display_name: required_str(payload, DISPLAY_NAME_ALIASES, kind)?,
            application_id: required_str(payload, APP_ID_ALIASES, kind)?,
            active: optional_bool(payload, ACTIVE_ALIASES, kind, true)?,
            extra_data: BTreeMap::new(),
        })
    }

    pub fn to_target(&self) -> TargetServicePrincipal {
        TargetServicePrincipal {
            id: None,
            external_id: Some(self.id.clone()),
            application_id: self.application_id.clone(),
            display_name: Some(self.display_name.clone()),
            active: Some(self.active),
        }
    }
}

/// A member slot inside a directory group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub id: String,
    pub display_name: String,
    pub kind: PrincipalKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryGroup {
    pub id: String,
    pub display_name: String,
    /// Keyed by member directory id.
    pub members: BTreeMap<String, GroupMember>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_data: BTreeMap<String, String>,
}

impl DirectoryGroup {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            members: BTreeMap::new(),
            extra_data: BTreeMap::new(),
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self, PrincipalParseError> {
        let kind = PrincipalKind::Group;
        Ok(Self::new(
            required_str(payload, ID_ALIASES, kind)?,
            required_str(payload, DISPLAY_NAME_ALIASES, kind)?,
        ))
    }

    /// Target shape; `members[].value` carries directory ids until the
    /// membership reconciler translates them.
    pub fn to_target(&self) -> TargetGroup {
        TargetGroup {
            id: None,
            external_id: Some(self.id.clone()),
            display_name: self.display_name.clone(),
            members: self
                .members
                .values()
                .map(|m| MemberRef {
                    value: m.id.clone(),
                    display: Some(m.display_name.clone()),
                })
                .collect(),
        }
    }
}

/// A classified member payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryPrincipal {
    User(DirectoryUser),
    ServicePrincipal(DirectoryServicePrincipal),
    Group(DirectoryGroup),
}

impl DirectoryPrincipal {
    pub fn from_payload(payload: &Value) -> Result<Self, PrincipalParseError> {
        let odata_type = match payload.get(ODATA_TYPE) {
            Some(Value::String(t)) => t.as_str(),
            _ => return Err(PrincipalParseError::MissingType),
        };
        match odata_type {
            USER_TYPE => DirectoryUser::from_payload(payload).map(DirectoryPrincipal::User),
            SERVICE_PRINCIPAL_TYPE => DirectoryServicePrincipal::from_payload(payload)
                .map(DirectoryPrincipal::ServicePrincipal),
            GROUP_TYPE => DirectoryGroup::from_payload(payload).map(DirectoryPrincipal::Group),
            other => Err(PrincipalParseError::UnsupportedType(other.to_string())),
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            DirectoryPrincipal::User(_) => PrincipalKind::User,
            DirectoryPrincipal::ServicePrincipal(_) => PrincipalKind::ServicePrincipal,
            DirectoryPrincipal::Group(_) => PrincipalKind::Group,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            DirectoryPrincipal::User(u) => &u.id,
            DirectoryPrincipal::ServicePrincipal(s) => &s.id,
            DirectoryPrincipal::Group(g) => &g.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Desired-state graph
// ---------------------------------------------------------------------------

/// A member payload that could not be classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlError {
    pub payload: Value,
    pub error: String,
}

/// Everything the directory says should exist on the target, keyed by
/// directory id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DesiredStateGraph {
    pub users: BTreeMap<String, DirectoryUser>,
    pub service_principals: BTreeMap<String, DirectoryServicePrincipal>,
    pub groups: BTreeMap<String, DirectoryGroup>,
    pub errors: Vec<CrawlError>,
    /// Groups whose membership was fully enumerated during the crawl.
    pub deep_sync_group_names: BTreeSet<String>,
}

impl DesiredStateGraph {
    /// Register a principal discovered at `depth`. The first registration
    /// of an id wins; later ones return the existing slot untouched.
    pub fn register(&mut self, principal: DirectoryPrincipal, depth: u32) -> GroupMember {
        let depth_value = depth.to_string();
        match principal {
            DirectoryPrincipal::User(mut user) => {
                let entry = self.users.entry(user.id.clone()).or_insert_with(|| {
                    user.extra_data.insert(SEARCH_DEPTH_KEY.into(), depth_value);
                    user
                });
                GroupMember {
                    id: entry.id.clone(),
                    display_name: entry.display_name.clone(),
                    kind: PrincipalKind::User,
                }
            }
            DirectoryPrincipal::ServicePrincipal(mut spn) => {
                let entry = self
                    .service_principals
                    .entry(spn.id.clone())
                    .or_insert_with(|| {
                        spn.extra_data.insert(SEARCH_DEPTH_KEY.into(), depth_value);
                        spn
                    });
                GroupMember {
                    id: entry.id.clone(),
                    display_name: entry.display_name.clone(),
                    kind: PrincipalKind::ServicePrincipal,
                }
            }
            DirectoryPrincipal::Group(mut group) => {
                let entry = self.groups.entry(group.id.clone()).or_insert_with(|| {
                    group.extra_data.insert(SEARCH_DEPTH_KEY.into(), depth_value);
                    group
                });
                GroupMember {
                    id: entry.id.clone(),
                    display_name: entry.display_name.clone(),
                    kind: PrincipalKind::Group,
                }
            }
        }
    }

    /// Attach `member` to the already-registered group `group_id`.
    pub fn attach_member(&mut self, group_id: &str, member: GroupMember) {
        if let Some(group) = self.groups.get_mut(group_id) {
            group.members.insert(member.id.clone(), member);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.service_principals.is_empty() && self.groups.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "errors={}, groups={}, users={}, service_principals={}",
            self.errors.len(),
            self.groups.len(),
            self.users.len(),
            self.service_principals.len()
        )
    }

    /// Fail if any crawled payload could not be mapped.
    pub fn ensure_valid(&self) -> Result<(), GraphError> {
        match self.errors.first() {
            None => Ok(()),
            Some(first) => Err(GraphError::InvalidPrincipals {
                count: self.errors.len(),
                first: format!("{} ({})", first.error, first.payload),
            }),
        }
    }

    pub fn desired(&self, kind: PrincipalKind) -> Vec<TargetPrincipal> {
        match kind {
            PrincipalKind::User => self
                .users
                .values()
                .map(|u| TargetPrincipal::User(u.to_target()))
                .collect(),
            PrincipalKind::ServicePrincipal => self
                .service_principals
                .values()
                .map(|s| TargetPrincipal::ServicePrincipal(s.to_target()))
                .collect(),
            PrincipalKind::Group => self
                .groups
                .values()
                .map(|g| TargetPrincipal::Group(g.to_target()))
                .collect(),
        }
    }

    /// Write the graph as pretty JSON for offline inspection.
    pub fn save_to_json_file(&self, path: &Path) -> Result<(), GraphError> {
        info!("saving directory snapshot to {}", path.display());
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| io_err(path, e))
    }
}
