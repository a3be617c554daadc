//! In-memory directory and SCIM account used by the pipeline tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use dbx_scim_core::{
    MemberRef, PatchOp, PatchOpKind, PrincipalKind, TargetGroup, TargetPrincipal,
    TargetServicePrincipal, TargetUser,
};
use dbx_scim_graph::{DirectoryApi, FeedPage, FeedRequest, GraphError, GroupChange, GroupInfo};
use dbx_scim_sync::{ScimApi, ScimError};
use serde_json::{json, Value};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    groups: BTreeMap<String, GroupInfo>,
    members: BTreeMap<String, Vec<Value>>,
    feed: Mutex<VecDeque<FeedPage>>,
    resolved: Mutex<Vec<String>>,
}

pub const DEFAULT_DELTA_LINK: &str = "https://graph.example/delta?token=next";

impl FakeDirectory {
    pub fn group(mut self, id: &str, name: &str, members: Vec<Value>) -> Self {
        self.groups.insert(
            name.to_string(),
            GroupInfo {
                id: id.to_string(),
                display_name: name.to_string(),
                security_enabled: true,
                mail_enabled: false,
            },
        );
        self.members.insert(id.to_string(), members);
        self
    }

    pub fn feed_page(self, changed: &[&str], delta: &str) -> Self {
        self.feed.lock().unwrap().push_back(FeedPage {
            changes: changed
                .iter()
                .map(|name| GroupChange {
                    id: format!("id-{name}"),
                    display_name: Some(name.to_string()),
                })
                .collect(),
            next_link: None,
            delta_link: Some(delta.to_string()),
        });
        self
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.lock().unwrap().len()
    }
}

impl DirectoryApi for FakeDirectory {
    fn resolve_group_by_exact_name(&self, name: &str) -> Result<Option<GroupInfo>, GraphError> {
        self.resolved.lock().unwrap().push(name.to_string());
        Ok(self.groups.get(name).cloned())
    }

    fn list_group_members(&self, group_id: &str) -> Result<Vec<Value>, GraphError> {
        Ok(self.members.get(group_id).cloned().unwrap_or_default())
    }

    fn poll_change_feed(&self, _request: &FeedRequest) -> Result<FeedPage, GraphError> {
        Ok(self.feed.lock().unwrap().pop_front().unwrap_or(FeedPage {
            changes: vec![],
            next_link: None,
            delta_link: Some(DEFAULT_DELTA_LINK.to_string()),
        }))
    }
}

pub fn aad_user(id: &str, mail: &str) -> Value {
    json!({"@odata.type": "#microsoft.graph.user", "id": id, "displayName": id, "mail": mail})
}

pub fn aad_spn(id: &str, app_id: &str) -> Value {
    json!({"@odata.type": "#microsoft.graph.servicePrincipal", "id": id, "displayName": id, "appId": app_id})
}

pub fn aad_group(id: &str, name: &str) -> Value {
    json!({"@odata.type": "#microsoft.graph.group", "id": id, "displayName": name})
}

// ---------------------------------------------------------------------------
// SCIM account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List(PrincipalKind, String),
    Get(PrincipalKind, String),
    Create(PrincipalKind, String),
    Patch(PrincipalKind, String, Vec<PatchOp>),
    Delete(PrincipalKind, String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Create(..) | Call::Patch(..) | Call::Delete(..))
    }
}

#[derive(Default)]
pub struct ScimState {
    pub records: BTreeMap<String, TargetPrincipal>,
    pub next_id: u64,
    pub calls: Vec<Call>,
    pub throttle_remaining: u32,
    pub rejected_names: BTreeSet<String>,
}

#[derive(Default)]
pub struct FakeScim {
    state: Mutex<ScimState>,
}

fn api_error(method: &str, status: u16, body: &str) -> ScimError {
    ScimError::Api {
        method: method.to_string(),
        url: "fake".to_string(),
        status,
        body: body.to_string(),
    }
}

fn set_id(principal: &mut TargetPrincipal, id: String) {
    match principal {
        TargetPrincipal::User(u) => u.id = Some(id),
        TargetPrincipal::ServicePrincipal(s) => s.id = Some(id),
        TargetPrincipal::Group(g) => g.id = Some(id),
    }
}

fn apply(principal: &mut TargetPrincipal, op: &PatchOp) {
    match (principal, op.op, op.path.as_deref()) {
        (TargetPrincipal::User(u), PatchOpKind::Replace, Some("displayName")) => {
            u.display_name = op.value.as_ref().and_then(|v| v.as_str()).map(str::to_string)
        }
        (TargetPrincipal::User(u), PatchOpKind::Replace, Some("active")) => {
            u.active = op.value.as_ref().and_then(Value::as_bool)
        }
        (TargetPrincipal::ServicePrincipal(s), PatchOpKind::Replace, Some("displayName")) => {
            s.display_name = op.value.as_ref().and_then(|v| v.as_str()).map(str::to_string)
        }
        (TargetPrincipal::ServicePrincipal(s), PatchOpKind::Replace, Some("active")) => {
            s.active = op.value.as_ref().and_then(Value::as_bool)
        }
        (TargetPrincipal::Group(g), PatchOpKind::Replace, Some("displayName")) => {
            if let Some(name) = op.value.as_ref().and_then(|v| v.as_str()) {
                g.display_name = name.to_string();
            }
        }
        (TargetPrincipal::Group(g), PatchOpKind::Add, None) => {
            let added = op
                .value
                .as_ref()
                .and_then(|v| v.get("members"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for member in added {
                if let Some(id) = member.get("value").and_then(Value::as_str) {
                    g.members.push(MemberRef {
                        value: id.to_string(),
                        display: None,
                    });
                }
            }
        }
        (TargetPrincipal::Group(g), PatchOpKind::Remove, Some(path)) => {
            let id = path
                .trim_start_matches("members[value eq \"")
                .trim_end_matches("\"]");
            g.members.retain(|m| m.value != id);
        }
        (_, kind, path) => panic!("fake SCIM cannot apply {kind:?} {path:?}"),
    }
}

impl FakeScim {
    pub fn lock(&self) -> MutexGuard<'_, ScimState> {
        self.state.lock().unwrap()
    }

    /// Insert an existing target record and return its id.
    pub fn seed(&self, mut principal: TargetPrincipal) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("t{}", state.next_id);
        set_id(&mut principal, id.clone());
        state.records.insert(id.clone(), principal);
        id
    }

    pub fn throttle_next(&self, calls: u32) {
        self.lock().throttle_remaining = calls;
    }

    pub fn reject(&self, name: &str) {
        self.lock().rejected_names.insert(name.to_string());
    }

    pub fn find(&self, kind: PrincipalKind, name: &str) -> Option<TargetPrincipal> {
        self.lock()
            .records
            .values()
            .find(|p| p.kind() == kind && p.human_name() == name)
            .cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    fn begin(&self, call: Call) -> Result<MutexGuard<'_, ScimState>, ScimError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.throttle_remaining > 0 {
            state.throttle_remaining -= 1;
            return Err(ScimError::Throttled {
                method: "ANY".into(),
                url: "fake".into(),
                status: 429,
                body: "Too Many Requests".into(),
            });
        }
        Ok(state)
    }
}

impl ScimApi for FakeScim {
    fn list(&self, kind: PrincipalKind, filter: &str) -> Result<Vec<TargetPrincipal>, ScimError> {
        let state = self.begin(Call::List(kind, filter.to_string()))?;
        let prefix = format!("{} eq \"", kind.spec().key_attribute);
        let name = filter
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or_default();
        Ok(state
            .records
            .values()
            .filter(|p| p.kind() == kind && p.human_name() == name)
            .cloned()
            .collect())
    }

    fn get(&self, kind: PrincipalKind, id: &str) -> Result<TargetPrincipal, ScimError> {
        let state = self.begin(Call::Get(kind, id.to_string()))?;
        state
            .records
            .get(id)
            .filter(|p| p.kind() == kind)
            .cloned()
            .ok_or_else(|| api_error("GET", 404, "not found"))
    }

    fn create(&self, principal: &TargetPrincipal) -> Result<TargetPrincipal, ScimError> {
        let kind = principal.kind();
        let name = principal.human_name().to_string();
        let mut state = self.begin(Call::Create(kind, name.clone()))?;
        if state.rejected_names.contains(&name) {
            return Err(api_error("POST", 400, "rejected"));
        }
        state.next_id += 1;
        let id = format!("t{}", state.next_id);
        let mut stored = principal.clone();
        set_id(&mut stored, id.clone());
        state.records.insert(id, stored.clone());
        Ok(stored)
    }

    fn patch(&self, kind: PrincipalKind, id: &str, operations: &[PatchOp]) -> Result<(), ScimError> {
        let mut state = self.begin(Call::Patch(kind, id.to_string(), operations.to_vec()))?;
        let rejected = state.rejected_names.clone();
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| api_error("PATCH", 404, "not found"))?;
        if rejected.contains(record.human_name()) {
            return Err(api_error("PATCH", 400, "rejected"));
        }
        for op in operations {
            apply(record, op);
        }
        Ok(())
    }

    fn delete(&self, kind: PrincipalKind, id: &str) -> Result<(), ScimError> {
        let mut state = self.begin(Call::Delete(kind, id.to_string()))?;
        state
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| api_error("DELETE", 404, "not found"))
    }
}

// ---------------------------------------------------------------------------
// Target record builders
// ---------------------------------------------------------------------------

pub fn target_user(directory_id: &str, mail: &str) -> TargetPrincipal {
    TargetPrincipal::User(TargetUser {
        id: None,
        external_id: Some(directory_id.to_string()),
        user_name: mail.to_string(),
        display_name: Some(directory_id.to_string()),
        active: Some(true),
    })
}

pub fn target_spn(directory_id: &str, app_id: &str) -> TargetPrincipal {
    TargetPrincipal::ServicePrincipal(TargetServicePrincipal {
        id: None,
        external_id: Some(directory_id.to_string()),
        application_id: app_id.to_string(),
        display_name: Some(directory_id.to_string()),
        active: Some(true),
    })
}

pub fn target_group(directory_id: &str, name: &str, member_ids: &[&str]) -> TargetPrincipal {
    TargetPrincipal::Group(TargetGroup {
        id: None,
        external_id: Some(directory_id.to_string()),
        display_name: name.to_string(),
        members: member_ids
            .iter()
            .map(|id| MemberRef {
                value: id.to_string(),
                display: None,
            })
            .collect(),
    })
}
