//! SCIM PatchOp request bodies (RFC 7644 §3.5.2).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Replace,
    Remove,
}

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: Some(path.into()),
            value: Some(value),
        }
    }

    /// One batched `add` carrying every new member id.
    pub fn add_members<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<Value> = ids
            .into_iter()
            .map(|id| json!({ "value": id.into() }))
            .collect();
        Self {
            op: PatchOpKind::Add,
            path: None,
            value: Some(json!({ "members": members })),
        }
    }

    /// `remove` addressed by a value filter on the members attribute.
    pub fn remove_member(id: &str) -> Self {
        Self {
            op: PatchOpKind::Remove,
            path: Some(format!("members[value eq \"{id}\"]")),
            value: None,
        }
    }
}

/// Full PatchOp request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOp>,
}

impl PatchRequest {
    pub fn new(operations: Vec<PatchOp>) -> Self {
        Self {
            schemas: vec![PATCH_OP_SCHEMA.to_string()],
            operations,
        }
    }
}
