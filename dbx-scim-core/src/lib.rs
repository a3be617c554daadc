//! dbx-scim core library: principal types, SCIM patch bodies, persisted
//! state (name caches, change-feed token) and bearer-token acquisition.
//!
//! - [`types`]: principal kinds and target-side records
//! - [`patch`]: SCIM PatchOp bodies
//! - [`storage`]: local file and blob transports
//! - [`cache`]: per-kind name-to-id caches
//! - [`delta`]: change-feed token store
//! - [`auth`]: static or client-credentials bearer tokens

pub mod auth;
pub mod cache;
pub mod delta;
pub mod error;
pub mod patch;
pub mod paths;
pub mod storage;
pub mod types;

pub use auth::{ClientCredentials, TokenProvider};
pub use cache::{NameCache, NameCaches};
pub use delta::{DeltaToken, DeltaTokenStore};
pub use error::CoreError;
pub use patch::{PatchOp, PatchOpKind, PatchRequest};
pub use storage::{CacheStorage, StateLocation};
pub use types::{
    KindSpec, MemberRef, PrincipalKind, TargetGroup, TargetPrincipal, TargetServicePrincipal,
    TargetUser,
};
