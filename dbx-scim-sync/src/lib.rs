//! # dbx-scim-sync
//!
//! Converges Databricks account principals and group memberships with the
//! desired state crawled from the directory.
//!
//! Call [`pipeline::run`] for a complete run, or drive a
//! [`ReconciliationEngine`] directly for one kind.

pub mod engine;
pub mod error;
pub mod membership;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod scim;

pub use engine::{ReconciliationEngine, DEFAULT_WORKER_THREADS};
pub use error::{ScimError, SyncError};
pub use membership::{membership_changes, CrossReference, MembershipReconciler};
pub use pipeline::{run, RunOptions, SyncContext};
pub use report::{
    KindReport, MembershipOutcome, MergeAction, MergeResult, ObjectFailure, SyncMode, SyncReport,
};
pub use retry::RetryPolicy;
pub use scim::{AccountScimClient, ScimApi};
