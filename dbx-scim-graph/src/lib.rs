//! Directory side of the sync: reading Azure AD through Microsoft Graph and
//! assembling the desired-state graph.
//!
//! - [`client`]: [`DirectoryApi`] and the Graph implementation
//! - [`model`]: directory records and [`DesiredStateGraph`]
//! - [`crawler`]: bounded breadth-first group crawl
//! - [`feed`]: change-feed driven incremental resolution

pub mod client;
pub mod crawler;
pub mod error;
pub mod feed;
pub mod model;

pub use client::{DirectoryApi, FeedPage, FeedRequest, GraphClient, GroupChange, GroupInfo};
pub use crawler::{DirectoryCrawler, DEFAULT_SEARCH_DEPTH};
pub use error::GraphError;
pub use feed::{ChangeFeedConsumer, ChangedGroups, DEFAULT_GRACE_PERIOD};
pub use model::{
    CrawlError, DesiredStateGraph, DirectoryGroup, DirectoryPrincipal, DirectoryServicePrincipal,
    DirectoryUser, GroupMember, PrincipalParseError,
};
