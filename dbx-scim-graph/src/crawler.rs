//! Breadth-first crawl of the directory group hierarchy.
//!
//! Depth 0 is the seed list. Every group resolved at depth `d` has its direct
//! members enumerated; member groups become candidates for depth `d + 1`
//! until `max_depth` levels have been visited. Member groups found at the
//! last level are recorded as members but their own membership is not
//! fetched ("shallow" groups).

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::client::DirectoryApi;
use crate::error::GraphError;
use crate::model::{CrawlError, DesiredStateGraph, DirectoryGroup, DirectoryPrincipal};
use dbx_scim_core::PrincipalKind;

pub const DEFAULT_SEARCH_DEPTH: u32 = 1;

pub struct DirectoryCrawler<'a, D: DirectoryApi + ?Sized> {
    directory: &'a D,
}

impl<'a, D: DirectoryApi + ?Sized> DirectoryCrawler<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    /// Build the desired-state graph rooted at `seed_group_names`.
    pub fn crawl(
        &self,
        seed_group_names: &BTreeSet<String>,
        max_depth: u32,
    ) -> Result<DesiredStateGraph, GraphError> {
        let mut graph = DesiredStateGraph::default();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut candidates = seed_group_names.clone();

        for depth in 0..max_depth {
            let pending: Vec<String> = candidates
                .iter()
                .filter(|name| !visited.contains(*name))
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }
            info!(
                "crawling depth {}/{}: {} group(s)",
                depth + 1,
                max_depth,
                pending.len()
            );

            let mut next_level = BTreeSet::new();
            for (idx, name) in pending.iter().enumerate() {
                visited.insert(name.clone());
                info!("getting group: {} ({}/{})", name, idx + 1, pending.len());
                self.visit_group(&mut graph, name, depth, &mut next_level)?;
            }
            candidates = next_level;
        }

        let summary = format!("downloaded: {}", graph.summary());
        if graph.errors.is_empty() {
            info!("{summary}");
        } else {
            error!("{summary}");
        }
        Ok(graph)
    }

    fn visit_group(
        &self,
        graph: &mut DesiredStateGraph,
        name: &str,
        depth: u32,
        next_level: &mut BTreeSet<String>,
    ) -> Result<(), GraphError> {
        let Some(info) = self.directory.resolve_group_by_exact_name(name)? else {
            warn!("group not found, skipping: {name}");
            return Ok(());
        };
        if !info.is_security_group() {
            warn!("group is not a security group, skipping: {name}");
            return Ok(());
        }

        let members = self.directory.list_group_members(&info.id)?;
        debug!("group {} has {} direct member(s)", info.display_name, members.len());

        graph.register(
            DirectoryPrincipal::Group(DirectoryGroup::new(&info.id, &info.display_name)),
            depth,
        );
        graph.deep_sync_group_names.insert(info.display_name.clone());

        for payload in members {
            match DirectoryPrincipal::from_payload(&payload) {
                Ok(principal) => {
                    let member = graph.register(principal, depth + 1);
                    if member.kind == PrincipalKind::Group {
                        next_level.insert(member.display_name.clone());
                    }
                    graph.attach_member(&info.id, member);
                }
                Err(e) => {
                    error!("invalid member of {}: {} ({})", info.display_name, e, payload);
                    graph.errors.push(CrawlError {
                        payload,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
