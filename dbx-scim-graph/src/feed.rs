//! Incremental mode: turn the directory change feed into a set of groups to
//! re-crawl.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::client::{DirectoryApi, FeedRequest};
use crate::crawler::DirectoryCrawler;
use crate::error::GraphError;
use crate::model::DesiredStateGraph;

/// Pause between reading the feed and crawling, letting the directory's
/// membership reads catch up with the changes just reported.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Outcome of one incremental resolution.
#[derive(Debug, Clone)]
pub struct ChangedGroups {
    /// Continuation token to persist once the run succeeds.
    pub delta_link: String,
    /// Names that were crawled.
    pub groups_to_sync: BTreeSet<String>,
    pub graph: DesiredStateGraph,
}

pub struct ChangeFeedConsumer<'a, D: DirectoryApi + ?Sized> {
    directory: &'a D,
    grace_period: Duration,
}

impl<'a, D: DirectoryApi + ?Sized> ChangeFeedConsumer<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self {
            directory,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Resolve which groups changed since `saved_token` and crawl them.
    ///
    /// Without a token every whitelisted or requested group is synced and a
    /// fresh token is bootstrapped. With a token, explicitly requested groups
    /// outside the whitelist are always synced, plus whitelisted groups the
    /// feed reports as changed.
    pub fn resolve_changed_groups(
        &self,
        saved_token: Option<&str>,
        requested: &BTreeSet<String>,
        whitelist: &BTreeSet<String>,
        max_depth: u32,
    ) -> Result<ChangedGroups, GraphError> {
        let (mut groups_to_sync, mut request) = match saved_token {
            None => {
                info!("no change-feed token found, syncing all groups");
                (
                    whitelist.union(requested).cloned().collect::<BTreeSet<_>>(),
                    FeedRequest::Initial,
                )
            }
            Some(token) => (
                requested.difference(whitelist).cloned().collect(),
                FeedRequest::Link(token.to_string()),
            ),
        };

        let delta_link = loop {
            let page = self.directory.poll_change_feed(&request)?;
            for change in page.changes {
                let Some(name) = change.display_name else {
                    debug!("ignoring change record {} without displayName", change.id);
                    continue;
                };
                if whitelist.contains(&name) && groups_to_sync.insert(name.clone()) {
                    info!("group changed: {name}");
                }
            }
            match (page.delta_link, page.next_link) {
                (Some(delta), _) => break delta,
                (None, Some(next)) => request = FeedRequest::Link(next),
                (None, None) => {
                    return Err(GraphError::FeedProtocol {
                        url: match request {
                            FeedRequest::Initial => "initial change-feed request".to_string(),
                            FeedRequest::Link(link) => link,
                        },
                    })
                }
            }
        };

        if groups_to_sync.is_empty() {
            info!("no group changes to sync");
            return Ok(ChangedGroups {
                delta_link,
                groups_to_sync,
                graph: DesiredStateGraph::default(),
            });
        }

        info!(
            "{} group(s) to sync, waiting {:?} before crawling",
            groups_to_sync.len(),
            self.grace_period
        );
        thread::sleep(self.grace_period);

        let graph = DirectoryCrawler::new(self.directory).crawl(&groups_to_sync, max_depth)?;
        Ok(ChangedGroups {
            delta_link,
            groups_to_sync,
            graph,
        })
    }
}
