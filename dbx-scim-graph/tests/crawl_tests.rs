use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use dbx_scim_core::PrincipalKind;
use dbx_scim_graph::model::SEARCH_DEPTH_KEY;
use dbx_scim_graph::{
    ChangeFeedConsumer, DirectoryApi, DirectoryCrawler, FeedPage, FeedRequest, GraphError,
    GroupChange, GroupInfo,
};
use rstest::rstest;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// In-memory directory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeDirectory {
    groups: BTreeMap<String, GroupInfo>,
    members: BTreeMap<String, Vec<Value>>,
    feed: Mutex<VecDeque<FeedPage>>,
    feed_requests: Mutex<Vec<FeedRequest>>,
    resolved: Mutex<Vec<String>>,
}

impl FakeDirectory {
    fn group(mut self, id: &str, name: &str, members: Vec<Value>) -> Self {
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

    fn distribution_list(mut self, id: &str, name: &str) -> Self {
        self.groups.insert(
            name.to_string(),
            GroupInfo {
                id: id.to_string(),
                display_name: name.to_string(),
                security_enabled: false,
                mail_enabled: true,
            },
        );
        self
    }

    fn feed_page(self, changed: &[&str], next: Option<&str>, delta: Option<&str>) -> Self {
        self.feed.lock().unwrap().push_back(FeedPage {
            changes: changed
                .iter()
                .map(|name| GroupChange {
                    id: format!("id-{name}"),
                    display_name: Some(name.to_string()),
                })
                .collect(),
            next_link: next.map(str::to_string),
            delta_link: delta.map(str::to_string),
        });
        self
    }

    fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
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

    fn poll_change_feed(&self, request: &FeedRequest) -> Result<FeedPage, GraphError> {
        self.feed_requests.lock().unwrap().push(request.clone());
        Ok(self.feed.lock().unwrap().pop_front().unwrap_or(FeedPage {
            changes: vec![],
            next_link: None,
            delta_link: Some("https://graph/delta?token=default".into()),
        }))
    }
}

fn user(id: &str, mail: &str) -> Value {
    json!({"@odata.type": "#microsoft.graph.user", "id": id, "displayName": id, "mail": mail})
}

fn spn(id: &str, app_id: &str) -> Value {
    json!({"@odata.type": "#microsoft.graph.servicePrincipal", "id": id, "displayName": id, "appId": app_id})
}

fn group_ref(id: &str, name: &str) -> Value {
    json!({"@odata.type": "#microsoft.graph.group", "id": id, "displayName": name})
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// admins -> {alice, deployer, platform}; platform -> {bob, infra}; infra -> {carol}
fn nested_directory() -> FakeDirectory {
    FakeDirectory::default()
        .group(
            "g-admins",
            "admins",
            vec![
                user("u-alice", "alice@example.com"),
                spn("s-deployer", "app-1"),
                group_ref("g-platform", "platform"),
            ],
        )
        .group(
            "g-platform",
            "platform",
            vec![user("u-bob", "bob@example.com"), group_ref("g-infra", "infra")],
        )
        .group("g-infra", "infra", vec![user("u-carol", "carol@example.com")])
}

// ---------------------------------------------------------------------------
// Crawl
// ---------------------------------------------------------------------------

#[rstest]
#[case(1, &["admins"], 4, 1)]
#[case(2, &["admins", "platform"], 6, 2)]
#[case(3, &["admins", "infra", "platform"], 7, 3)]
fn depth_bounds_which_groups_are_enumerated(
    #[case] depth: u32,
    #[case] deep: &[&str],
    #[case] principals: usize,
    #[case] resolves: usize,
) {
    let directory = nested_directory();
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["admins"]), depth)
        .expect("crawl");

    assert_eq!(graph.deep_sync_group_names, names(deep));
    let total = graph.users.len() + graph.service_principals.len() + graph.groups.len();
    assert_eq!(total, principals);
    assert_eq!(directory.resolved().len(), resolves);
}

#[test]
fn shallow_member_group_is_recorded_without_members() {
    let directory = nested_directory();
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["admins"]), 1)
        .expect("crawl");

    let platform = &graph.groups["g-platform"];
    assert!(platform.members.is_empty());
    assert!(!graph.deep_sync_group_names.contains("platform"));

    let admins = &graph.groups["g-admins"];
    let kinds: BTreeSet<PrincipalKind> = admins.members.values().map(|m| m.kind).collect();
    assert_eq!(kinds.len(), 3);
}

#[test]
fn search_depth_is_distance_from_seed() {
    let directory = nested_directory();
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["admins"]), 3)
        .expect("crawl");

    assert_eq!(graph.groups["g-admins"].extra_data[SEARCH_DEPTH_KEY], "0");
    assert_eq!(graph.users["u-alice"].extra_data[SEARCH_DEPTH_KEY], "1");
    assert_eq!(graph.groups["g-platform"].extra_data[SEARCH_DEPTH_KEY], "1");
    assert_eq!(graph.users["u-bob"].extra_data[SEARCH_DEPTH_KEY], "2");
    assert_eq!(graph.users["u-carol"].extra_data[SEARCH_DEPTH_KEY], "3");
}

#[test]
fn seed_that_is_also_nested_is_visited_once() {
    let directory = nested_directory();
    DirectoryCrawler::new(&directory)
        .crawl(&names(&["admins", "platform"]), 2)
        .expect("crawl");
    let resolved = directory.resolved();
    assert_eq!(
        resolved.iter().filter(|n| n.as_str() == "platform").count(),
        1
    );
}

#[test]
fn cyclic_membership_terminates() {
    let directory = FakeDirectory::default()
        .group("g-a", "a", vec![group_ref("g-b", "b")])
        .group("g-b", "b", vec![group_ref("g-a", "a")]);
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["a"]), 10)
        .expect("crawl");
    assert_eq!(graph.groups.len(), 2);
    assert_eq!(directory.resolved(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn missing_and_non_security_groups_are_skipped() {
    let directory = nested_directory().distribution_list("g-dl", "newsletter");
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["ghost", "newsletter", "admins"]), 1)
        .expect("crawl");
    assert_eq!(graph.deep_sync_group_names, names(&["admins"]));
    assert!(!graph.groups.contains_key("g-dl"));
}

#[test]
fn unmappable_member_is_recorded_and_fails_validation() {
    let directory = FakeDirectory::default().group(
        "g-1",
        "team",
        vec![
            user("u-1", "one@example.com"),
            json!({"@odata.type": "#microsoft.graph.user", "id": "u-2", "displayName": "no mail"}),
        ],
    );
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["team"]), 1)
        .expect("crawl");
    assert_eq!(graph.users.len(), 1);
    assert_eq!(graph.errors.len(), 1);
    assert!(graph.ensure_valid().is_err());
}

#[test]
fn shared_member_is_registered_once() {
    let directory = FakeDirectory::default()
        .group("g-1", "one", vec![user("u-1", "shared@example.com")])
        .group("g-2", "two", vec![user("u-1", "shared@example.com")]);
    let graph = DirectoryCrawler::new(&directory)
        .crawl(&names(&["one", "two"]), 1)
        .expect("crawl");
    assert_eq!(graph.users.len(), 1);
    assert!(graph.groups["g-1"].members.contains_key("u-1"));
    assert!(graph.groups["g-2"].members.contains_key("u-1"));
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

fn consumer(directory: &FakeDirectory) -> ChangeFeedConsumer<'_, FakeDirectory> {
    ChangeFeedConsumer::new(directory).with_grace_period(Duration::ZERO)
}

#[test]
fn first_run_syncs_whitelist_and_requested_and_bootstraps_token() {
    let directory = nested_directory().feed_page(&[], None, Some("https://graph/delta?t=1"));
    let changed = consumer(&directory)
        .resolve_changed_groups(None, &names(&["infra"]), &names(&["admins"]), 1)
        .expect("resolve");

    assert_eq!(changed.groups_to_sync, names(&["admins", "infra"]));
    assert_eq!(changed.delta_link, "https://graph/delta?t=1");
    assert_eq!(
        directory.feed_requests.lock().unwrap().as_slice(),
        &[FeedRequest::Initial]
    );
}

#[test]
fn later_run_syncs_requested_outside_whitelist_plus_changed_whitelisted() {
    let directory = nested_directory()
        .feed_page(&["admins", "unrelated"], Some("https://graph/next"), None)
        .feed_page(&["platform"], None, Some("https://graph/delta?t=2"));
    let whitelist = names(&["admins", "platform", "infra"]);
    let requested = names(&["infra", "extra"]);

    let changed = consumer(&directory)
        .resolve_changed_groups(Some("https://graph/delta?t=1"), &requested, &whitelist, 1)
        .expect("resolve");

    assert_eq!(changed.groups_to_sync, names(&["admins", "extra", "platform"]));
    assert_eq!(changed.delta_link, "https://graph/delta?t=2");
    assert_eq!(
        directory.feed_requests.lock().unwrap().as_slice(),
        &[
            FeedRequest::Link("https://graph/delta?t=1".into()),
            FeedRequest::Link("https://graph/next".into()),
        ]
    );
}

#[test]
fn no_changes_skips_crawl() {
    let directory = nested_directory().feed_page(&[], None, Some("https://graph/delta?t=3"));
    let changed = consumer(&directory)
        .resolve_changed_groups(
            Some("https://graph/delta?t=2"),
            &BTreeSet::new(),
            &names(&["admins"]),
            2,
        )
        .expect("resolve");
    assert!(changed.groups_to_sync.is_empty());
    assert!(changed.graph.is_empty());
    assert!(directory.resolved().is_empty());
}

#[test]
fn page_without_links_is_a_protocol_error() {
    let directory = nested_directory().feed_page(&["admins"], None, None);
    let err = consumer(&directory)
        .resolve_changed_groups(Some("https://graph/delta?t=1"), &BTreeSet::new(), &names(&["admins"]), 1)
        .unwrap_err();
    assert!(matches!(err, GraphError::FeedProtocol { .. }));
}
