//! Kubernetes-backed [`Repository`]
//!
//! Reads are served from reflector stores kept current by watchers, writes go
//! straight to the API server. [`Informers`] owns the watch side and feeds
//! every observed change to the [`Dispatcher`] after the store has been
//! updated.

use crate::crds::{Fragment, FragmentGroup};
use crate::render::dispatcher::{ChangeEvent, Dispatcher};
use crate::render::patch::FragmentPatch;
use crate::render::repository::Repository;
use crate::render::types::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const GROUP_KIND: &str = "FragmentGroup";
const FRAGMENT_KIND: &str = "Fragment";

#[derive(Clone)]
pub struct KubeRepository {
    groups_api: Api<FragmentGroup>,
    fragments_api: Api<Fragment>,
    groups: Store<FragmentGroup>,
    fragments: Store<Fragment>,
}

/// Watch side of a [`KubeRepository`]
pub struct Informers {
    groups_api: Api<FragmentGroup>,
    fragments_api: Api<Fragment>,
    groups: Writer<FragmentGroup>,
    fragments: Writer<Fragment>,
}

impl KubeRepository {
    #[must_use]
    pub fn new(client: Client) -> (Self, Informers) {
        let groups_api: Api<FragmentGroup> = Api::all(client.clone());
        let fragments_api: Api<Fragment> = Api::all(client);
        let (groups, group_writer) = reflector::store();
        let (fragments, fragment_writer) = reflector::store();

        let repository = Self {
            groups_api: groups_api.clone(),
            fragments_api: fragments_api.clone(),
            groups,
            fragments,
        };
        let informers = Informers {
            groups_api,
            fragments_api,
            groups: group_writer,
            fragments: fragment_writer,
        };
        (repository, informers)
    }

    /// Resolves once both stores completed their initial list. `false` means
    /// a watcher went away before that happened.
    pub async fn wait_until_synced(&self) -> bool {
        let (groups, fragments) =
            tokio::join!(self.groups.wait_until_ready(), self.fragments.wait_until_ready());
        groups.is_ok() && fragments.is_ok()
    }
}

#[async_trait]
impl Repository for KubeRepository {
    async fn get_group(&self, name: &str) -> Result<FragmentGroup> {
        self.groups
            .get(&ObjectRef::new(name))
            .map(|group| (*group).clone())
            .ok_or_else(|| Error::NotFound {
                kind: GROUP_KIND,
                name: name.to_string(),
            })
    }

    async fn list_groups(&self) -> Result<Vec<FragmentGroup>> {
        Ok(self.groups.state().iter().map(|group| (**group).clone()).collect())
    }

    async fn get_fragment(&self, name: &str) -> Result<Fragment> {
        self.fragments
            .get(&ObjectRef::new(name))
            .map(|fragment| (*fragment).clone())
            .ok_or_else(|| Error::NotFound {
                kind: FRAGMENT_KIND,
                name: name.to_string(),
            })
    }

    async fn list_fragments(&self) -> Result<Vec<Fragment>> {
        Ok(self
            .fragments
            .state()
            .iter()
            .map(|fragment| (**fragment).clone())
            .collect())
    }

    async fn create_fragment(&self, fragment: &Fragment) -> Result<Fragment> {
        let name = fragment.name_any();
        self.fragments_api
            .create(&PostParams::default(), fragment)
            .await
            .map_err(|e| map_api_error(FRAGMENT_KIND, &name, e, true))
    }

    async fn update_fragment(&self, fragment: &Fragment) -> Result<Fragment> {
        let name = fragment.name_any();
        self.fragments_api
            .replace(&name, &PostParams::default(), fragment)
            .await
            .map_err(|e| map_api_error(FRAGMENT_KIND, &name, e, false))
    }

    async fn update_group_status(&self, group: &FragmentGroup) -> Result<FragmentGroup> {
        let name = group.name_any();
        let patch = json!({
            "metadata": { "resourceVersion": group.resource_version() },
            "status": group.status,
        });
        self.groups_api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_api_error(GROUP_KIND, &name, e, false))
    }

    async fn patch_fragment(&self, name: &str, patch: &FragmentPatch) -> Result<Fragment> {
        // The cache may lag; preconditions are taken from the live object
        let live = self
            .fragments_api
            .get(name)
            .await
            .map_err(|e| map_api_error(FRAGMENT_KIND, name, e, false))?;
        let document = patch.to_merge_patch(&live)?;

        self.fragments_api
            .patch(name, &PatchParams::default(), &Patch::Merge(&document))
            .await
            .map_err(|e| map_api_error(FRAGMENT_KIND, name, e, false))
    }
}

/// Map API status codes onto the typed errors the reconciler branches on.
fn map_api_error(kind: &'static str, name: &str, err: kube::Error, creating: bool) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && creating => Error::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind,
            name: name.to_string(),
            message: resp.message,
        },
        kube::Error::Api(resp) if resp.code == 422 => Error::Invalid {
            kind,
            name: name.to_string(),
            message: resp.message,
        },
        other => Error::KubeError(other),
    }
}

impl Informers {
    /// Watch both kinds until `token` is cancelled.
    pub async fn run(self, dispatcher: Dispatcher, token: CancellationToken) {
        info!("Starting FragmentGroup and Fragment watchers");
        let group_dispatcher = dispatcher.clone();
        tokio::join!(
            watch_kind(self.groups_api, self.groups, token.clone(), |change| {
                let dispatcher = group_dispatcher.clone();
                async move { dispatcher.handle_group_event(change).await }
            }),
            watch_kind(self.fragments_api, self.fragments, token, |change| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.handle_fragment_event(change).await }
            }),
        );
        info!("Watchers stopped");
    }
}

async fn watch_kind<K, F, Fut>(api: Api<K>, mut writer: Writer<K>, token: CancellationToken, on_change: F)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(ChangeEvent<K>) -> Fut,
    Fut: Future<Output = ()>,
{
    let store = writer.as_reader();
    let mut tracker = ChangeTracker::default();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    loop {
        let event = tokio::select! {
            () = token.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(kind = %K::kind(&()), error = %e, "Watch stream error");
                    continue;
                }
                None => break,
            },
        };

        // Changes are computed against the previous state, dispatched against the new one
        let changes = tracker.observe(&store, &event);
        writer.apply_watcher_event(&event);
        for change in changes {
            on_change(change).await;
        }
    }
    debug!(kind = %K::kind(&()), "Watcher exiting");
}

/// Turns raw watcher events into [`ChangeEvent`]s
///
/// A relist (`Init` .. `InitDone`) is diffed against the store so objects
/// that disappeared while the watch was down are reported as deleted.
struct ChangeTracker<K> {
    relisted: Vec<K>,
}

impl<K> Default for ChangeTracker<K> {
    fn default() -> Self {
        Self { relisted: Vec::new() }
    }
}

impl<K> ChangeTracker<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Must be called before `event` is applied to the store behind `store`.
    fn observe(&mut self, store: &Store<K>, event: &watcher::Event<K>) -> Vec<ChangeEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => vec![change_against(store, obj.clone())],
            watcher::Event::Delete(obj) => vec![ChangeEvent::Deleted(obj.clone())],
            watcher::Event::Init => {
                self.relisted.clear();
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.relisted.push(obj.clone());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let relisted = std::mem::take(&mut self.relisted);
                let present: HashSet<ObjectRef<K>> = relisted.iter().map(ObjectRef::from_obj).collect();

                let mut changes: Vec<ChangeEvent<K>> = store
                    .state()
                    .into_iter()
                    .filter(|old| !present.contains(&ObjectRef::from_obj(old.as_ref())))
                    .map(|old| ChangeEvent::Deleted((*old).clone()))
                    .collect();
                changes.extend(relisted.into_iter().map(|obj| change_against(store, obj)));
                changes
            }
        }
    }
}

fn change_against<K>(store: &Store<K>, obj: K) -> ChangeEvent<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    match store.get(&ObjectRef::from_obj(&obj)) {
        Some(old) => ChangeEvent::Updated {
            old: (*old).clone(),
            new: obj,
        },
        None => ChangeEvent::Added(obj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::FragmentSpec;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {code}"),
            reason: String::new(),
            code,
        })
    }

    fn fragment(name: &str) -> Fragment {
        Fragment::new(name, FragmentSpec::default())
    }

    #[test]
    fn api_codes_map_to_typed_errors() {
        assert!(matches!(
            map_api_error(FRAGMENT_KIND, "a", api_error(404), false),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            map_api_error(FRAGMENT_KIND, "a", api_error(409), true),
            Error::AlreadyExists { .. }
        ));
        assert!(matches!(
            map_api_error(FRAGMENT_KIND, "a", api_error(409), false),
            Error::Conflict { .. }
        ));
        assert!(matches!(
            map_api_error(FRAGMENT_KIND, "a", api_error(422), false),
            Error::Invalid { .. }
        ));
        assert!(matches!(
            map_api_error(FRAGMENT_KIND, "a", api_error(500), false),
            Error::KubeError(_)
        ));
    }

    #[test]
    fn apply_of_unknown_object_is_an_add() {
        let (store, _writer) = reflector::store::<Fragment>();
        let mut tracker = ChangeTracker::default();

        let changes = tracker.observe(&store, &watcher::Event::Apply(fragment("a")));
        assert_eq!(changes, vec![ChangeEvent::Added(fragment("a"))]);
    }

    #[test]
    fn apply_of_cached_object_carries_old_state() {
        let (store, mut writer) = reflector::store::<Fragment>();
        let mut tracker = ChangeTracker::default();
        writer.apply_watcher_event(&watcher::Event::Apply(fragment("a")));

        let mut updated = fragment("a");
        updated.labels_mut().insert("tier".to_string(), "a".to_string());
        let changes = tracker.observe(&store, &watcher::Event::Apply(updated.clone()));
        assert_eq!(
            changes,
            vec![ChangeEvent::Updated {
                old: fragment("a"),
                new: updated,
            }]
        );
    }

    #[test]
    fn relist_reports_objects_gone_while_disconnected() {
        let (store, mut writer) = reflector::store::<Fragment>();
        let mut tracker = ChangeTracker::default();
        writer.apply_watcher_event(&watcher::Event::Apply(fragment("kept")));
        writer.apply_watcher_event(&watcher::Event::Apply(fragment("gone")));

        let events = [
            watcher::Event::Init,
            watcher::Event::InitApply(fragment("kept")),
            watcher::Event::InitApply(fragment("new")),
            watcher::Event::InitDone,
        ];
        let mut changes = Vec::new();
        for event in &events {
            changes.extend(tracker.observe(&store, event));
            writer.apply_watcher_event(event);
        }

        assert_eq!(changes.len(), 3);
        assert!(changes.contains(&ChangeEvent::Deleted(fragment("gone"))));
        assert!(changes.contains(&ChangeEvent::Added(fragment("new"))));
        assert!(changes.contains(&ChangeEvent::Updated {
            old: fragment("kept"),
            new: fragment("kept"),
        }));
    }
}
