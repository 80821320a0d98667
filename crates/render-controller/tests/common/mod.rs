//! Shared fixtures for the render controller integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use render_controller::render::events::{ErrorReporter, EventRecorder, EventSeverity};
use render_controller::render::patch::FragmentPatch;
use render_controller::render::repository::Repository;
use render_controller::{Error, Fragment, FragmentGroup, FragmentGroupSpec, FragmentSpec, Result};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// A write observed by [`InMemoryRepository`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateFragment(String),
    UpdateFragment(String),
    UpdateGroupStatus(String),
    PatchFragment(String),
}

/// Failure injected into a single `patch_fragment` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    NotFound,
    Invalid,
    Conflict,
}

#[derive(Default)]
struct State {
    groups: BTreeMap<String, FragmentGroup>,
    fragments: BTreeMap<String, Fragment>,
    next_id: u64,
    mutations: Vec<Mutation>,
    fail_status_updates: bool,
    patch_failures: HashMap<String, InjectedFailure>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Repository double that behaves like an API server in front of a cache:
/// it assigns UIDs and resource versions and enforces version preconditions.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&self, mut group: FragmentGroup) -> FragmentGroup {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        group.metadata.uid = Some(format!("group-uid-{id}"));
        group.metadata.resource_version = Some(id.to_string());
        state.groups.insert(group.name_any(), group.clone());
        group
    }

    pub fn insert_fragment(&self, mut fragment: Fragment) -> Fragment {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        fragment.metadata.uid = Some(format!("fragment-uid-{id}"));
        fragment.metadata.resource_version = Some(id.to_string());
        state.fragments.insert(fragment.name_any(), fragment.clone());
        fragment
    }

    pub fn remove_group(&self, name: &str) {
        self.state.lock().unwrap().groups.remove(name);
    }

    pub fn remove_fragment(&self, name: &str) {
        self.state.lock().unwrap().fragments.remove(name);
    }

    /// Replace the labels of a stored fragment, bumping its version.
    pub fn relabel_fragment(&self, name: &str, labels: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let fragment = state.fragments.get_mut(name).expect("fragment exists");
        fragment.metadata.labels = Some(label_map(labels));
        fragment.metadata.resource_version = Some(id.to_string());
    }

    /// Overwrite a stored fragment as an outside writer would.
    pub fn tamper_fragment(&self, name: &str, edit: impl FnOnce(&mut Fragment)) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let fragment = state.fragments.get_mut(name).expect("fragment exists");
        edit(fragment);
        fragment.metadata.resource_version = Some(id.to_string());
    }

    pub fn group(&self, name: &str) -> FragmentGroup {
        self.state.lock().unwrap().groups[name].clone()
    }

    pub fn fragment(&self, name: &str) -> Option<Fragment> {
        self.state.lock().unwrap().fragments.get(name).cloned()
    }

    pub fn fragment_names(&self) -> Vec<String> {
        self.state.lock().unwrap().fragments.keys().cloned().collect()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state.lock().unwrap().mutations.clear();
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_status_updates = fail;
    }

    pub fn fail_patch(&self, name: &str, failure: InjectedFailure) {
        self.state
            .lock()
            .unwrap()
            .patch_failures
            .insert(name.to_string(), failure);
    }
}

fn check_version(kind: &'static str, name: &str, stored: Option<&String>, given: Option<&String>) -> Result<()> {
    match given {
        Some(given) if Some(given) != stored => Err(Error::Conflict {
            kind,
            name: name.to_string(),
            message: format!("resourceVersion {given} is stale"),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_group(&self, name: &str) -> Result<FragmentGroup> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "FragmentGroup",
                name: name.to_string(),
            })
    }

    async fn list_groups(&self) -> Result<Vec<FragmentGroup>> {
        Ok(self.state.lock().unwrap().groups.values().cloned().collect())
    }

    async fn get_fragment(&self, name: &str) -> Result<Fragment> {
        self.state
            .lock()
            .unwrap()
            .fragments
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "Fragment",
                name: name.to_string(),
            })
    }

    async fn list_fragments(&self) -> Result<Vec<Fragment>> {
        Ok(self.state.lock().unwrap().fragments.values().cloned().collect())
    }

    async fn create_fragment(&self, fragment: &Fragment) -> Result<Fragment> {
        let mut state = self.state.lock().unwrap();
        let name = fragment.name_any();
        if state.fragments.contains_key(&name) {
            return Err(Error::AlreadyExists { kind: "Fragment", name });
        }

        let id = state.next_id();
        let mut created = fragment.clone();
        created.metadata.uid = Some(format!("fragment-uid-{id}"));
        created.metadata.resource_version = Some(id.to_string());
        state.fragments.insert(name.clone(), created.clone());
        state.mutations.push(Mutation::CreateFragment(name));
        Ok(created)
    }

    async fn update_fragment(&self, fragment: &Fragment) -> Result<Fragment> {
        let mut state = self.state.lock().unwrap();
        let name = fragment.name_any();
        let stored_version = match state.fragments.get(&name) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => return Err(Error::NotFound { kind: "Fragment", name }),
        };
        check_version("Fragment", &name, stored_version.as_ref(), fragment.metadata.resource_version.as_ref())?;

        let id = state.next_id();
        let mut updated = fragment.clone();
        updated.metadata.resource_version = Some(id.to_string());
        state.fragments.insert(name.clone(), updated.clone());
        state.mutations.push(Mutation::UpdateFragment(name));
        Ok(updated)
    }

    async fn update_group_status(&self, group: &FragmentGroup) -> Result<FragmentGroup> {
        let mut state = self.state.lock().unwrap();
        let name = group.name_any();
        if state.fail_status_updates {
            return Err(Error::Conflict {
                kind: "FragmentGroup",
                name,
                message: "injected failure".to_string(),
            });
        }
        let stored_version = match state.groups.get(&name) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => return Err(Error::NotFound { kind: "FragmentGroup", name }),
        };
        check_version("FragmentGroup", &name, stored_version.as_ref(), group.metadata.resource_version.as_ref())?;

        let id = state.next_id();
        let stored = state.groups.get_mut(&name).expect("checked above");
        stored.status.clone_from(&group.status);
        stored.metadata.resource_version = Some(id.to_string());
        let updated = stored.clone();
        state.mutations.push(Mutation::UpdateGroupStatus(name));
        Ok(updated)
    }

    async fn patch_fragment(&self, name: &str, patch: &FragmentPatch) -> Result<Fragment> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.patch_failures.remove(name) {
            let name = name.to_string();
            return Err(match failure {
                InjectedFailure::NotFound => Error::NotFound { kind: "Fragment", name },
                InjectedFailure::Invalid => Error::Invalid {
                    kind: "Fragment",
                    name,
                    message: "injected failure".to_string(),
                },
                InjectedFailure::Conflict => Error::Conflict {
                    kind: "Fragment",
                    name,
                    message: "injected failure".to_string(),
                },
            });
        }

        let Some(mut live) = state.fragments.get(name).cloned() else {
            return Err(Error::NotFound {
                kind: "Fragment",
                name: name.to_string(),
            });
        };
        patch.apply_to(&mut live)?;

        let id = state.next_id();
        live.metadata.resource_version = Some(id.to_string());
        state.fragments.insert(name.to_string(), live.clone());
        state.mutations.push(Mutation::PatchFragment(name.to_string()));
        Ok(live)
    }
}

/// Events recorded against groups: (group, severity, reason)
#[derive(Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<(String, EventSeverity, String)>>,
}

impl RecordingEventRecorder {
    pub fn events(&self) -> Vec<(String, EventSeverity, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRecorder for RecordingEventRecorder {
    async fn record(&self, group: &FragmentGroup, severity: EventSeverity, reason: &str, _message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((group.name_any(), severity, reason.to_string()));
    }
}

/// Keys reported by the retry controller
#[derive(Default)]
pub struct RecordingErrorReporter {
    reported: Mutex<Vec<String>>,
}

impl RecordingErrorReporter {
    pub fn reported(&self) -> Vec<String> {
        self.reported.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingErrorReporter {
    fn report(&self, key: &str, _error: &Error) {
        self.reported.lock().unwrap().push(key.to_string());
    }
}

pub fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Group selecting fragments by `match_labels`
pub fn group(name: &str, match_labels: &[(&str, &str)]) -> FragmentGroup {
    FragmentGroup::new(
        name,
        FragmentGroupSpec {
            fragment_selector: Some(LabelSelector {
                match_labels: Some(label_map(match_labels)),
                ..Default::default()
            }),
        },
    )
}

/// Group whose empty selector would select every fragment
pub fn catch_all_group(name: &str) -> FragmentGroup {
    FragmentGroup::new(
        name,
        FragmentGroupSpec {
            fragment_selector: Some(LabelSelector::default()),
        },
    )
}

pub fn fragment(name: &str, labels: &[(&str, &str)], content: Value) -> Fragment {
    let mut fragment = Fragment::new(name, FragmentSpec { content });
    if !labels.is_empty() {
        fragment.metadata.labels = Some(label_map(labels));
    }
    fragment
}
