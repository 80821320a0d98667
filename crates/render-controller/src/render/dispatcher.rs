//! Change dispatch
//!
//! Translates change events on groups and fragments into group names on the
//! work queue. Fragment changes find their groups through the controller
//! owner reference when there is one, and through selector matching
//! otherwise.

use crate::crds::{Fragment, FragmentGroup};
use crate::render::association::{groups_for_fragment, verify_controller_ref};
use crate::render::queue::WorkQueue;
use crate::render::repository::Repository;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A single change observed on a resource of kind `K`
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    /// Final known state; at least identity and owner references are set
    Deleted(K),
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: WorkQueue,
    repository: Arc<dyn Repository>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(queue: WorkQueue, repository: Arc<dyn Repository>) -> Self {
        Self { queue, repository }
    }

    pub async fn handle_group_event(&self, event: ChangeEvent<FragmentGroup>) {
        match event {
            ChangeEvent::Added(group) => {
                debug!(group = %group.name_any(), "FragmentGroup added");
                self.queue.add(&group.name_any());
            }
            ChangeEvent::Updated { new, .. } => {
                debug!(group = %new.name_any(), "FragmentGroup updated");
                self.queue.add(&new.name_any());
            }
            ChangeEvent::Deleted(group) => {
                // Rendered fragments are garbage collected through their owner references
                info!(group = %group.name_any(), "FragmentGroup deleted");
            }
        }
    }

    pub async fn handle_fragment_event(&self, event: ChangeEvent<Fragment>) {
        match event {
            ChangeEvent::Added(fragment) => {
                if fragment.is_being_deleted() {
                    // Restarted controller saw a fragment already pending deletion
                    self.fragment_deleted(&fragment).await;
                    return;
                }
                debug!(fragment = %fragment.name_any(), "Fragment added");
                self.enqueue_for_fragment(&fragment).await;
            }
            ChangeEvent::Updated { old, new } => {
                let old_ref = old.controller_ref();
                let new_ref = new.controller_ref();
                if old_ref.is_some() && old_ref.map(|r| &r.uid) != new_ref.map(|r| &r.uid) {
                    error!(
                        fragment = %new.name_any(),
                        "Fragment's controller owner reference can not be changed"
                    );
                    return;
                }
                debug!(fragment = %new.name_any(), "Fragment updated");
                if new.is_being_deleted() {
                    self.fragment_deleted(&new).await;
                } else {
                    self.enqueue_for_fragment(&new).await;
                }
                if new_ref.is_none() {
                    // Groups that matched the previous labels may have lost an input
                    self.enqueue_for_fragment(&old).await;
                }
            }
            ChangeEvent::Deleted(fragment) => self.fragment_deleted(&fragment).await,
        }
    }

    async fn fragment_deleted(&self, fragment: &Fragment) {
        debug!(fragment = %fragment.name_any(), "Fragment deleted");
        self.enqueue_for_fragment(fragment).await;
    }

    /// Queue every group affected by `fragment`. Resolution failures are
    /// logged and nothing is queued.
    async fn enqueue_for_fragment(&self, fragment: &Fragment) {
        if let Some(owner) = fragment.controller_ref() {
            if let Some(group) = self.resolve_controller_ref(owner).await {
                self.queue.add(&group.name_any());
            }
            return;
        }

        let groups = match self.repository.list_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(fragment = %fragment.name_any(), error = %e, "Failed to list FragmentGroups");
                return;
            }
        };

        match groups_for_fragment(fragment, &groups) {
            Ok(matched) => {
                for group in matched {
                    self.queue.add(&group.name_any());
                }
            }
            Err(e) => {
                debug!(fragment = %fragment.name_any(), error = %e, "No FragmentGroup to queue");
            }
        }
    }

    /// Group named by `owner`, when it still exists with the same UID.
    pub async fn resolve_controller_ref(&self, owner: &OwnerReference) -> Option<FragmentGroup> {
        let candidate = match self.repository.get_group(&owner.name).await {
            Ok(group) => Some(group),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(group = %owner.name, error = %e, "Failed to look up controller owner");
                None
            }
        };
        verify_controller_ref(owner, candidate)
    }
}
