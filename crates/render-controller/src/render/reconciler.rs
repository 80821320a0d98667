use crate::crds::{Fragment, FragmentGroup, RenderedConfiguration};
use crate::render::apply::merge_desired_state;
use crate::render::association::fragments_for_group;
use crate::render::events::{EventRecorder, EventSeverity};
use crate::render::generate::{generate_rendered_fragment, source_references};
use crate::render::merge::FragmentMerger;
use crate::render::patch::FragmentPatch;
use crate::render::repository::Repository;
use crate::render::selector::selects_everything;
use crate::render::types::Result;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Event reason recorded for a group whose selector matches everything
pub const REASON_SELECTING_ALL: &str = "SelectingAll";

/// What a single `sync` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The group no longer exists
    GroupDeleted,
    /// The group selects every fragment and was skipped
    SelectingAll,
    /// Status already named the rendered fragment
    Converged {
        rendered: String,
        created: bool,
        reasserted: bool,
        cleanup: CleanupReport,
    },
    /// Status was moved to a new rendered fragment
    Transitioned {
        rendered: String,
        previous: Option<String>,
        created: bool,
        cleanup: CleanupReport,
    },
}

/// Per-fragment results of removing a group's owner reference from stale
/// rendered fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub disowned: Vec<String>,
    /// Already gone or no longer carrying the reference
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.disowned.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

pub struct Reconciler {
    repository: Arc<dyn Repository>,
    recorder: Arc<dyn EventRecorder>,
    merger: Arc<dyn FragmentMerger>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        repository: Arc<dyn Repository>,
        recorder: Arc<dyn EventRecorder>,
        merger: Arc<dyn FragmentMerger>,
    ) -> Self {
        Self {
            repository,
            recorder,
            merger,
        }
    }

    /// Sync the group named `group_name`. Never invoked concurrently for the
    /// same name; the work queue guarantees that.
    #[instrument(skip(self, group_name), fields(group = %group_name))]
    pub async fn sync(&self, group_name: &str) -> Result<SyncOutcome> {
        let start = Instant::now();
        debug!("Started syncing FragmentGroup");
        let outcome = self.sync_group(group_name).await;
        debug!(elapsed = ?start.elapsed(), "Finished syncing FragmentGroup");
        outcome
    }

    async fn sync_group(&self, group_name: &str) -> Result<SyncOutcome> {
        let group = match self.repository.get_group(group_name).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                info!("FragmentGroup has been deleted");
                return Ok(SyncOutcome::GroupDeleted);
            }
            Err(e) => return Err(e),
        };

        if selects_everything(group.spec.fragment_selector.as_ref()) {
            warn!("FragmentGroup selects all Fragments, skipping");
            self.recorder
                .record(
                    &group,
                    EventSeverity::Warning,
                    REASON_SELECTING_ALL,
                    "This FragmentGroup is selecting all Fragments. A non-empty selector is required.",
                )
                .await;
            return Ok(SyncOutcome::SelectingAll);
        }

        let fragments = self.repository.list_fragments().await?;
        let selected = fragments_for_group(&group, &fragments)?;

        self.sync_rendered_fragment(group, &selected).await
    }

    async fn sync_rendered_fragment(
        &self,
        mut group: FragmentGroup,
        selected: &[Fragment],
    ) -> Result<SyncOutcome> {
        let rendered = generate_rendered_fragment(&group, selected, self.merger.as_ref())?;
        let rendered_name = rendered.name_any();
        let source = source_references(selected);

        // `None` once the fragment had to be created
        let live = match self.repository.get_fragment(&rendered_name).await {
            Ok(live) => Some(live),
            Err(e) if e.is_not_found() => {
                self.repository.create_fragment(&rendered).await?;
                let source_names: Vec<String> = selected.iter().map(ResourceExt::name_any).collect();
                info!(
                    rendered = %rendered_name,
                    sources = ?source_names,
                    "Generated rendered Fragment from {} fragments",
                    selected.len()
                );
                None
            }
            Err(e) => return Err(e),
        };
        let created = live.is_none();

        if group.rendered_name() == Some(rendered_name.as_str()) {
            let reasserted = match live {
                Some(live) => self.reassert(&live, &rendered).await?,
                None => false,
            };
            let cleanup = self.disown_stale(&group, &rendered_name).await?;
            return Ok(SyncOutcome::Converged {
                rendered: rendered_name,
                created,
                reasserted,
                cleanup,
            });
        }

        let previous = group.rendered_name().map(str::to_string);
        group.status.get_or_insert_with(Default::default).configuration = RenderedConfiguration {
            name: rendered_name.clone(),
            source,
        };
        // Cleanup only runs once the new status is persisted
        let group = self.repository.update_group_status(&group).await?;
        info!(
            rendered = %rendered_name,
            previous = ?previous,
            "FragmentGroup now points at rendered Fragment"
        );

        let cleanup = self.disown_stale(&group, &rendered_name).await?;
        Ok(SyncOutcome::Transitioned {
            rendered: rendered_name,
            previous,
            created,
            cleanup,
        })
    }

    /// Push the desired state of the rendered fragment onto the live object.
    async fn reassert(&self, live: &Fragment, desired: &Fragment) -> Result<bool> {
        match merge_desired_state(live, desired) {
            Some(updated) => {
                self.repository.update_fragment(&updated).await?;
                info!(rendered = %desired.name_any(), "Corrected drift on rendered Fragment");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove `group`'s owner reference from every fragment it owns other
    /// than `keep`. Runs over all candidates; individual failures are logged.
    async fn disown_stale(&self, group: &FragmentGroup, keep: &str) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let Some(group_uid) = group.uid() else {
            warn!("FragmentGroup has no uid, skipping cleanup");
            return Ok(report);
        };

        let fragments = self.repository.list_fragments().await?;
        for fragment in fragments
            .iter()
            .filter(|fragment| fragment.name_any() != keep && fragment.is_owned_by(&group_uid))
        {
            let name = fragment.name_any();
            let Some(fragment_uid) = fragment.uid() else {
                report.skipped.push(name);
                continue;
            };

            let patch = FragmentPatch::remove_owner_reference(group_uid.as_str(), fragment_uid);
            match self.repository.patch_fragment(&name, &patch).await {
                Ok(_) => {
                    info!(fragment = %name, "Removed owner reference from stale rendered Fragment");
                    report.disowned.push(name);
                }
                Err(e) if e.is_stale_reference() => {
                    // Deleted or recreated since it was listed
                    debug!(fragment = %name, error = %e, "Owner reference already gone");
                    report.skipped.push(name);
                }
                Err(e) => {
                    warn!(fragment = %name, error = %e, "Failed to remove owner reference");
                    report.failed.push(name);
                }
            }
        }

        if !report.is_empty() {
            debug!(
                disowned = report.disowned.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Cleanup of stale rendered Fragments finished"
            );
        }
        Ok(report)
    }
}
