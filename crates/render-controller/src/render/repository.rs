//! Storage boundary for groups and fragments
//!
//! Every read returns an owned copy. Implementations backed by a shared cache
//! must clone out of it so callers can mutate what they get back.

use crate::crds::{Fragment, FragmentGroup};
use crate::render::patch::FragmentPatch;
use crate::render::types::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Fails with `NotFound` when no group has that name.
    async fn get_group(&self, name: &str) -> Result<FragmentGroup>;

    async fn list_groups(&self) -> Result<Vec<FragmentGroup>>;

    /// Fails with `NotFound` when no fragment has that name.
    async fn get_fragment(&self, name: &str) -> Result<Fragment>;

    async fn list_fragments(&self) -> Result<Vec<Fragment>>;

    /// Fails with `AlreadyExists` when the name is taken.
    async fn create_fragment(&self, fragment: &Fragment) -> Result<Fragment>;

    /// Replace a fragment; `resourceVersion` on the argument is a precondition.
    async fn update_fragment(&self, fragment: &Fragment) -> Result<Fragment>;

    /// Persist `group.status`.
    async fn update_group_status(&self, group: &FragmentGroup) -> Result<FragmentGroup>;

    /// Fails with `NotFound` for a missing fragment and `Invalid` when the
    /// patch no longer applies.
    async fn patch_fragment(&self, name: &str, patch: &FragmentPatch) -> Result<Fragment>;
}
