//! Association between groups and fragments
//!
//! Forward direction feeds the reconciler, inverse direction feeds the
//! dispatcher. Both use the same selector policy from [`CompiledSelector`].

use crate::crds::{Fragment, FragmentGroup};
use crate::render::selector::CompiledSelector;
use crate::render::types::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

/// Fragments selected by `group`, sorted by name.
pub fn fragments_for_group(group: &FragmentGroup, fragments: &[Fragment]) -> Result<Vec<Fragment>> {
    let selector = CompiledSelector::compile(group.spec.fragment_selector.as_ref())?;

    let mut selected: Vec<Fragment> = fragments
        .iter()
        .filter(|fragment| selector.matches(fragment.labels()))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(Error::NoMatchingFragments {
            group: group.name_any(),
        });
    }

    selected.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
    Ok(selected)
}

/// Groups whose selector matches `fragment`'s labels.
pub fn groups_for_fragment(
    fragment: &Fragment,
    groups: &[FragmentGroup],
) -> Result<Vec<FragmentGroup>> {
    if fragment.labels().is_empty() {
        return Err(Error::NoLabels {
            fragment: fragment.name_any(),
        });
    }

    let mut matched = Vec::new();
    for group in groups {
        let selector = CompiledSelector::compile(group.spec.fragment_selector.as_ref())?;
        // A group with an absent or empty selector should match nothing, not everything
        if !selector.matches(fragment.labels()) {
            continue;
        }
        matched.push(group.clone());
    }

    if matched.is_empty() {
        return Err(Error::NoMatchingGroup {
            fragment: fragment.name_any(),
        });
    }
    Ok(matched)
}

/// True when the owner reference points at the `FragmentGroup` kind.
#[must_use]
pub fn is_group_reference(owner: &OwnerReference) -> bool {
    owner.kind == FragmentGroup::kind(&())
}

/// Validate a group looked up by the name in `owner`.
///
/// Groups cannot be fetched by UID, so they are looked up by name and the UID
/// is compared afterwards. A mismatch means the reference is stale.
#[must_use]
pub fn verify_controller_ref(
    owner: &OwnerReference,
    candidate: Option<FragmentGroup>,
) -> Option<FragmentGroup> {
    if !is_group_reference(owner) {
        return None;
    }
    candidate.filter(|group| group.uid().as_deref() == Some(owner.uid.as_str()))
}

/// Controller owner reference pointing at `group`.
#[must_use]
pub fn group_owner_reference(group: &FragmentGroup) -> OwnerReference {
    OwnerReference {
        api_version: FragmentGroup::api_version(&()).to_string(),
        kind: FragmentGroup::kind(&()).to_string(),
        name: group.name_any(),
        uid: group.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
