//! Reassertion of a rendered fragment's desired state against the live object

use crate::crds::Fragment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

/// Fold `desired` into `live`.
///
/// Labels and annotations from `desired` are added or overwritten, owner
/// references are ensured by UID and the spec is replaced. Returns `None` when
/// the live object already carries everything `desired` asks for.
#[must_use]
pub fn merge_desired_state(live: &Fragment, desired: &Fragment) -> Option<Fragment> {
    let mut updated = live.clone();
    let mut modified = false;

    modified |= merge_string_map(&mut updated.metadata.labels, desired.metadata.labels.as_ref());
    modified |= merge_string_map(
        &mut updated.metadata.annotations,
        desired.metadata.annotations.as_ref(),
    );
    modified |= ensure_owner_references(
        &mut updated.metadata.owner_references,
        desired.metadata.owner_references.as_deref().unwrap_or_default(),
    );

    if updated.spec != desired.spec {
        updated.spec = desired.spec.clone();
        modified = true;
    }

    modified.then_some(updated)
}

fn merge_string_map(
    existing: &mut Option<BTreeMap<String, String>>,
    required: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(required) = required.filter(|required| !required.is_empty()) else {
        return false;
    };

    let existing = existing.get_or_insert_with(BTreeMap::new);
    let mut modified = false;
    for (key, value) in required {
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            modified = true;
        }
    }
    modified
}

fn ensure_owner_references(
    existing: &mut Option<Vec<OwnerReference>>,
    required: &[OwnerReference],
) -> bool {
    if required.is_empty() {
        return false;
    }

    let existing = existing.get_or_insert_with(Vec::new);
    let mut modified = false;
    for owner in required {
        match existing.iter_mut().find(|current| current.uid == owner.uid) {
            Some(current) if current == owner => {}
            Some(current) => {
                *current = owner.clone();
                modified = true;
            }
            None => {
                existing.push(owner.clone());
                modified = true;
            }
        }
    }
    modified
}
