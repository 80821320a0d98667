//! Structured patches against `Fragment` objects

use crate::crds::Fragment;
use crate::render::types::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentPatch {
    /// Drop the owner reference with `owner_uid` from the fragment whose UID
    /// is `fragment_uid`.
    RemoveOwnerReference {
        owner_uid: String,
        fragment_uid: String,
    },
}

impl FragmentPatch {
    #[must_use]
    pub fn remove_owner_reference(owner_uid: impl Into<String>, fragment_uid: impl Into<String>) -> Self {
        Self::RemoveOwnerReference {
            owner_uid: owner_uid.into(),
            fragment_uid: fragment_uid.into(),
        }
    }

    /// Apply the patch to `fragment` in place.
    ///
    /// Fails with `Invalid` when the fragment's UID differs from the one the
    /// patch was built for, or when no owner reference carries `owner_uid`.
    pub fn apply_to(&self, fragment: &mut Fragment) -> Result<()> {
        match self {
            Self::RemoveOwnerReference {
                owner_uid,
                fragment_uid,
            } => {
                let remaining = remaining_owner_references(fragment, owner_uid, fragment_uid)?;
                fragment.metadata.owner_references = Some(remaining);
                Ok(())
            }
        }
    }

    /// Render as a JSON merge patch against the `live` object.
    ///
    /// Merge patches replace lists wholesale, so the document carries the
    /// remaining owner references together with the live `resourceVersion`
    /// and `uid` as preconditions.
    pub fn to_merge_patch(&self, live: &Fragment) -> Result<Value> {
        match self {
            Self::RemoveOwnerReference {
                owner_uid,
                fragment_uid,
            } => {
                let remaining = remaining_owner_references(live, owner_uid, fragment_uid)?;
                Ok(json!({
                    "metadata": {
                        "uid": fragment_uid,
                        "resourceVersion": live.resource_version(),
                        "ownerReferences": remaining,
                    }
                }))
            }
        }
    }
}

fn remaining_owner_references(
    fragment: &Fragment,
    owner_uid: &str,
    fragment_uid: &str,
) -> Result<Vec<OwnerReference>> {
    if fragment.uid().as_deref() != Some(fragment_uid) {
        return Err(Error::Invalid {
            kind: "Fragment",
            name: fragment.name_any(),
            message: format!("uid does not match {fragment_uid}"),
        });
    }

    let owners = fragment.owner_references();
    if !owners.iter().any(|owner| owner.uid == owner_uid) {
        return Err(Error::Invalid {
            kind: "Fragment",
            name: fragment.name_any(),
            message: format!("no owner reference with uid {owner_uid}"),
        });
    }

    Ok(owners
        .iter()
        .filter(|owner| owner.uid != owner_uid)
        .cloned()
        .collect())
}
