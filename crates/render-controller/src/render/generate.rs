use crate::crds::{Fragment, FragmentGroup};
use crate::render::association::group_owner_reference;
use crate::render::merge::FragmentMerger;
use crate::render::naming::rendered_name;
use crate::render::types::{Error, Result, CONTROLLER_VERSION, GENERATED_BY_VERSION_ANNOTATION};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};

/// Merge `fragments` (name order) and build the rendered fragment for `group`.
pub fn generate_rendered_fragment(
    group: &FragmentGroup,
    fragments: &[Fragment],
    merger: &dyn FragmentMerger,
) -> Result<Fragment> {
    let merged = merger.merge(fragments).map_err(|e| Error::MergeFailed {
        group: group.name_any(),
        reason: format!("{e:#}"),
    })?;
    let name = rendered_name(group, &merged)?;

    let mut rendered = Fragment::new(&name, merged);
    rendered.metadata.owner_references = Some(vec![group_owner_reference(group)]);
    rendered.annotations_mut().insert(
        GENERATED_BY_VERSION_ANNOTATION.to_string(),
        CONTROLLER_VERSION.to_string(),
    );

    Ok(rendered)
}

/// References to the fragments a rendered fragment was built from.
#[must_use]
pub fn source_references(fragments: &[Fragment]) -> Vec<ObjectReference> {
    fragments
        .iter()
        .map(|fragment| ObjectReference {
            api_version: Some(Fragment::api_version(&()).to_string()),
            kind: Some(Fragment::kind(&()).to_string()),
            name: Some(fragment.name_any()),
            ..Default::default()
        })
        .collect()
}
