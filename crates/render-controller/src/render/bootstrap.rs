//! One-shot rendering without a cluster
//!
//! Used to produce the initial rendered fragments before any controller is
//! running. Same association, merge and naming as the reconciler, but no
//! queue, no repository, and the first failure aborts.

use crate::crds::{Fragment, FragmentGroup, RenderedConfiguration};
use crate::render::association::fragments_for_group;
use crate::render::generate::{generate_rendered_fragment, source_references};
use crate::render::merge::FragmentMerger;
use crate::render::types::Result;
use kube::ResourceExt;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootstrapOutput {
    /// Input groups with `status.configuration` filled in
    pub groups: Vec<FragmentGroup>,
    /// One rendered fragment per group, in group order
    pub fragments: Vec<Fragment>,
}

#[instrument(skip_all, fields(groups = groups.len(), fragments = fragments.len()))]
pub fn run_bootstrap(
    groups: Vec<FragmentGroup>,
    fragments: &[Fragment],
    merger: &dyn FragmentMerger,
) -> Result<BootstrapOutput> {
    let mut output = BootstrapOutput::default();

    for mut group in groups {
        let selected = fragments_for_group(&group, fragments)?;
        let rendered = generate_rendered_fragment(&group, &selected, merger)?;
        debug!(
            group = %group.name_any(),
            rendered = %rendered.name_any(),
            "Rendered {} fragments",
            selected.len()
        );

        group.status.get_or_insert_with(Default::default).configuration = RenderedConfiguration {
            name: rendered.name_any(),
            source: source_references(&selected),
        };
        output.groups.push(group);
        output.fragments.push(rendered);
    }

    Ok(output)
}
