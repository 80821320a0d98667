//! `FragmentGroup` Custom Resource Definition

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "render.fragments.dev", version = "v1", kind = "FragmentGroup")]
#[kube(status = "FragmentGroupStatus")]
#[kube(shortname = "fg")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Rendered","type":"string","jsonPath":".status.configuration.name"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct FragmentGroupSpec {
    /// Selects the fragments rendered into this group. An empty selector
    /// selects nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FragmentGroupStatus {
    #[serde(default)]
    pub configuration: RenderedConfiguration,
}

/// The rendered fragment currently applicable to a group
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderedConfiguration {
    /// Name of the rendered `Fragment`
    #[serde(default)]
    pub name: String,

    /// Fragments merged into the rendered one, ordered by name
    #[serde(default)]
    pub source: Vec<ObjectReference>,
}

impl FragmentGroup {
    /// Name of the rendered fragment recorded in status, if any.
    #[must_use]
    pub fn rendered_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|status| status.configuration.name.as_str())
            .filter(|name| !name.is_empty())
    }
}
