//! `Fragment` Custom Resource Definition
//!
//! A fragment is either authored by users and picked up by label selectors, or
//! rendered by the controller and owned by the `FragmentGroup` that produced it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, ResourceExt};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "render.fragments.dev", version = "v1", kind = "Fragment")]
#[kube(shortname = "frag")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct FragmentSpec {
    /// Free-form configuration document combined by the merger
    #[serde(default = "empty_content")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub content: Value,
}

impl Default for FragmentSpec {
    fn default() -> Self {
        Self {
            content: empty_content(),
        }
    }
}

impl Fragment {
    /// The owner reference flagged as controller, if any.
    #[must_use]
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references()
            .iter()
            .find(|owner| owner.controller == Some(true))
    }

    /// True when the fragment is controller-owned by the object with `uid`.
    #[must_use]
    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller_ref().is_some_and(|owner| owner.uid == uid)
    }

    /// True when any owner reference carries `uid`.
    #[must_use]
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references().iter().any(|owner| owner.uid == uid)
    }

    /// True once the API server has set a deletion timestamp.
    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

fn empty_content() -> Value {
    Value::Object(Map::new())
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        Value::Bool(true),
    );
    Schema::Object(schema)
}
