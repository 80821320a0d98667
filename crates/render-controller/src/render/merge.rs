//! Fragment merging
//!
//! The reconciler treats merging as an opaque, deterministic function. It
//! always hands fragments over sorted by name.

use crate::crds::{Fragment, FragmentSpec};
use serde_json::{Map, Value};

pub trait FragmentMerger: Send + Sync {
    /// Combine `fragments`, given in name order, into a single spec.
    fn merge(&self, fragments: &[Fragment]) -> anyhow::Result<FragmentSpec>;
}

/// Deep merge of JSON content.
///
/// Objects are merged key by key; any other value from a later fragment
/// replaces the earlier one.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMerger;

impl FragmentMerger for JsonMerger {
    fn merge(&self, fragments: &[Fragment]) -> anyhow::Result<FragmentSpec> {
        let mut content = Value::Object(Map::new());
        for fragment in fragments {
            merge_value(&mut content, &fragment.spec.content);
        }
        Ok(FragmentSpec { content })
    }
}

fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
