//! Label selector compilation
//!
//! Wraps `kube::core::Selector` with the controller's policy: an absent
//! selector matches nothing and an empty one is a catch-all that callers must
//! refuse to act on.

use crate::render::types::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Selector, SelectorExt};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum CompiledSelector {
    /// No selector was set
    Nothing,
    /// The selector has no requirements and would match every label set
    Everything,
    Matching(Selector),
}

impl CompiledSelector {
    pub fn compile(selector: Option<&LabelSelector>) -> Result<Self> {
        let Some(selector) = selector else {
            return Ok(Self::Nothing);
        };

        let compiled = Selector::try_from(selector.clone())
            .map_err(|e| Error::InvalidSelector(e.to_string()))?;

        if compiled.selects_all() {
            Ok(Self::Everything)
        } else {
            Ok(Self::Matching(compiled))
        }
    }

    #[must_use]
    pub fn is_everything(&self) -> bool {
        matches!(self, Self::Everything)
    }

    /// Catch-all and absent selectors never match.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Nothing | Self::Everything => false,
            Self::Matching(selector) => selector.matches(labels),
        }
    }
}

/// True when `selector` is present but has no requirements at all.
#[must_use]
pub fn selects_everything(selector: Option<&LabelSelector>) -> bool {
    CompiledSelector::compile(selector).is_ok_and(|compiled| compiled.is_everything())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn match_labels(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(labels(pairs)),
            ..Default::default()
        }
    }

    #[test]
    fn match_labels_selector_matches_superset() {
        let compiled = CompiledSelector::compile(Some(&match_labels(&[("tier", "a")]))).unwrap();

        assert!(compiled.matches(&labels(&[("tier", "a"), ("zone", "x")])));
        assert!(!compiled.matches(&labels(&[("tier", "b")])));
        assert!(!compiled.matches(&BTreeMap::new()));
    }

    #[test]
    fn match_expressions_are_honoured() {
        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["a".to_string(), "b".to_string()]),
            }]),
            ..Default::default()
        };
        let compiled = CompiledSelector::compile(Some(&selector)).unwrap();

        assert!(compiled.matches(&labels(&[("tier", "b")])));
        assert!(!compiled.matches(&labels(&[("tier", "c")])));
    }

    #[test]
    fn empty_selector_is_catch_all_and_matches_nothing() {
        let compiled = CompiledSelector::compile(Some(&LabelSelector::default())).unwrap();

        assert!(compiled.is_everything());
        assert!(!compiled.matches(&labels(&[("tier", "a")])));
        assert!(selects_everything(Some(&LabelSelector::default())));
    }

    #[test]
    fn empty_maps_count_as_catch_all() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::new()),
            match_expressions: Some(vec![]),
        };

        assert!(selects_everything(Some(&selector)));
    }

    #[test]
    fn absent_selector_matches_nothing() {
        let compiled = CompiledSelector::compile(None).unwrap();

        assert!(!compiled.is_everything());
        assert!(!compiled.matches(&labels(&[("tier", "a")])));
        assert!(!selects_everything(None));
    }

    #[test]
    fn unknown_operator_is_invalid() {
        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
            ..Default::default()
        };

        let err = CompiledSelector::compile(Some(&selector)).unwrap_err();
        assert!(matches!(err, Error::InvalidSelector(_)));
    }
}
