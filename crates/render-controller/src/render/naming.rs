use crate::crds::{FragmentGroup, FragmentSpec};
use crate::render::types::{Error, Result, RENDERED_PREFIX};
use serde_json::Value;
use sha2::{Digest, Sha256};

const MAX_K8S_OBJECT_NAME_LENGTH: usize = 253;
const HASH_LENGTH: usize = 32;

/// Content-addressed name of the fragment rendered for `group`.
///
/// Format: `rendered-{group}-{hash}` where `hash` is the first 32 hex
/// characters of SHA-256 over the canonical JSON of `merged`.
pub fn rendered_name(group: &FragmentGroup, merged: &FragmentSpec) -> Result<String> {
    let group_name = group
        .metadata
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::NamingFailed {
            group: String::new(),
            reason: "FragmentGroup has no name".to_string(),
        })?;

    let value = serde_json::to_value(merged).map_err(|e| Error::NamingFailed {
        group: group_name.to_string(),
        reason: e.to_string(),
    })?;
    let mut canonical = String::new();
    write_canonical(&mut canonical, &value).map_err(|e| Error::NamingFailed {
        group: group_name.to_string(),
        reason: e.to_string(),
    })?;

    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    let name = format!("{RENDERED_PREFIX}-{group_name}-{}", &digest[..HASH_LENGTH]);

    if name.len() > MAX_K8S_OBJECT_NAME_LENGTH {
        return Err(Error::NamingFailed {
            group: group_name.to_string(),
            reason: format!(
                "rendered name is {} characters, limit is {MAX_K8S_OBJECT_NAME_LENGTH}",
                name.len()
            ),
        });
    }

    Ok(name)
}

/// JSON with object keys sorted at every level and no insignificant whitespace.
fn write_canonical(out: &mut String, value: &Value) -> std::result::Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(out, &map[key])?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(out, item)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::FragmentGroupSpec;
    use serde_json::json;

    fn group(name: &str) -> FragmentGroup {
        FragmentGroup::new(name, FragmentGroupSpec::default())
    }

    fn spec(content: Value) -> FragmentSpec {
        FragmentSpec { content }
    }

    #[test]
    fn name_is_prefixed_and_namespaced_by_group() {
        let name = rendered_name(&group("worker"), &spec(json!({"a": 1}))).unwrap();

        assert!(name.starts_with("rendered-worker-"));
        assert_eq!(name.len(), "rendered-worker-".len() + HASH_LENGTH);
    }

    #[test]
    fn identical_content_yields_identical_name() {
        let first = rendered_name(&group("worker"), &spec(json!({"a": 1, "b": [1, 2]}))).unwrap();
        let second = rendered_name(&group("worker"), &spec(json!({"b": [1, 2], "a": 1}))).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn content_and_group_both_change_the_name() {
        let base = rendered_name(&group("worker"), &spec(json!({"a": 1}))).unwrap();

        assert_ne!(base, rendered_name(&group("worker"), &spec(json!({"a": 2}))).unwrap());
        assert_ne!(base, rendered_name(&group("master"), &spec(json!({"a": 1}))).unwrap());
    }

    #[test]
    fn unnamed_group_fails_closed() {
        let mut unnamed = group("x");
        unnamed.metadata.name = None;

        let err = rendered_name(&unnamed, &spec(json!({}))).unwrap_err();
        assert!(matches!(err, Error::NamingFailed { .. }));
    }

    #[test]
    fn overlong_name_fails_closed() {
        let err = rendered_name(&group(&"g".repeat(240)), &spec(json!({}))).unwrap_err();
        assert!(matches!(err, Error::NamingFailed { .. }));
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let mut out = String::new();
        write_canonical(&mut out, &json!({"z": {"b": 1, "a": "x"}, "a": [true, null]})).unwrap();

        assert_eq!(out, r#"{"a":[true,null],"z":{"a":"x","b":1}}"#);
    }
}
